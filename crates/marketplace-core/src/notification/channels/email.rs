//! Email 邮件渠道（Resend）
//!
//! 未配置 API Key 时渠道处于禁用状态，所有邮件跳过并记录日志。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use agri_shared::config::ResendConfig;
use agri_shared::crypto::mask_email;
use agri_shared::error::AgriError;
use agri_shared::retry::{RetryPolicy, retry_with_policy};

use super::{ChannelResult, NotificationChannel};
use crate::error::Result;
use crate::notification::types::{ChannelType, Delivery};

const SERVICE: &str = "resend";

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: String,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: String,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 已配置的 Resend 账号
struct ResendEndpoint {
    base_url: String,
    api_key: String,
}

pub struct EmailChannel {
    /// None 表示未配置 API Key，邮件全部跳过
    resend: Option<ResendEndpoint>,
    from_address: String,
    client: Client,
    retry_policy: RetryPolicy,
}

impl EmailChannel {
    pub fn from_config(config: &ResendConfig) -> Self {
        let resend = config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| ResendEndpoint {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: key.to_string(),
            });
        if resend.is_none() {
            info!("Resend 未配置，邮件通知将被跳过");
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "创建 Resend HTTP 客户端失败，使用默认客户端");
                Client::new()
            });
        Self {
            resend,
            from_address: config.from_address.clone(),
            client,
            retry_policy: RetryPolicy::external_api(),
        }
    }

    fn enabled(&self) -> bool {
        self.resend.is_some()
    }

    fn build_html_content(&self, delivery: &Delivery) -> String {
        let n = &delivery.notification;
        let greeting = delivery
            .recipient_name
            .as_deref()
            .map(|name| format!("<p>Hi {},</p>", escape_html(name)))
            .unwrap_or_default();
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
</head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #1f2937;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
        <div style="background: #166534; color: #ffffff; padding: 16px 20px; border-radius: 8px 8px 0 0;">
            <h2 style="margin: 0;">{title}</h2>
        </div>
        <div style="background: #f9fafb; padding: 20px; border-radius: 0 0 8px 8px;">
            {greeting}
            <p>{body}</p>
        </div>
        <p style="text-align: center; color: #6b7280; font-size: 12px;">AgriCompass</p>
    </div>
</body>
</html>"#,
            title = escape_html(&n.title),
            greeting = greeting,
            body = escape_html(&n.body),
        )
    }

    async fn post_email(&self, to: &str, delivery: &Delivery) -> std::result::Result<String, AgriError> {
        let Some(ResendEndpoint { base_url: endpoint, api_key }) = &self.resend else {
            return Err(AgriError::NotConfigured {
                service: SERVICE.to_string(),
            });
        };

        let request = SendEmailRequest {
            from: &self.from_address,
            to: vec![to],
            subject: &delivery.notification.title,
            html: self.build_html_content(delivery),
            text: &delivery.notification.body,
        };

        let response = self
            .client
            .post(format!("{}/emails", endpoint))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    AgriError::timeout(SERVICE)
                } else {
                    AgriError::external(SERVICE, e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(AgriError::timeout(SERVICE));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgriError::external(SERVICE, format!("HTTP {}: {}", status, body)));
        }

        let parsed: SendEmailResponse =
            response.json().await.map_err(|e| AgriError::external(SERVICE, e.to_string()))?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn name(&self) -> &str {
        "Email"
    }

    async fn is_available(&self, delivery: &Delivery) -> bool {
        self.enabled()
            && delivery.notification.kind.sends_email()
            && delivery.recipient_email.is_some()
    }

    fn needs_recipient_email(&self) -> bool {
        self.enabled()
    }

    async fn send(&self, delivery: &Delivery) -> Result<ChannelResult> {
        let start = Instant::now();

        if !self.enabled() {
            debug!(
                notification_id = %delivery.notification.id,
                "Resend 未配置，跳过邮件"
            );
            return Ok(ChannelResult::skipped(self.channel_type(), "邮件服务未配置"));
        }
        if !self.is_available(delivery).await {
            return Ok(ChannelResult::skipped(
                self.channel_type(),
                "该类型不发邮件或收件人无邮箱",
            ));
        }

        let Some(to) = delivery.recipient_email.as_deref() else {
            return Ok(ChannelResult::skipped(self.channel_type(), "收件人无邮箱"));
        };

        let result = retry_with_policy(
            &self.retry_policy,
            "resend.send_email",
            AgriError::is_retryable,
            || self.post_email(to, delivery),
        )
        .await;

        match result {
            Ok(message_id) => {
                info!(
                    notification_id = %delivery.notification.id,
                    to = %mask_email(to),
                    message_id = %message_id,
                    "邮件发送成功"
                );
                Ok(ChannelResult::success(
                    self.channel_type(),
                    Some(message_id),
                    start.elapsed().as_millis() as u64,
                ))
            }
            Err(e) => {
                warn!(
                    notification_id = %delivery.notification.id,
                    to = %mask_email(to),
                    error = %e,
                    "邮件发送失败"
                );
                Ok(ChannelResult::failed(
                    self.channel_type(),
                    e.to_string(),
                    start.elapsed().as_millis() as u64,
                ))
            }
        }
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Notification, NotificationKind};
    use crate::notification::types::SendStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn delivery(kind: NotificationKind) -> Delivery {
        Delivery::new(Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind,
            title: "New order received".to_string(),
            body: "Order AGR-1 for <b>maize</b>".to_string(),
            data: serde_json::json!({}),
            is_read: false,
            created_at: Utc::now(),
        })
    }

    fn configured() -> EmailChannel {
        EmailChannel::from_config(&ResendConfig {
            api_key: Some("re_test".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_unconfigured_channel_skips() {
        let channel = EmailChannel::from_config(&ResendConfig::default());
        assert!(!channel.needs_recipient_email());

        let d = delivery(NotificationKind::OrderPlaced).with_recipient("ada@farm.ng", "Ada");
        assert!(!channel.is_available(&d).await);

        let result = channel.send(&d).await.unwrap();
        assert_eq!(result.status, SendStatus::Skipped);
        assert_eq!(result.channel, ChannelType::Email);
    }

    #[tokio::test]
    async fn test_availability_depends_on_kind_and_recipient() {
        let channel = configured();
        assert!(channel.needs_recipient_email());

        let without_email = delivery(NotificationKind::OrderPlaced);
        assert!(!channel.is_available(&without_email).await);

        let silent_kind =
            delivery(NotificationKind::OrderDelivered).with_recipient("ada@farm.ng", "Ada");
        assert!(!channel.is_available(&silent_kind).await);
        let result = channel.send(&silent_kind).await.unwrap();
        assert_eq!(result.status, SendStatus::Skipped);

        let ok = delivery(NotificationKind::OrderPlaced).with_recipient("ada@farm.ng", "Ada");
        assert!(channel.is_available(&ok).await);
    }

    #[test]
    fn test_html_is_escaped() {
        let channel = configured();
        let d = delivery(NotificationKind::OrderPlaced).with_recipient("ada@farm.ng", "Ada & Co");
        let html = channel.build_html_content(&d);
        assert!(html.contains("&lt;b&gt;maize&lt;/b&gt;"));
        assert!(html.contains("Hi Ada &amp; Co,"));
        assert!(html.contains("New order received"));
    }
}
