//! Paystack 支付网关
//!
//! 交易初始化、交易查询、转账收款人与转账接口，以及回调事件解析。
//! 金额单位统一为 kobo。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use agri_shared::config::PaystackConfig;
use agri_shared::crypto::verify_hmac_sha512;
use agri_shared::error::AgriError;
use agri_shared::retry::{RetryPolicy, retry_with_policy};

use crate::error::{MarketError, Result};

const SERVICE: &str = "paystack";

/// 回调签名请求头
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

// ==================== 请求与响应 ====================

#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    pub amount: i64,
    pub reference: String,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitializedTransaction {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerifiedTransaction {
    /// success / failed / abandoned ...
    pub status: String,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
}

impl VerifiedTransaction {
    pub fn is_successful(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientRequest {
    #[serde(rename = "type")]
    pub recipient_type: String,
    pub name: String,
    pub account_number: String,
    pub bank_code: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest {
    pub source: String,
    pub amount: i64,
    pub recipient: String,
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferReceipt {
    pub transfer_code: String,
    pub reference: String,
    /// pending / success / failed / reversed / otp
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RecipientData {
    recipient_code: String,
}

/// 支付网关接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction>;

    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction>;

    /// 返回 recipient_code
    async fn create_transfer_recipient(&self, request: &RecipientRequest) -> Result<String>;

    async fn initiate_transfer(&self, request: &TransferRequest) -> Result<TransferReceipt>;

    /// 按转账参考号查询状态
    async fn verify_transfer(&self, reference: &str) -> Result<TransferReceipt>;
}

// ==================== HTTP 客户端 ====================

pub struct PaystackClient {
    client: Client,
    base_url: String,
    secret_key: String,
    retry_policy: RetryPolicy,
}

impl PaystackClient {
    /// 未配置密钥时返回 None，调用方据此降级
    pub fn from_config(config: &PaystackConfig) -> Result<Option<Self>> {
        let Some(secret_key) = config.secret_key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| MarketError::Internal(format!("创建 Paystack HTTP 客户端失败: {e}")))?;

        Ok(Some(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key,
            retry_policy: RetryPolicy::external_api(),
        }))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> std::result::Result<T, AgriError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.secret_key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                AgriError::timeout(SERVICE)
            } else {
                AgriError::external(SERVICE, e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            // 5xx 视为瞬时错误，交给重试
            return Err(AgriError::timeout(SERVICE));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| AgriError::external(SERVICE, format!("响应解析失败 (HTTP {status}): {e}")))?;

        if !envelope.status {
            warn!(http_status = %status, message = %envelope.message, "Paystack 返回失败");
            return Err(AgriError::external(SERVICE, envelope.message));
        }

        envelope.data.ok_or_else(|| AgriError::external(SERVICE, "响应缺少 data 字段"))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let data = retry_with_policy(
            &self.retry_policy,
            operation,
            AgriError::is_retryable,
            || self.send::<T>(method.clone(), path, body.clone()),
        )
        .await?;
        Ok(data)
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    #[instrument(skip(self, request), fields(reference = %request.reference, amount = request.amount))]
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<InitializedTransaction> {
        let body = serde_json::to_value(request)?;
        let data: InitializedTransaction = self
            .call(
                "paystack.initialize",
                reqwest::Method::POST,
                "/transaction/initialize",
                Some(body),
            )
            .await?;
        debug!("Paystack 交易初始化成功");
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn verify_transaction(&self, reference: &str) -> Result<VerifiedTransaction> {
        let path = format!("/transaction/verify/{}", reference);
        self.call("paystack.verify", reqwest::Method::GET, &path, None)
            .await
    }

    #[instrument(skip(self, request), fields(bank_code = %request.bank_code))]
    async fn create_transfer_recipient(&self, request: &RecipientRequest) -> Result<String> {
        let body = serde_json::to_value(request)?;
        let data: RecipientData = self
            .call(
                "paystack.transfer_recipient",
                reqwest::Method::POST,
                "/transferrecipient",
                Some(body),
            )
            .await?;
        Ok(data.recipient_code)
    }

    #[instrument(skip(self, request), fields(reference = %request.reference, amount = request.amount))]
    async fn initiate_transfer(&self, request: &TransferRequest) -> Result<TransferReceipt> {
        let body = serde_json::to_value(request)?;
        self.call(
            "paystack.transfer",
            reqwest::Method::POST,
            "/transfer",
            Some(body),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn verify_transfer(&self, reference: &str) -> Result<TransferReceipt> {
        let path = format!("/transfer/verify/{}", reference);
        self.call("paystack.transfer_verify", reqwest::Method::GET, &path, None)
            .await
    }
}

// ==================== 回调事件 ====================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChargeData {
    pub reference: String,
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransferData {
    pub reference: String,
    pub amount: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaystackEvent {
    ChargeSuccess(ChargeData),
    TransferSuccess(TransferData),
    TransferFailed(TransferData),
    TransferReversed(TransferData),
    /// 未处理的事件类型，直接确认
    Unhandled(String),
}

impl PaystackEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::ChargeSuccess(_) => "charge.success",
            Self::TransferSuccess(_) => "transfer.success",
            Self::TransferFailed(_) => "transfer.failed",
            Self::TransferReversed(_) => "transfer.reversed",
            Self::Unhandled(name) => name,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::ChargeSuccess(d) => Some(&d.reference),
            Self::TransferSuccess(d) | Self::TransferFailed(d) | Self::TransferReversed(d) => {
                Some(&d.reference)
            }
            Self::Unhandled(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// 校验回调签名：hex(HMAC-SHA512(secret_key, raw_body))
pub fn verify_signature(secret_key: &str, body: &[u8], signature: Option<&str>) -> bool {
    match signature {
        Some(sig) if !sig.is_empty() => verify_hmac_sha512(secret_key.as_bytes(), body, sig),
        _ => false,
    }
}

/// 解析回调体
pub fn parse_event(body: &[u8]) -> Result<PaystackEvent> {
    let raw: RawEvent = serde_json::from_slice(body)?;
    let event = match raw.event.as_str() {
        "charge.success" => PaystackEvent::ChargeSuccess(serde_json::from_value(raw.data)?),
        "transfer.success" => PaystackEvent::TransferSuccess(serde_json::from_value(raw.data)?),
        "transfer.failed" => PaystackEvent::TransferFailed(serde_json::from_value(raw.data)?),
        "transfer.reversed" => PaystackEvent::TransferReversed(serde_json::from_value(raw.data)?),
        _ => PaystackEvent::Unhandled(raw.event),
    };
    Ok(event)
}
