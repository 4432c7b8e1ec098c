//! 通知服务
//!
//! 通知先落库，再并行投递到各渠道。投递失败只记录日志，不影响业务操作。

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::channels::NotificationChannel;
use super::types::{ChannelResult, Delivery, DeliveryReport, SendStatus};
use crate::error::{MarketError, Result};
use crate::models::{NewNotification, Notification, Page};
use crate::repository::{NotificationRepositoryTrait, UserRepositoryTrait};

#[derive(Clone)]
pub struct NotificationService {
    repo: Arc<dyn NotificationRepositoryTrait>,
    users: Arc<dyn UserRepositoryTrait>,
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationService {
    pub fn new(
        repo: Arc<dyn NotificationRepositoryTrait>,
        users: Arc<dyn UserRepositoryTrait>,
    ) -> Self {
        Self {
            repo,
            users,
            channels: Vec::new(),
        }
    }

    pub fn register_channel(&mut self, channel: Arc<dyn NotificationChannel>) {
        info!(
            channel_type = ?channel.channel_type(),
            channel_name = channel.name(),
            "注册通知渠道"
        );
        self.channels.push(channel);
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.register_channel(channel);
        self
    }

    /// 创建通知并投递
    #[instrument(skip(self, new), fields(user_id = %new.user_id, kind = %new.kind))]
    pub async fn notify(&self, new: NewNotification) -> Result<Notification> {
        let notification = self.repo.create(&new).await?;
        let delivery = self.prepare_delivery(notification.clone()).await;
        let report = self.deliver(&delivery).await;
        self.log_report(&report);
        Ok(notification)
    }

    /// 后台发送，调用方不等待结果
    pub fn notify_async(&self, new: NewNotification) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.notify(new).await {
                error!(error = %e, "异步发送通知失败");
            }
        });
    }

    pub fn notify_all_async(&self, notifications: Vec<NewNotification>) {
        for n in notifications {
            self.notify_async(n);
        }
    }

    async fn prepare_delivery(&self, notification: Notification) -> Delivery {
        let needs_email = notification.kind.sends_email()
            && self.channels.iter().any(|c| c.needs_recipient_email());
        let user_id = notification.user_id;
        let delivery = Delivery::new(notification);
        if !needs_email {
            return delivery;
        }

        match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => delivery.with_recipient(user.email, user.full_name),
            Ok(None) => delivery,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "查询收件人失败，跳过邮件");
                delivery
            }
        }
    }

    /// 并行投递到所有渠道
    pub async fn deliver(&self, delivery: &Delivery) -> DeliveryReport {
        let start = Instant::now();

        let futures = self.channels.iter().map(|channel| async move {
            match channel.send(delivery).await {
                Ok(result) => result,
                Err(e) => {
                    error!(channel = channel.name(), error = %e, "渠道发送异常");
                    ChannelResult::failed(channel.channel_type(), e.to_string(), 0)
                }
            }
        });
        let channel_results = join_all(futures).await;

        DeliveryReport {
            notification_id: delivery.notification.id,
            channel_results,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn log_report(&self, report: &DeliveryReport) {
        if report.has_failures() {
            warn!(
                notification_id = %report.notification_id,
                success = report.count(SendStatus::Success),
                failed = report.count(SendStatus::Failed),
                duration_ms = report.duration_ms,
                "通知部分渠道投递失败"
            );
        } else {
            debug!(
                notification_id = %report.notification_id,
                success = report.count(SendStatus::Success),
                skipped = report.count(SendStatus::Skipped),
                duration_ms = report.duration_ms,
                "通知投递完成"
            );
        }
    }

    // ==================== 查询与已读 ====================

    pub async fn list(
        &self,
        user_id: Uuid,
        unread_only: bool,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Notification>> {
        let (items, total) = self.repo.list(user_id, unread_only, page, page_size).await?;
        Ok(Page::new(items, total, page, page_size))
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        self.repo.unread_count(user_id).await
    }

    pub async fn mark_read(&self, user_id: Uuid, id: Uuid) -> Result<()> {
        if self.repo.mark_read(user_id, id).await? {
            Ok(())
        } else {
            Err(MarketError::NotificationNotFound(id))
        }
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        self.repo.mark_all_read(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_user;
    use crate::models::{NotificationKind, UserRole};
    use crate::notification::channels::RealtimeChannel;
    use crate::notification::realtime::MockRealtimePublisher;
    use crate::repository::{MockNotificationRepositoryTrait, MockUserRepositoryTrait};
    use chrono::Utc;

    fn stored(new: &NewNotification) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            kind: new.kind,
            title: new.title.clone(),
            body: new.body.clone(),
            data: new.data.clone(),
            is_read: false,
            created_at: Utc::now(),
        }
    }

    fn new_notification(user_id: Uuid, kind: NotificationKind) -> NewNotification {
        NewNotification {
            user_id,
            kind,
            title: "Order accepted".to_string(),
            body: "Order AGR-1 was accepted".to_string(),
            data: serde_json::json!({ "orderNo": "AGR-1" }),
        }
    }

    #[tokio::test]
    async fn test_notify_persists_and_pushes() {
        let user_id = Uuid::new_v4();

        let mut repo = MockNotificationRepositoryTrait::new();
        repo.expect_create().times(1).returning(|n| Ok(stored(n)));

        // 不发邮件的类型不查询用户
        let mut users = MockUserRepositoryTrait::new();
        users.expect_find_by_id().never();

        let mut publisher = MockRealtimePublisher::new();
        publisher.expect_is_online().returning(|_| true);
        publisher.expect_publish().times(1).returning(|_, _| 1);

        let service = NotificationService::new(Arc::new(repo), Arc::new(users))
            .with_channel(Arc::new(RealtimeChannel::new(Arc::new(publisher))));

        let n = service
            .notify(new_notification(user_id, NotificationKind::OrderAccepted))
            .await
            .unwrap();
        assert_eq!(n.user_id, user_id);
        assert!(!n.is_read);
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_fail_notify() {
        let mut repo = MockNotificationRepositoryTrait::new();
        repo.expect_create().returning(|n| Ok(stored(n)));

        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_find_by_id()
            .returning(|_| Err(MarketError::Internal("db down".to_string())));

        let email = crate::notification::channels::EmailChannel::from_config(
            &agri_shared::config::ResendConfig {
                api_key: Some("re_test".to_string()),
                ..Default::default()
            },
        );
        let service =
            NotificationService::new(Arc::new(repo), Arc::new(users)).with_channel(Arc::new(email));

        // 查询收件人失败时跳过邮件，通知本身仍然成功
        let result = service
            .notify(new_notification(Uuid::new_v4(), NotificationKind::OrderPlaced))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_prepare_delivery_loads_recipient_for_email_kinds() {
        let farmer = sample_user(UserRole::Farmer);
        let farmer_id = farmer.id;

        let repo = MockNotificationRepositoryTrait::new();
        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_find_by_id()
            .times(1)
            .returning(move |_| Ok(Some(farmer.clone())));

        let email = crate::notification::channels::EmailChannel::from_config(
            &agri_shared::config::ResendConfig {
                api_key: Some("re_test".to_string()),
                ..Default::default()
            },
        );
        let service =
            NotificationService::new(Arc::new(repo), Arc::new(users)).with_channel(Arc::new(email));

        let new = new_notification(farmer_id, NotificationKind::OrderPlaced);
        let delivery = service.prepare_delivery(stored(&new)).await;
        assert_eq!(delivery.recipient_email.as_deref(), Some("farmer@farm.ng"));
        assert_eq!(delivery.recipient_name.as_deref(), Some("Ada Obi"));
    }

    #[tokio::test]
    async fn test_mark_read_missing_is_not_found() {
        let mut repo = MockNotificationRepositoryTrait::new();
        repo.expect_mark_read().returning(|_, _| Ok(false));
        let service =
            NotificationService::new(Arc::new(repo), Arc::new(MockUserRepositoryTrait::new()));

        let id = Uuid::new_v4();
        let err = service.mark_read(Uuid::new_v4(), id).await.unwrap_err();
        assert!(matches!(err, MarketError::NotificationNotFound(x) if x == id));
    }

    #[tokio::test]
    async fn test_list_builds_page() {
        let mut repo = MockNotificationRepositoryTrait::new();
        repo.expect_list()
            .withf(|_, unread, page, size| *unread && *page == 2 && *size == 10)
            .returning(|_, _, _, _| Ok((vec![], 25)));
        let service =
            NotificationService::new(Arc::new(repo), Arc::new(MockUserRepositoryTrait::new()));

        let page = service.list(Uuid::new_v4(), true, 2, 10).await.unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);
    }
}
