//! WebSocket 实时推送渠道

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::{ChannelResult, NotificationChannel};
use crate::error::Result;
use crate::notification::realtime::{RealtimeEvent, RealtimePublisher};
use crate::notification::types::{ChannelType, Delivery};

pub struct RealtimeChannel {
    publisher: Arc<dyn RealtimePublisher>,
}

impl RealtimeChannel {
    pub fn new(publisher: Arc<dyn RealtimePublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl NotificationChannel for RealtimeChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Realtime
    }

    fn name(&self) -> &str {
        "Realtime"
    }

    async fn is_available(&self, delivery: &Delivery) -> bool {
        self.publisher.is_online(delivery.user_id())
    }

    async fn send(&self, delivery: &Delivery) -> Result<ChannelResult> {
        let start = Instant::now();

        if !self.is_available(delivery).await {
            return Ok(ChannelResult::skipped(self.channel_type(), "用户不在线"));
        }

        let event = RealtimeEvent::NewNotification(delivery.notification.clone());
        let delivered = self.publisher.publish(delivery.user_id(), &event);
        debug!(
            notification_id = %delivery.notification.id,
            sockets = delivered,
            "实时通知已推送"
        );

        if delivered == 0 {
            // 检查在线与推送之间连接已断开
            return Ok(ChannelResult::skipped(self.channel_type(), "连接已断开"));
        }

        Ok(ChannelResult::success(
            self.channel_type(),
            None,
            start.elapsed().as_millis() as u64,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Notification, NotificationKind};
    use crate::notification::realtime::MockRealtimePublisher;
    use crate::notification::types::SendStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn delivery(user_id: Uuid) -> Delivery {
        Delivery::new(Notification {
            id: Uuid::new_v4(),
            user_id,
            kind: NotificationKind::OrderAccepted,
            title: "Order accepted".to_string(),
            body: "Order AGR-1 was accepted".to_string(),
            data: serde_json::json!({}),
            is_read: false,
            created_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_pushes_to_online_user() {
        let user = Uuid::new_v4();
        let mut publisher = MockRealtimePublisher::new();
        publisher.expect_is_online().returning(|_| true);
        publisher
            .expect_publish()
            .withf(move |id, event| *id == user && event.name() == "new_notification")
            .times(1)
            .returning(|_, _| 2);

        let channel = RealtimeChannel::new(Arc::new(publisher));
        let result = channel.send(&delivery(user)).await.unwrap();
        assert_eq!(result.status, SendStatus::Success);
    }

    #[tokio::test]
    async fn test_skips_offline_user() {
        let mut publisher = MockRealtimePublisher::new();
        publisher.expect_is_online().returning(|_| false);
        publisher.expect_publish().never();

        let channel = RealtimeChannel::new(Arc::new(publisher));
        let result = channel.send(&delivery(Uuid::new_v4())).await.unwrap();
        assert_eq!(result.status, SendStatus::Skipped);
    }
}
