//! 通知投递渠道
//!
//! - **Realtime**: 通过 WebSocket 推送 `new_notification`
//! - **Email**: 通过 Resend 发送事务邮件

mod email;
mod realtime;

pub use email::EmailChannel;
pub use realtime::RealtimeChannel;

use async_trait::async_trait;

use super::types::{ChannelResult, ChannelType, Delivery};
use crate::error::Result;

/// 投递失败通过 `ChannelResult::failed` 报告；Err 仅表示渠道内部异常
/// （例如序列化失败），由 NotificationService 记录后继续其余渠道。
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    fn name(&self) -> &str;

    /// 是否应投递这条通知，不可用时跳过
    async fn is_available(&self, delivery: &Delivery) -> bool;

    async fn send(&self, delivery: &Delivery) -> Result<ChannelResult>;

    /// 是否需要收件人邮箱
    fn needs_recipient_email(&self) -> bool {
        false
    }
}
