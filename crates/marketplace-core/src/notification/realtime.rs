//! 实时推送接口
//!
//! 业务层只依赖 `RealtimePublisher`，WebSocket 连接管理在 HTTP 层实现。

use serde::Serialize;
use uuid::Uuid;

use crate::models::{Message, Notification, OrderStatus};

/// 服务端推送事件，序列化为 `{ "event": "...", "data": {...} }`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    NewNotification(Notification),
    NewMessage(Message),
    Typing(TypingEvent),
    OrderUpdated(OrderUpdate),
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewNotification(_) => "new_notification",
            Self::NewMessage(_) => "new_message",
            Self::Typing(_) => "typing",
            Self::OrderUpdated(_) => "order_updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order_id: Uuid,
    pub order_no: String,
    pub status: OrderStatus,
}

/// 按用户推送事件
#[cfg_attr(test, mockall::automock)]
pub trait RealtimePublisher: Send + Sync {
    /// 返回送达的连接数，用户不在线时为 0
    fn publish(&self, user_id: Uuid, event: &RealtimeEvent) -> usize;

    fn is_online(&self, user_id: Uuid) -> bool;
}

/// 未启用实时推送时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl RealtimePublisher for NoopPublisher {
    fn publish(&self, _user_id: Uuid, _event: &RealtimeEvent) -> usize {
        0
    }

    fn is_online(&self, _user_id: Uuid) -> bool {
        false
    }
}
