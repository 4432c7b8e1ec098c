//! 通知模块
//!
//! - 站内通知落库，在线用户通过 WebSocket 收到 `new_notification`
//! - 订单、付款、认证、提现等关键事件同时发送邮件（Resend，可选）
//! - 投递失败不影响业务流程

pub mod channels;
pub mod realtime;
pub mod service;
pub mod types;

pub use channels::{EmailChannel, NotificationChannel, RealtimeChannel};
pub use realtime::{NoopPublisher, OrderUpdate, RealtimeEvent, RealtimePublisher, TypingEvent};
pub use service::NotificationService;
pub use types::{
    ChannelResult, ChannelType, Delivery, DeliveryReport, NotificationBuilder, SendStatus,
};
