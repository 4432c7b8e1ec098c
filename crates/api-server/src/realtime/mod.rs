//! WebSocket 实时推送
//!
//! `RealtimeHub` 实现业务层的 `RealtimePublisher`，`ws_handler` 负责连接生命周期。
//! 连接表在进程内维护，不做跨实例广播。

mod hub;
mod ws;

pub use hub::{RealtimeHub, Registration};
pub use ws::ws_handler;
