//! `/ws` 连接处理
//!
//! 服务端每 30 秒发送 Ping，90 秒内未收到任何帧的连接会被关闭。
//! 客户端可发送 `typing` 与 `ping` 两种事件。

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agri_marketplace::MarketError;
use agri_shared::error::AgriError;

use super::hub::Registration;
use crate::auth::{AuthMethod, CurrentUser};
use crate::error::{ApiError, Result};
use crate::middleware::authenticate;
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// 客户端帧：`{ "event": "...", "data": {...} }`
#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingPayload {
    #[serde(alias = "conversation_id")]
    conversation_id: Uuid,
    /// 接收方由会话决定，字段仅为兼容旧客户端
    #[serde(default, alias = "recipient_id")]
    #[allow(dead_code)]
    recipient_id: Option<Uuid>,
    #[serde(alias = "is_typing")]
    is_typing: bool,
}

/// GET /ws
///
/// 会话 Cookie 已由认证中间件解析；非浏览器客户端可通过 `?token=` 传入 Token。
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    current: Option<CurrentUser>,
    upgrade: WebSocketUpgrade,
) -> Result<Response> {
    let user = match (current, query.token) {
        (Some(user), _) => user,
        (None, Some(token)) => authenticate(&state, &token, AuthMethod::Bearer).await?,
        (None, None) => return Err(ApiError::Unauthorized("缺少认证 Token".to_string())),
    };

    if !state.hub.can_accept(user.id) {
        return Err(ApiError::Market(MarketError::Shared(
            AgriError::RateLimitExceeded {
                operation: "websocket".to_string(),
            },
        )));
    }

    Ok(upgrade.on_upgrade(move |socket| run_connection(state, user, socket)))
}

async fn run_connection(state: AppState, user: CurrentUser, socket: WebSocket) {
    let Some(Registration {
        connection_id,
        mut receiver,
    }) = state.hub.register(user.id)
    else {
        let mut socket = socket;
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    info!(user_id = %user.id, connection_id, "WebSocket 已连接");

    let (mut sender, mut incoming) = socket.split();
    let mut heartbeat = tokio::time::interval(PING_INTERVAL);
    heartbeat.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            outbound = receiver.recv() => {
                let Some(payload) = outbound else { break };
                if sender.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            inbound = incoming.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        if let Some(reply) = handle_client_frame(&state, &user, text.as_str()).await
                            && sender.send(Message::Text(reply.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => {
                        debug!(user_id = %user.id, error = %e, "WebSocket 读取失败");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= IDLE_TIMEOUT {
                    info!(user_id = %user.id, connection_id, "WebSocket 心跳超时，关闭连接");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unregister(user.id, connection_id);
    info!(user_id = %user.id, connection_id, "WebSocket 已断开");
}

/// 处理客户端事件，需要回复时返回回复内容
async fn handle_client_frame(state: &AppState, user: &CurrentUser, text: &str) -> Option<String> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(user_id = %user.id, error = %e, "无法解析客户端帧");
            return Some(error_frame("无法解析的消息"));
        }
    };

    match frame.event.as_str() {
        "ping" => Some(serde_json::json!({ "event": "pong", "data": null }).to_string()),
        "typing" => {
            let payload: TypingPayload = match serde_json::from_value(frame.data) {
                Ok(payload) => payload,
                Err(_) => return Some(error_frame("typing 参数无效")),
            };
            match state
                .messaging
                .typing(user.id, payload.conversation_id, payload.is_typing)
                .await
            {
                Ok(_) => None,
                Err(e) => {
                    warn!(user_id = %user.id, error = %e, "转发输入状态失败");
                    Some(error_frame(&e.to_string()))
                }
            }
        }
        other => Some(error_frame(&format!("不支持的事件: {other}"))),
    }
}

fn error_frame(message: &str) -> String {
    serde_json::json!({ "event": "error", "data": { "message": message } }).to_string()
}
