//! 私信 API 处理器
//!
//! 新消息同时通过 WebSocket 推送给对方。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use agri_marketplace::dto::{SendMessageRequest, StartConversationRequest};
use agri_marketplace::models::{Conversation, ConversationSummary, Message};

use crate::{
    auth::CurrentUser,
    dto::{AffectedResponse, ApiResponse, PageResponse, PaginationParams},
    error::Result,
    state::AppState,
};

/// 发起（或复用）会话
///
/// POST /api/conversations
pub async fn start_conversation(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<StartConversationRequest>,
) -> Result<Json<ApiResponse<Conversation>>> {
    let conversation = state.messaging.start(user.id, req).await?;
    Ok(Json(ApiResponse::success(conversation)))
}

/// GET /api/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Vec<ConversationSummary>>>> {
    let conversations = state.messaging.conversations(user.id).await?;
    Ok(Json(ApiResponse::success(conversations)))
}

/// GET /api/conversations/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<Message>>>> {
    let result = state
        .messaging
        .messages(user.id, id, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// POST /api/conversations/{id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ApiResponse<Message>>> {
    let message = state.messaging.send(user.id, id, req).await?;
    Ok(Json(ApiResponse::success(message)))
}

/// 标记对方消息为已读
///
/// POST /api/conversations/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<AffectedResponse>>> {
    let affected = state.messaging.mark_read(user.id, id).await?;
    Ok(Json(ApiResponse::success(AffectedResponse { affected })))
}
