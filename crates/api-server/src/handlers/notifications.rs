//! 站内通知 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use agri_marketplace::models::Notification;
use agri_marketplace::service::normalize_page;

use crate::{
    auth::CurrentUser,
    dto::{
        AffectedResponse, ApiResponse, CountResponse, NotificationQuery, PageResponse,
        PaginationParams,
    },
    error::Result,
    state::AppState,
};

/// GET /api/notifications?unreadOnly=
pub async fn list_notifications(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(page): Query<PaginationParams>,
    Query(filter): Query<NotificationQuery>,
) -> Result<Json<ApiResponse<PageResponse<Notification>>>> {
    let (page, page_size) = normalize_page(page.page, page.page_size);
    let result = state
        .notifications
        .list(user.id, filter.unread_only, page, page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<CountResponse>>> {
    let count = state.notifications.unread_count(user.id).await?;
    Ok(Json(ApiResponse::success(CountResponse { count })))
}

/// POST /api/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>> {
    state.notifications.mark_read(user.id, id).await?;
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// POST /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<AffectedResponse>>> {
    let affected = state.notifications.mark_all_read(user.id).await?;
    Ok(Json(ApiResponse::success(AffectedResponse { affected })))
}
