//! 用户资料 API 处理器

use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use agri_marketplace::dto::UpdateProfileRequest;
use agri_marketplace::models::{User, UserSummary};

use crate::{auth::CurrentUser, dto::ApiResponse, error::Result, state::AppState};

/// 更新个人资料
///
/// PATCH /api/users/me
pub async fn update_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiResponse<User>>> {
    let profile = state.users.update_profile(user.id, req).await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// 用户公开摘要
///
/// GET /api/users/{id}
pub async fn get_user_summary(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<UserSummary>>> {
    let summary = state.users.summary(id).await?;
    Ok(Json(ApiResponse::success(summary)))
}
