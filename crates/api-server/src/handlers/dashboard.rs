//! 仪表盘 API 处理器

use axum::{Json, extract::State};

use agri_marketplace::service::analytics_service::Dashboard;

use crate::{auth::CurrentUser, dto::ApiResponse, error::Result, state::AppState};

/// 按角色返回对应的统计数据
///
/// GET /api/dashboard
pub async fn dashboard(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Dashboard>>> {
    let dashboard = state.analytics.dashboard(user.id, user.role).await?;
    Ok(Json(ApiResponse::success(dashboard)))
}
