//! 管理端 API 处理器
//!
//! 用户管理、员工账号与审计日志。提现审核见 `wallet` 模块。

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::{info, warn};
use uuid::Uuid;

use agri_marketplace::dto::{CreateStaffRequest, SetUserStatusRequest};
use agri_marketplace::models::{AuditLog, User, UserStatus};
use agri_shared::cache::CacheKey;

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, AuditQuery, PageResponse, PaginationParams, UserQuery},
    error::Result,
    state::AppState,
};

/// GET /api/admin/users?role=&status=&q=
pub async fn list_users(
    State(state): State<AppState>,
    Query(page): Query<PaginationParams>,
    Query(query): Query<UserQuery>,
) -> Result<Json<ApiResponse<PageResponse<User>>>> {
    let result = state.users.list(query.into_filter(page)).await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// 创建农技员或管理员账号
///
/// POST /api/admin/users
pub async fn create_staff(
    State(state): State<AppState>,
    admin: CurrentUser,
    Json(req): Json<CreateStaffRequest>,
) -> Result<Json<ApiResponse<User>>> {
    let user = state.users.create_staff(req).await?;
    info!(user_id = %user.id, role = %user.role, admin_id = %admin.id, "员工账号已创建");
    Ok(Json(ApiResponse::success(user)))
}

/// 停用或恢复账号
///
/// PATCH /api/admin/users/{id}/status
///
/// 停用后该用户现有会话在下一次请求时失效。
pub async fn set_user_status(
    State(state): State<AppState>,
    admin: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SetUserStatusRequest>,
) -> Result<Json<ApiResponse<User>>> {
    let user = state.users.set_status(admin.id, id, req.status).await?;

    let key = CacheKey::suspended_user(&id.to_string());
    let synced = match user.status {
        UserStatus::Suspended => {
            let ttl = Duration::from_secs(state.config.auth.session_ttl_seconds.max(1) as u64);
            state.cache.set(&key, &true, ttl).await
        }
        _ => state.cache.delete(&key).await,
    };
    if let Err(e) = synced {
        warn!(user_id = %id, error = %e, "同步账号停用状态到缓存失败");
    }

    info!(user_id = %id, status = %user.status, admin_id = %admin.id, "账号状态已变更");
    Ok(Json(ApiResponse::success(user)))
}

/// GET /api/admin/audit-logs?actorId=&module=
pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(page): Query<PaginationParams>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<ApiResponse<PageResponse<AuditLog>>>> {
    let result = state
        .admin
        .list_audit_logs(query.actor_id, query.module, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}
