//! 农户实地认证 API 处理器
//!
//! 农户提交申请；农技员领取并审核；管理员可直接审核。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;

use agri_marketplace::dto::{SubmitVerificationRequest, VerificationDecisionRequest};
use agri_marketplace::models::{Verification, VerificationStatus, VerificationView};

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, PageResponse, PaginationParams, StatusQuery},
    error::Result,
    state::AppState,
};

/// 提交认证申请
///
/// POST /api/verifications
pub async fn submit(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<SubmitVerificationRequest>,
) -> Result<Json<ApiResponse<Verification>>> {
    let verification = state.verification.submit(user.id, req).await?;
    info!(verification_id = %verification.id, farmer_id = %user.id, "认证申请已提交");
    Ok(Json(ApiResponse::success(verification)))
}

/// 最近一次申请，没有时返回 null
///
/// GET /api/verifications/me
pub async fn my_latest(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Option<Verification>>>> {
    let latest = state.verification.latest_for_farmer(user.id).await?;
    Ok(Json(ApiResponse::success(latest)))
}

/// 审核队列
///
/// GET /api/verifications?status=
pub async fn queue(
    State(state): State<AppState>,
    Query(page): Query<PaginationParams>,
    Query(filter): Query<StatusQuery<VerificationStatus>>,
) -> Result<Json<ApiResponse<PageResponse<VerificationView>>>> {
    let result = state
        .verification
        .queue(filter.status, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// GET /api/verifications/{id}
pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<VerificationView>>> {
    let view = state.verification.detail(id).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// 农技员领取申请
///
/// POST /api/verifications/{id}/claim
pub async fn claim(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Verification>>> {
    let verification = state.verification.claim(user.id, id).await?;
    info!(verification_id = %id, officer_id = %user.id, "认证申请已领取");
    Ok(Json(ApiResponse::success(verification)))
}

/// 审核结论
///
/// POST /api/verifications/{id}/decision
pub async fn decide(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<VerificationDecisionRequest>,
) -> Result<Json<ApiResponse<Verification>>> {
    let approve = req.approve;
    let verification = state
        .verification
        .decide(user.id, user.role, id, req)
        .await?;
    info!(verification_id = %id, reviewer_id = %user.id, approve, "认证审核完成");
    Ok(Json(ApiResponse::success(verification)))
}
