//! 钱包与提现 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;

use agri_marketplace::dto::{ReviewWithdrawalRequest, WithdrawalRequest, WithdrawalView};
use agri_marketplace::models::{Wallet, WalletTransaction, WithdrawalStatus};

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, PageResponse, PaginationParams, StatusQuery, WithdrawalQuery},
    error::Result,
    state::AppState,
};

/// GET /api/wallet
pub async fn get_wallet(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Wallet>>> {
    let wallet = state.wallet.balance(user.id).await?;
    Ok(Json(ApiResponse::success(wallet)))
}

/// 钱包流水
///
/// GET /api/wallet/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(page): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<WalletTransaction>>>> {
    let result = state
        .wallet
        .transactions(user.id, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// 申请提现，金额立即从余额冻结
///
/// POST /api/wallet/withdrawals
pub async fn request_withdrawal(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<WithdrawalRequest>,
) -> Result<Json<ApiResponse<WithdrawalView>>> {
    let view = state
        .wallet
        .request_withdrawal(user.id, user.role, req)
        .await?;
    info!(withdrawal_id = %view.id, user_id = %user.id, amount = %view.amount, "提现申请已提交");
    Ok(Json(ApiResponse::success(view)))
}

/// 自己的提现记录
///
/// GET /api/wallet/withdrawals?status=
pub async fn my_withdrawals(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(page): Query<PaginationParams>,
    Query(filter): Query<StatusQuery<WithdrawalStatus>>,
) -> Result<Json<ApiResponse<PageResponse<WithdrawalView>>>> {
    let result = state
        .wallet
        .list_withdrawals(Some(user.id), filter.status, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// GET /api/wallet/withdrawals/{id}
pub async fn get_withdrawal(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WithdrawalView>>> {
    let view = state.wallet.get_withdrawal(id, user.id, user.role).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// 管理端提现列表
///
/// GET /api/admin/withdrawals?status=&userId=
pub async fn admin_list_withdrawals(
    State(state): State<AppState>,
    Query(page): Query<PaginationParams>,
    Query(filter): Query<WithdrawalQuery>,
) -> Result<Json<ApiResponse<PageResponse<WithdrawalView>>>> {
    let result = state
        .wallet
        .list_withdrawals(filter.user_id, filter.status, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// 审核提现：通过后发起转账，驳回则退回余额
///
/// POST /api/admin/withdrawals/{id}/review
pub async fn review_withdrawal(
    State(state): State<AppState>,
    admin: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewWithdrawalRequest>,
) -> Result<Json<ApiResponse<WithdrawalView>>> {
    let view = state.wallet.review(admin.id, id, req).await?;
    info!(withdrawal_id = %id, admin_id = %admin.id, status = %view.status, "提现已审核");
    Ok(Json(ApiResponse::success(view)))
}

/// 向 Paystack 核对 approved 提现的转账结果
///
/// POST /api/admin/withdrawals/{id}/reconcile
pub async fn reconcile_withdrawal(
    State(state): State<AppState>,
    admin: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WithdrawalView>>> {
    let view = state.wallet.reconcile_transfer(id).await?;
    info!(withdrawal_id = %id, admin_id = %admin.id, status = %view.status, "提现转账已核对");
    Ok(Json(ApiResponse::success(view)))
}
