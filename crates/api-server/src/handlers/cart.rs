//! 购物车与结算 API 处理器

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;
use uuid::Uuid;

use agri_marketplace::dto::{
    AddToCartRequest, CartView, CheckoutRequest, CheckoutResult, UpdateCartItemRequest,
};
use agri_marketplace::models::CartItem;

use crate::{
    auth::CurrentUser,
    dto::{AffectedResponse, ApiResponse},
    error::Result,
    state::AppState,
};

/// 查看购物车（含实时报价与可结算状态）
///
/// GET /api/cart
pub async fn view_cart(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<CartView>>> {
    let cart = state.cart.view(user.id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// 加入购物车
///
/// POST /api/cart/items
pub async fn add_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<AddToCartRequest>,
) -> Result<Json<ApiResponse<CartItem>>> {
    let item = state.cart.add(user.id, req).await?;
    Ok(Json(ApiResponse::success(item)))
}

/// 修改数量
///
/// PATCH /api/cart/items/{id}
pub async fn update_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateCartItemRequest>,
) -> Result<Json<ApiResponse<CartItem>>> {
    let item = state.cart.update(user.id, id, req).await?;
    Ok(Json(ApiResponse::success(item)))
}

/// DELETE /api/cart/items/{id}
pub async fn remove_item(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>> {
    state.cart.remove(user.id, id).await?;
    Ok(Json(ApiResponse::<()>::success_empty()))
}

/// DELETE /api/cart
pub async fn clear_cart(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<AffectedResponse>>> {
    let affected = state.cart.clear(user.id).await?;
    Ok(Json(ApiResponse::success(AffectedResponse { affected })))
}

/// 结算
///
/// POST /api/checkout
///
/// 每个购物车条目生成一个订单，共用一笔支付，返回 Paystack 支付链接。
pub async fn checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<ApiResponse<CheckoutResult>>> {
    let result = state.checkout.checkout(user.id, req).await?;
    info!(
        buyer_id = %user.id,
        reference = %result.payment.reference,
        orders = result.orders.len(),
        "结算完成"
    );
    Ok(Json(ApiResponse::success(result)))
}
