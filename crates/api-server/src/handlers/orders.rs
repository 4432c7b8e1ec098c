//! 订单 API 处理器
//!
//! 农户与买家查看各自的订单，并按角色推进状态。

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use agri_marketplace::dto::CancelOrderRequest;
use agri_marketplace::models::{Order, OrderStatus, OrderView};
use agri_marketplace::order_flow::OrderAction;

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, PageResponse, PaginationParams, StatusQuery},
    error::{ApiError, Result},
    state::AppState,
};

/// 订单列表：农户看销售单，买家看购买单，管理员看全部
///
/// GET /api/orders?status=
pub async fn list_orders(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(page): Query<PaginationParams>,
    Query(filter): Query<StatusQuery<OrderStatus>>,
) -> Result<Json<ApiResponse<PageResponse<OrderView>>>> {
    let result = state
        .orders
        .list(user.id, user.role, filter.status, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderView>>> {
    let view = state.orders.detail(id, user.id, user.role).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// 推进订单状态
///
/// POST /api/orders/{id}/{action}
///
/// action 为 accept、reject、deliver、confirm、cancel 之一；
/// reject 与 cancel 可在请求体中附带 `{"reason": "..."}`。
pub async fn transition_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, action)): Path<(Uuid, String)>,
    body: Bytes,
) -> Result<Json<ApiResponse<Order>>> {
    let action = parse_user_action(&action)?;
    let reason = parse_reason(&body)?;

    let order = state
        .orders
        .transition(id, action, user.actor(), reason)
        .await?;

    info!(
        order_id = %id,
        order_no = %order.order_no,
        action = action.as_str(),
        status = %order.status,
        "订单状态已更新"
    );
    Ok(Json(ApiResponse::success(order)))
}

/// 系统动作（自动完成、超时取消）不对外开放
fn parse_user_action(action: &str) -> Result<OrderAction> {
    match action {
        "accept" => Ok(OrderAction::Accept),
        "reject" => Ok(OrderAction::Reject),
        "deliver" => Ok(OrderAction::Deliver),
        "confirm" => Ok(OrderAction::Confirm),
        "cancel" => Ok(OrderAction::Cancel),
        other => Err(ApiError::NotFound(format!("不支持的订单操作: {other}"))),
    }
}

fn parse_reason(body: &Bytes) -> Result<Option<String>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let req: CancelOrderRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::Validation(format!("请求体格式错误: {e}")))?;
    req.validate()?;
    Ok(req
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty()))
}
