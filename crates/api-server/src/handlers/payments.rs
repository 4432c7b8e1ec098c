//! 支付 API 处理器
//!
//! Paystack 回调、主动核验与支付详情

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use tracing::info;

use agri_marketplace::dto::PaymentDetail;

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, PaymentLinkResponse, WebhookAck},
    error::Result,
    state::AppState,
};

pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Paystack 回调
///
/// POST /api/payments/paystack/webhook
///
/// 签名基于原始请求体计算，因此不能先反序列化。重复事件返回 200，避免网关重试。
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<WebhookAck>>> {
    let signature = headers
        .get(PAYSTACK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.payments.handle_webhook(&body, signature).await?;
    info!(outcome = outcome.as_str(), bytes = body.len(), "Paystack 回调已处理");

    Ok(Json(ApiResponse::success(WebhookAck {
        outcome: outcome.as_str(),
    })))
}

/// 买家主动核验支付（回调延迟时）
///
/// GET /api/payments/verify/{reference}
pub async fn verify_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<PaymentDetail>>> {
    let detail = state.payments.verify_reference(user.id, &reference).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// 支付详情（买家、相关农户、管理员）
///
/// GET /api/payments/{reference}
pub async fn get_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<PaymentDetail>>> {
    let detail = state
        .payments
        .payment_detail(&reference, user.id, user.role)
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// 获取（或重新生成）待支付订单的支付链接
///
/// POST /api/payments/{reference}/pay
pub async fn payment_link(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<PaymentLinkResponse>>> {
    let authorization_url = state.checkout.payment_link(user.id, &reference).await?;
    Ok(Json(ApiResponse::success(PaymentLinkResponse {
        reference,
        authorization_url,
    })))
}
