//! HTTP 层错误类型定义
//!
//! 业务错误由 `MarketError` 透传，这里只负责映射状态码并脱敏系统错误

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use agri_marketplace::MarketError;
use agri_shared::error::AgriError;

const GENERIC_MESSAGE: &str = "服务内部错误，请稍后重试";

/// HTTP 层错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // 认证错误
    #[error("未授权: {0}")]
    Unauthorized(String),
    #[error("禁止访问: {0}")]
    Forbidden(String),
    #[error("CSRF Token 缺失或不匹配")]
    CsrfMismatch,

    #[error("参数验证失败: {0}")]
    Validation(String),
    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error(transparent)]
    Market(#[from] MarketError),

    // 系统错误
    #[error("Redis错误: {0}")]
    Redis(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::CsrfMismatch => StatusCode::FORBIDDEN,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Market(e) => market_status(e),
            Self::Redis(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::CsrfMismatch => "CSRF_MISMATCH",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Market(e) => e.error_code(),
            Self::Redis(_) => "REDIS_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 对外展示的消息，系统错误只返回通用提示
    fn public_message(&self) -> String {
        match self {
            Self::Redis(e) => {
                tracing::error!(error = %e, "Redis 操作失败");
                GENERIC_MESSAGE.to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                GENERIC_MESSAGE.to_string()
            }
            Self::Market(MarketError::Upstream { service, message }) => {
                tracing::error!(service = %service, error = %message, "外部服务调用失败");
                "外部服务暂不可用，请稍后重试".to_string()
            }
            Self::Market(e) if !e.is_business_error() => {
                tracing::error!(error = %e, code = e.error_code(), "系统错误");
                GENERIC_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }
}

fn market_status(err: &MarketError) -> StatusCode {
    use MarketError::*;
    match err {
        UserNotFound(_)
        | ListingNotFound(_)
        | CartItemNotFound(_)
        | OrderNotFound(_)
        | PaymentNotFound(_)
        | WithdrawalNotFound(_)
        | VerificationNotFound(_)
        | ConversationNotFound(_)
        | NotificationNotFound(_) => StatusCode::NOT_FOUND,

        InvalidCredentials | InvalidWebhookSignature => StatusCode::UNAUTHORIZED,
        AccountLocked { .. } | AccountSuspended | Forbidden(_) => StatusCode::FORBIDDEN,

        Validation(_)
        | InvalidPricingTiers(_)
        | BelowMinimumOrder { .. }
        | BelowMinimumWithdrawal { .. }
        | EmptyCart
        | OwnListing => StatusCode::BAD_REQUEST,

        EmailTaken(_)
        | ListingUnavailable(_)
        | InsufficientStock { .. }
        | InvalidOrderTransition { .. }
        | OrderNotPaid
        | PaymentAmountMismatch { .. }
        | InsufficientBalance { .. }
        | InvalidWithdrawalTransition { .. }
        | VerificationInProgress
        | InvalidVerificationState(_)
        | AlreadyReviewed
        | ReviewNotAllowed => StatusCode::CONFLICT,

        NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        Upstream { .. } => StatusCode::BAD_GATEWAY,

        Shared(AgriError::Unauthorized) => StatusCode::UNAUTHORIZED,
        Shared(AgriError::RateLimitExceeded { .. }) => StatusCode::TOO_MANY_REQUESTS,
        Shared(AgriError::NotConfigured { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        Database(_) | Serialization(_) | Shared(_) | Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.public_message();

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<AgriError> for ApiError {
    fn from(err: AgriError) -> Self {
        match err {
            AgriError::Redis(e) => Self::Redis(e.to_string()),
            other => Self::Market(MarketError::Shared(other)),
        }
    }
}

/// HTTP 层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use agri_marketplace::models::OrderStatus;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_market_status_mapping() {
        assert_eq!(
            ApiError::from(MarketError::ListingNotFound(uuid::Uuid::nil())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(MarketError::InvalidOrderTransition {
                from: OrderStatus::Completed,
                to: OrderStatus::Cancelled,
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(MarketError::AccountLocked { minutes: 30 }).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(MarketError::NotConfigured("cloudinary")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(MarketError::InvalidWebhookSignature).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::CsrfMismatch.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_business_error_keeps_message() {
        let response = ApiError::from(MarketError::OrderNotPaid).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "ORDER_NOT_PAID");
        assert_eq!(body["message"], "订单尚未付款");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_system_error_is_masked() {
        let response =
            ApiError::from(MarketError::Database(sqlx::Error::PoolTimedOut)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["code"], "DATABASE_ERROR");
        assert_eq!(body["message"], GENERIC_MESSAGE);

        let response = ApiError::from(MarketError::Upstream {
            service: "paystack".to_string(),
            message: "secret body".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert!(!body["message"].as_str().unwrap().contains("secret"));
    }
}
