//! 交易市场领域错误类型
//!
//! 区分业务错误（可直接返回给调用方）和系统错误（需要脱敏）

use thiserror::Error;
use uuid::Uuid;

use crate::models::{OrderStatus, WithdrawalStatus};

#[derive(Debug, Error)]
pub enum MarketError {
    // === 用户 ===
    #[error("用户不存在: {0}")]
    UserNotFound(Uuid),

    #[error("邮箱已注册: {0}")]
    EmailTaken(String),

    #[error("账号或密码错误")]
    InvalidCredentials,

    #[error("账号已锁定，请 {minutes} 分钟后重试")]
    AccountLocked { minutes: i64 },

    #[error("账号已停用")]
    AccountSuspended,

    // === 商品与价格 ===
    #[error("商品不存在: {0}")]
    ListingNotFound(Uuid),

    #[error("商品当前不可购买: {0}")]
    ListingUnavailable(Uuid),

    #[error("阶梯价配置无效: {0}")]
    InvalidPricingTiers(String),

    #[error("库存不足: 需要 {requested}, 可用 {available}")]
    InsufficientStock { requested: String, available: String },

    #[error("低于最小起订量: 最少 {minimum}")]
    BelowMinimumOrder { minimum: String },

    #[error("不能购买自己发布的商品")]
    OwnListing,

    // === 购物车与订单 ===
    #[error("购物车为空")]
    EmptyCart,

    #[error("购物车中不存在该商品: {0}")]
    CartItemNotFound(Uuid),

    #[error("订单不存在: {0}")]
    OrderNotFound(String),

    #[error("订单状态不允许此操作: {from} -> {to}")]
    InvalidOrderTransition { from: OrderStatus, to: OrderStatus },

    #[error("订单尚未付款")]
    OrderNotPaid,

    // === 支付与钱包 ===
    #[error("支付记录不存在: {0}")]
    PaymentNotFound(String),

    #[error("支付金额不匹配: 预期 {expected}, 实际 {actual}")]
    PaymentAmountMismatch { expected: String, actual: String },

    #[error("回调签名无效")]
    InvalidWebhookSignature,

    #[error("钱包余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("提现金额低于最低限额 {minimum}")]
    BelowMinimumWithdrawal { minimum: String },

    #[error("提现申请不存在: {0}")]
    WithdrawalNotFound(Uuid),

    #[error("提现状态不允许此操作: {from} -> {to}")]
    InvalidWithdrawalTransition {
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },

    // === 认证、评价与消息 ===
    #[error("认证申请不存在: {0}")]
    VerificationNotFound(Uuid),

    #[error("已有处理中的认证申请")]
    VerificationInProgress,

    #[error("认证申请状态不允许此操作: {0}")]
    InvalidVerificationState(String),

    #[error("该订单已评价")]
    AlreadyReviewed,

    #[error("订单完成后才能评价")]
    ReviewNotAllowed,

    #[error("会话不存在: {0}")]
    ConversationNotFound(Uuid),

    #[error("通知不存在: {0}")]
    NotificationNotFound(Uuid),

    // === 通用 ===
    #[error("无权执行此操作: {0}")]
    Forbidden(String),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("外部服务未配置: {0}")]
    NotConfigured(&'static str),

    #[error("外部服务错误: {service} - {message}")]
    Upstream { service: String, message: String },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("基础设施错误: {0}")]
    Shared(#[from] agri_shared::error::AgriError),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MarketError>;

impl MarketError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Protocol(_)
            ),
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 业务错误的消息可以直接展示给用户
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Shared(_)
                | Self::Internal(_)
                | Self::Upstream { .. }
        )
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::EmailTaken(_) => "EMAIL_TAKEN",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::AccountSuspended => "ACCOUNT_SUSPENDED",
            Self::ListingNotFound(_) => "LISTING_NOT_FOUND",
            Self::ListingUnavailable(_) => "LISTING_UNAVAILABLE",
            Self::InvalidPricingTiers(_) => "INVALID_PRICING_TIERS",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::BelowMinimumOrder { .. } => "BELOW_MINIMUM_ORDER",
            Self::OwnListing => "OWN_LISTING",
            Self::EmptyCart => "EMPTY_CART",
            Self::CartItemNotFound(_) => "CART_ITEM_NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::InvalidOrderTransition { .. } => "INVALID_ORDER_TRANSITION",
            Self::OrderNotPaid => "ORDER_NOT_PAID",
            Self::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            Self::PaymentAmountMismatch { .. } => "PAYMENT_AMOUNT_MISMATCH",
            Self::InvalidWebhookSignature => "INVALID_SIGNATURE",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::BelowMinimumWithdrawal { .. } => "BELOW_MINIMUM_WITHDRAWAL",
            Self::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            Self::InvalidWithdrawalTransition { .. } => "INVALID_WITHDRAWAL_TRANSITION",
            Self::VerificationNotFound(_) => "VERIFICATION_NOT_FOUND",
            Self::VerificationInProgress => "VERIFICATION_IN_PROGRESS",
            Self::InvalidVerificationState(_) => "INVALID_VERIFICATION_STATE",
            Self::AlreadyReviewed => "ALREADY_REVIEWED",
            Self::ReviewNotAllowed => "REVIEW_NOT_ALLOWED",
            Self::ConversationNotFound(_) => "CONVERSATION_NOT_FOUND",
            Self::NotificationNotFound(_) => "NOTIFICATION_NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotConfigured(_) => "SERVICE_NOT_CONFIGURED",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Shared(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(MarketError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!MarketError::EmptyCart.is_retryable());
        assert!(!MarketError::InvalidWebhookSignature.is_retryable());
    }

    #[test]
    fn test_error_is_business_error() {
        assert!(MarketError::OwnListing.is_business_error());
        assert!(
            MarketError::InvalidOrderTransition {
                from: OrderStatus::Completed,
                to: OrderStatus::Cancelled,
            }
            .is_business_error()
        );
        assert!(!MarketError::Internal("boom".to_string()).is_business_error());
        assert!(
            !MarketError::Upstream {
                service: "paystack".to_string(),
                message: "502".to_string(),
            }
            .is_business_error()
        );
    }

    #[test]
    fn test_error_code_and_display() {
        let err = MarketError::InvalidOrderTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Delivered,
        };
        assert_eq!(err.error_code(), "INVALID_ORDER_TRANSITION");
        assert_eq!(err.to_string(), "订单状态不允许此操作: pending -> delivered");

        let err = MarketError::InsufficientStock {
            requested: "12".to_string(),
            available: "5".to_string(),
        };
        assert!(err.to_string().contains("12"));
        assert_eq!(
            MarketError::Shared(agri_shared::error::AgriError::Unauthorized).error_code(),
            "UNAUTHORIZED"
        );
    }
}
