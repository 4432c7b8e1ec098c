//! 基础设施错误
//!
//! 数据库、Redis、加密与第三方接口（Paystack、Cloudinary、Resend）的失败都归入
//! `AgriError`；业务错误由 `MarketError` 包装它，HTTP 层再映射状态码。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgriError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("操作频率超限: {operation}")]
    RateLimitExceeded { operation: String },

    #[error("未授权访问")]
    Unauthorized,

    /// 第三方明确拒绝（4xx 或 `status: false`），重放结果相同
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    /// 超时、连接失败、5xx 与 429
    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    /// 缺少密钥时对应功能降级，接口返回 503
    #[error("外部服务未配置: {service}")]
    NotConfigured { service: String },

    #[error("加密错误: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, AgriError>;

impl AgriError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::NotConfigured { .. } => "SERVICE_NOT_CONFIGURED",
            Self::Crypto(_) => "CRYPTO_ERROR",
        }
    }

    /// 只有连接层面的瞬时故障值得重试；查询本身出错（约束冲突、行不存在）重放无意义
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Protocol(_)
            ),
            Self::Redis(e) => e.is_timeout() || e.is_connection_dropped(),
            Self::ExternalServiceTimeout { .. } => true,
            _ => false,
        }
    }

    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(service: impl Into<String>) -> Self {
        Self::ExternalServiceTimeout {
            service: service.into(),
        }
    }
}
