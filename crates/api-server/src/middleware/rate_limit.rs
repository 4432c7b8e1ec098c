//! 分级限流中间件
//!
//! 基于 Redis 固定窗口计数器，按接口类型分级：
//! - 认证接口（登录、注册、改密）: 最严格，默认 10 req/min，按客户端 IP 计数
//! - 写操作（POST/PUT/PATCH/DELETE）: 默认 100 req/min
//! - 读操作（GET）: 默认 500 req/min
//!
//! 已登录请求按用户 ID 计数，匿名请求按客户端 IP 计数；另有全局配额防止整体过载。

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use agri_marketplace::MarketError;
use agri_shared::cache::{Cache, CacheKey};
use agri_shared::error::AgriError;

use super::audit::client_ip;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
struct RateLimit {
    /// 时间窗口内允许的最大请求数
    max_requests: i64,
    /// 时间窗口（秒）
    window_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateTier {
    Auth,
    Write,
    Read,
}

impl RateTier {
    fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    auth: RateLimit,
    write: RateLimit,
    read: RateLimit,
    /// 全局配额 = 单主体配额 * 此倍数
    global_multiplier: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth: RateLimit {
                max_requests: 10,
                window_secs: 60,
            },
            write: RateLimit {
                max_requests: 100,
                window_secs: 60,
            },
            read: RateLimit {
                max_requests: 500,
                window_secs: 60,
            },
            global_multiplier: 50,
        }
    }
}

impl RateLimitConfig {
    fn limit_for(&self, tier: RateTier) -> RateLimit {
        match tier {
            RateTier::Auth => self.auth,
            RateTier::Write => self.write,
            RateTier::Read => self.read,
        }
    }
}

/// 限流中间件
///
/// 放在认证中间件之后、审计中间件之前。
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_exempt_path(&path) {
        return next.run(request).await;
    }

    let config = RateLimitConfig::default();
    let tier = classify(&path, request.method());
    let limit = config.limit_for(tier);
    let subject = rate_subject(&request, tier);

    let window = window_key(limit.window_secs);
    let subject_key = CacheKey::rate_window(tier.as_str(), &format!("{subject}:{window}"));
    match check_rate_limit(&state.cache, &subject_key, limit.max_requests, limit.window_secs).await
    {
        Ok(remaining) if remaining < 0 => {
            warn!(subject = %subject, path = %path, tier = tier.as_str(), "限流触发");
            return too_many_requests(limit.window_secs);
        }
        Err(e) => warn!(error = %e, "Redis 限流检查失败，跳过限流"),
        _ => {}
    }

    let global_key = CacheKey::rate_window(tier.as_str(), &format!("global:{window}"));
    let global_limit = limit.max_requests * config.global_multiplier;
    match check_rate_limit(&state.cache, &global_key, global_limit, limit.window_secs).await {
        Ok(remaining) if remaining < 0 => {
            warn!(path = %path, tier = tier.as_str(), "全局限流触发");
            return too_many_requests(limit.window_secs);
        }
        Err(e) => warn!(error = %e, "Redis 全局限流检查失败，跳过限流"),
        _ => {}
    }

    next.run(request).await
}

/// 返回剩余配额（负数表示已超限）
async fn check_rate_limit(
    cache: &Arc<Cache>,
    key: &str,
    max_requests: i64,
    window_secs: u64,
) -> Result<i64, AgriError> {
    let count = cache
        .incr_window(key, std::time::Duration::from_secs(window_secs))
        .await?;
    Ok(max_requests - count)
}

/// 认证接口始终按 IP 计数，防止换号爆破
fn rate_subject(request: &Request<Body>, tier: RateTier) -> String {
    let ip = || {
        client_ip(request.headers())
            .map(|ip| format!("ip:{ip}"))
            .unwrap_or_else(|| "ip:unknown".to_string())
    };
    if tier == RateTier::Auth {
        return ip();
    }
    request
        .extensions()
        .get::<CurrentUser>()
        .map(|user| format!("user:{}", user.id))
        .unwrap_or_else(ip)
}

fn classify(path: &str, method: &Method) -> RateTier {
    if matches!(
        path,
        "/api/auth/login" | "/api/auth/register" | "/api/auth/change-password"
    ) {
        return RateTier::Auth;
    }
    match *method {
        Method::GET | Method::HEAD | Method::OPTIONS => RateTier::Read,
        _ => RateTier::Write,
    }
}

/// 以窗口大小对齐的 Unix 时间戳
fn window_key(window_secs: u64) -> u64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now / window_secs
}

/// 探针、支付回调与 WebSocket 握手不限流
fn is_exempt_path(path: &str) -> bool {
    matches!(
        path,
        "/health" | "/ready" | "/metrics" | "/ws" | "/api/payments/paystack/webhook"
    )
}

fn too_many_requests(window_secs: u64) -> Response {
    let mut response = ApiError::Market(MarketError::Shared(AgriError::RateLimitExceeded {
        operation: "api".to_string(),
    }))
    .into_response();
    if let Ok(value) = HeaderValue::from_str(&window_secs.to_string()) {
        response.headers_mut().insert("Retry-After", value);
    }
    response
}
