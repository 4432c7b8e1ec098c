//! 双提交 CSRF 校验
//!
//! Cookie 认证的写请求必须携带 `X-CSRF-Token`，值与会话中的 `csrf` 一致。
//! Bearer 认证的请求不会被浏览器自动附带凭证，无需校验。

use axum::{
    body::Body,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use agri_shared::crypto::constant_time_eq;

use crate::auth::{AuthMethod, CurrentUser};
use crate::error::ApiError;

pub const CSRF_HEADER: &str = "x-csrf-token";

/// 放在认证中间件之后
pub async fn csrf_middleware(request: Request<Body>, next: Next) -> Response {
    if !requires_check(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let Some(user) = request.extensions().get::<CurrentUser>() else {
        return next.run(request).await;
    };
    if user.method != AuthMethod::Cookie {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok());
    if !provided.is_some_and(|token| constant_time_eq(token, &user.csrf)) {
        warn!(
            user_id = %user.id,
            path = %request.uri().path(),
            present = provided.is_some(),
            "CSRF 校验失败"
        );
        return ApiError::CsrfMismatch.into_response();
    }

    next.run(request).await
}

fn requires_check(method: &Method, path: &str) -> bool {
    let mutating = matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    mutating && !is_exempt_path(path)
}

/// 回调与登录注册不依赖现有会话
fn is_exempt_path(path: &str) -> bool {
    matches!(
        path,
        "/api/payments/paystack/webhook" | "/api/auth/login" | "/api/auth/register"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_mutating_methods_checked() {
        assert!(requires_check(&Method::POST, "/api/cart/items"));
        assert!(requires_check(&Method::DELETE, "/api/cart"));
        assert!(requires_check(&Method::PATCH, "/api/listings/1"));
        assert!(!requires_check(&Method::GET, "/api/cart"));
        assert!(!requires_check(&Method::HEAD, "/api/cart"));
    }

    #[test]
    fn test_exempt_paths() {
        assert!(!requires_check(&Method::POST, "/api/payments/paystack/webhook"));
        assert!(!requires_check(&Method::POST, "/api/auth/login"));
        assert!(!requires_check(&Method::POST, "/api/auth/register"));
        assert!(requires_check(&Method::POST, "/api/auth/logout"));
    }
}
