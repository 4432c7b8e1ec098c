//! 会话认证中间件
//!
//! 依次从 `Authorization: Bearer` 与会话 Cookie 中提取 Token，验证后将
//! `CurrentUser` 注入请求扩展。公开路由在未携带凭证时以匿名身份放行，
//! 携带有效凭证时同样解析身份（例如商品详情需要识别浏览者）。

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use agri_marketplace::MarketError;
use agri_shared::cache::CacheKey;

use crate::auth::{AuthMethod, Claims, CurrentUser};
use crate::error::{ApiError, Result};
use crate::state::AppState;

/// 认证中间件
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let public = is_public_route(request.method(), request.uri().path());

    match extract_credentials(&request, &state.config.auth.cookie_name) {
        Some((token, method)) => match authenticate(&state, &token, method).await {
            Ok(user) => {
                request.extensions_mut().insert(user);
            }
            Err(e) if public => {
                debug!(error = %e, "公开路由携带的凭证无效，按匿名处理");
            }
            Err(e) => return e.into_response(),
        },
        None if !public => {
            return ApiError::Unauthorized("缺少认证 Token".to_string()).into_response();
        }
        None => {}
    }

    next.run(request).await
}

/// 验证 Token 并检查会话是否已注销、账号是否已停用
///
/// Redis 不可用时放行并记录告警，与限流的降级策略一致。
pub async fn authenticate(state: &AppState, token: &str, method: AuthMethod) -> Result<CurrentUser> {
    let claims = state.jwt.verify_token(token)?;
    check_session_state(state, &claims).await?;
    Ok(CurrentUser::from_claims(claims, method))
}

async fn check_session_state(state: &AppState, claims: &Claims) -> Result<()> {
    match state.cache.exists(&CacheKey::revoked_session(&claims.jti)).await {
        Ok(true) => return Err(ApiError::Unauthorized("会话已注销".to_string())),
        Ok(false) => {}
        Err(e) => {
            warn!(error = %e, "Redis 会话检查失败，跳过黑名单校验");
            return Ok(());
        }
    }

    match state
        .cache
        .exists(&CacheKey::suspended_user(&claims.sub.to_string()))
        .await
    {
        Ok(true) => Err(ApiError::Market(MarketError::AccountSuspended)),
        Ok(false) => Ok(()),
        Err(e) => {
            warn!(error = %e, "Redis 账号状态检查失败");
            Ok(())
        }
    }
}

/// Bearer 优先，其次是会话 Cookie
fn extract_credentials(request: &Request<Body>, cookie_name: &str) -> Option<(String, AuthMethod)> {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some((token.to_string(), AuthMethod::Bearer));
    }

    CookieJar::from_headers(request.headers())
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
        .map(|t| (t, AuthMethod::Cookie))
}

/// 无需登录即可访问的路由
fn is_public_route(method: &Method, path: &str) -> bool {
    match path {
        "/health" | "/ready" | "/metrics" | "/ws" => true,
        "/api/auth/register" | "/api/auth/login" | "/api/payments/paystack/webhook" => true,
        _ => {
            *method == Method::GET
                && (path == "/api/listings"
                    || path.starts_with("/api/listings/")
                    || path.starts_with("/api/farmers/"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/orders");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_public_routes() {
        assert!(is_public_route(&Method::GET, "/health"));
        assert!(is_public_route(&Method::POST, "/api/auth/login"));
        assert!(is_public_route(&Method::POST, "/api/payments/paystack/webhook"));
        assert!(is_public_route(&Method::GET, "/api/listings"));
        assert!(is_public_route(&Method::GET, "/api/listings/0190a7c2/quote"));
        assert!(is_public_route(&Method::GET, "/api/farmers/0190a7c2/rating"));

        assert!(!is_public_route(&Method::POST, "/api/listings"));
        assert!(!is_public_route(&Method::PATCH, "/api/listings/0190a7c2"));
        assert!(!is_public_route(&Method::GET, "/api/orders"));
        assert!(!is_public_route(&Method::POST, "/api/auth/logout"));
        assert!(!is_public_route(&Method::GET, "/api/auth/me"));
    }

    #[test]
    fn test_bearer_takes_precedence_over_cookie() {
        let req = request(&[
            ("authorization", "Bearer header-token"),
            ("cookie", "agri_session=cookie-token"),
        ]);
        let (token, method) = extract_credentials(&req, "agri_session").unwrap();
        assert_eq!(token, "header-token");
        assert_eq!(method, AuthMethod::Bearer);
    }

    #[test]
    fn test_cookie_credentials() {
        let req = request(&[("cookie", "theme=dark; agri_session=cookie-token")]);
        let (token, method) = extract_credentials(&req, "agri_session").unwrap();
        assert_eq!(token, "cookie-token");
        assert_eq!(method, AuthMethod::Cookie);
    }

    #[test]
    fn test_missing_or_malformed_credentials() {
        assert!(extract_credentials(&request(&[]), "agri_session").is_none());
        assert!(
            extract_credentials(&request(&[("authorization", "Basic abc")]), "agri_session")
                .is_none()
        );
        assert!(
            extract_credentials(&request(&[("authorization", "Bearer   ")]), "agri_session")
                .is_none()
        );
    }
}
