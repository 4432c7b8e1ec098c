//! 会话 Cookie 与当前用户
//!
//! 认证中间件解析出 `CurrentUser` 后放入请求扩展，handler 通过提取器获取。

use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, SameSite};
use uuid::Uuid;

use agri_marketplace::models::UserRole;
use agri_marketplace::order_flow::Actor;
use agri_shared::config::AuthConfig;

use super::jwt::Claims;
use crate::error::ApiError;

/// 凭证来源，决定是否需要 CSRF 校验
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Cookie,
    Bearer,
}

/// 已认证的请求方
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub jti: String,
    pub csrf: String,
    pub expires_at: i64,
    pub method: AuthMethod,
}

impl CurrentUser {
    pub fn from_claims(claims: Claims, method: AuthMethod) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            role: claims.role,
            jti: claims.jti,
            csrf: claims.csrf,
            expires_at: claims.exp,
            method,
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::user(self.id, self.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// handler 内的细粒度角色检查
    pub fn require_role(&self, allowed: &[UserRole]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("角色 {} 无权执行此操作", self.role)))
        }
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("请先登录".to_string()))
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<CurrentUser>().cloned())
    }
}

/// 构造会话 Cookie：HttpOnly、SameSite=Lax，生产环境启用 Secure
pub fn session_cookie(config: &AuthConfig, token: String) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .build()
}

/// 用于注销时删除会话 Cookie
pub fn removal_cookie(config: &AuthConfig) -> Cookie<'static> {
    Cookie::build(config.cookie_name.clone()).path("/").build()
}
