//! 认证 API 处理器
//!
//! 注册、登录、登出、当前用户与修改密码

use std::time::Duration;

use axum::{Json, extract::State};
use axum_extra::extract::cookie::CookieJar;
use chrono::DateTime;
use tracing::{info, warn};

use agri_marketplace::dto::{ChangePasswordRequest, LoginRequest, RegisterRequest};
use agri_marketplace::models::User;
use agri_shared::cache::CacheKey;

use crate::{
    auth::{CurrentUser, removal_cookie, session_cookie},
    dto::{ApiResponse, CsrfResponse, LoginResponse},
    error::{ApiError, Result},
    state::AppState,
};

/// 自助注册（农户、买家）
///
/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<User>>> {
    let user = state.users.register(req).await?;
    info!(user_id = %user.id, role = %user.role, "用户注册成功");
    Ok(Json(ApiResponse::success_with_message(user, "注册成功")))
}

/// 登录
///
/// POST /api/auth/login
///
/// 会话 Token 写入 HttpOnly Cookie，响应体返回 CSRF Token。
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<ApiResponse<LoginResponse>>)> {
    let user = state.users.login(req).await?;
    let issued = state.jwt.generate_token(user.id, &user.email, user.role)?;

    let expires_at = DateTime::from_timestamp(issued.claims.exp, 0)
        .ok_or_else(|| ApiError::Internal("无效的过期时间".to_string()))?;

    info!(user_id = %user.id, role = %user.role, "用户登录成功");

    let jar = jar.add(session_cookie(&state.config.auth, issued.token.clone()));
    let response = LoginResponse {
        token: issued.token,
        csrf_token: issued.claims.csrf,
        expires_at,
        user,
    };
    Ok((jar, Json(ApiResponse::success(response))))
}

/// 登出
///
/// POST /api/auth/logout
///
/// 将 jti 加入黑名单直到原过期时间，并删除会话 Cookie。
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    user: CurrentUser,
) -> Result<(CookieJar, Json<ApiResponse<()>>)> {
    let remaining = (user.expires_at - chrono::Utc::now().timestamp()).max(1) as u64;
    if let Err(e) = state
        .cache
        .set(
            &CacheKey::revoked_session(&user.jti),
            &true,
            Duration::from_secs(remaining),
        )
        .await
    {
        warn!(user_id = %user.id, error = %e, "写入会话黑名单失败");
    }

    info!(user_id = %user.id, "用户登出");
    let jar = jar.remove(removal_cookie(&state.config.auth));
    Ok((jar, Json(ApiResponse::<()>::success_empty())))
}

/// 当前登录用户
///
/// GET /api/auth/me
pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<User>>> {
    let profile = state.users.get(user.id).await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// 重新获取当前会话的 CSRF Token（页面刷新后）
///
/// GET /api/auth/csrf
pub async fn csrf(user: CurrentUser) -> Json<ApiResponse<CsrfResponse>> {
    Json(ApiResponse::success(CsrfResponse {
        csrf_token: user.csrf,
    }))
}

/// 修改密码
///
/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>> {
    state.users.change_password(user.id, req).await?;
    info!(user_id = %user.id, "密码已修改");
    Ok(Json(ApiResponse::<()>::success_with_message((), "密码已修改")))
}
