//! 角色检查中间件
//!
//! 按路由组限制可访问的角色

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::pin::Pin;

use agri_marketplace::models::UserRole;

use crate::auth::CurrentUser;
use crate::error::ApiError;

pub const FARMER: &[UserRole] = &[UserRole::Farmer];
pub const BUYER: &[UserRole] = &[UserRole::Buyer];
pub const TRADERS: &[UserRole] = &[UserRole::Farmer, UserRole::Buyer];
pub const FIELD_OFFICER: &[UserRole] = &[UserRole::FieldOfficer];
pub const REVIEWERS: &[UserRole] = &[UserRole::FieldOfficer, UserRole::Admin];
pub const ADMIN: &[UserRole] = &[UserRole::Admin];

/// 角色检查中间件工厂
///
/// # 示例
/// ```ignore
/// .route("/admin/users", get(list_users))
/// .route_layer(axum::middleware::from_fn(require_role(ADMIN)))
/// ```
pub fn require_role(
    allowed: &'static [UserRole],
) -> impl Fn(Request<Body>, Next) -> Pin<Box<dyn Future<Output = Response> + Send>>
       + Clone
       + Send
       + Sync {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move { check_role(request, next, allowed).await })
    }
}

async fn check_role(request: Request<Body>, next: Next, allowed: &[UserRole]) -> Response {
    let Some(user) = request.extensions().get::<CurrentUser>() else {
        return ApiError::Unauthorized("请先登录".to_string()).into_response();
    };

    if let Err(e) = user.require_role(allowed) {
        return e.into_response();
    }

    next.run(request).await
}
