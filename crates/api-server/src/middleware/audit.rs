//! 审计日志中间件
//!
//! 记录管理员与外勤人员的成功写操作，写入失败不影响业务响应。

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderMap, Method, Request, header},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use agri_marketplace::models::NewAuditLog;

use crate::auth::CurrentUser;
use crate::state::AppState;

const MAX_ACTION_LEN: usize = 60;

pub async fn audit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if !is_write_method(&method) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    // 登录登出属于系统行为
    if path.starts_with("/api/auth/") {
        return next.run(request).await;
    }

    let Some(user) = request
        .extensions()
        .get::<CurrentUser>()
        .filter(|u| u.role.is_staff())
        .cloned()
    else {
        return next.run(request).await;
    };

    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let ip_address = client_ip(request.headers());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    if response.status().is_success() {
        let (target_type, target_id) = extract_target(&path);
        state.admin.record_async(NewAuditLog {
            actor_id: user.id,
            actor_role: user.role.as_str().to_string(),
            module: parse_module(&path),
            action: format_action(&method, &route),
            target_type,
            target_id,
            ip_address,
            user_agent,
        });
    }

    response
}

fn is_write_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn resource_segments(path: &str) -> Vec<&str> {
    let stripped = path.strip_prefix("/api/").unwrap_or(path);
    let stripped = stripped.strip_prefix("admin/").unwrap_or(stripped);
    stripped.split('/').filter(|s| !s.is_empty()).collect()
}

/// `/api/admin/users/{id}/status` 的模块为 `users`
fn parse_module(path: &str) -> String {
    resource_segments(path)
        .first()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// 以路由模板记录操作，避免 ID 混入动作名
fn format_action(method: &Method, route: &str) -> String {
    let mut action = format!("{method} {route}");
    if action.len() > MAX_ACTION_LEN {
        let mut cut = MAX_ACTION_LEN;
        while !action.is_char_boundary(cut) {
            cut -= 1;
        }
        action.truncate(cut);
    }
    action
}

/// 第二段为 UUID 时视为资源 ID，`withdrawals` 对应 `withdrawal`
fn extract_target(path: &str) -> (Option<String>, Option<String>) {
    let segments = resource_segments(path);
    if segments.len() >= 2 && Uuid::parse_str(segments[1]).is_ok() {
        let target_type = segments[0].strip_suffix('s').unwrap_or(segments[0]);
        return (Some(target_type.to_string()), Some(segments[1].to_string()));
    }
    (None, None)
}

/// 优先取反向代理写入的 X-Forwarded-For 首个地址，其次 X-Real-IP
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_module() {
        assert_eq!(parse_module("/api/admin/users/1/status"), "users");
        assert_eq!(parse_module("/api/admin/withdrawals/1/review"), "withdrawals");
        assert_eq!(parse_module("/api/verifications/1/decision"), "verifications");
        assert_eq!(parse_module("/api/"), "unknown");
    }

    #[test]
    fn test_format_action_uses_route_template() {
        assert_eq!(
            format_action(&Method::PATCH, "/api/admin/users/{id}/status"),
            "PATCH /api/admin/users/{id}/status"
        );
        let long = format!("/api/{}", "x".repeat(100));
        assert_eq!(format_action(&Method::POST, &long).len(), MAX_ACTION_LEN);
    }

    #[test]
    fn test_extract_target_with_uuid() {
        let id = Uuid::new_v4().to_string();
        let (t, target) = extract_target(&format!("/api/admin/withdrawals/{id}/review"));
        assert_eq!(t.as_deref(), Some("withdrawal"));
        assert_eq!(target, Some(id));
    }

    #[test]
    fn test_extract_target_without_id() {
        assert_eq!(extract_target("/api/admin/users"), (None, None));
        assert_eq!(extract_target("/api/verifications/me"), (None, None));
    }

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.4"));

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_is_write_method() {
        assert!(is_write_method(&Method::POST));
        assert!(is_write_method(&Method::DELETE));
        assert!(!is_write_method(&Method::GET));
        assert!(!is_write_method(&Method::OPTIONS));
    }
}
