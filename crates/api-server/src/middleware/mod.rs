//! 中间件模块
//!
//! 认证、CSRF、角色检查、限流、审计与安全响应头

mod audit;
mod auth;
mod csrf;
mod rate_limit;
pub mod role;
mod security_headers;

pub use audit::audit_middleware;
pub use auth::{auth_middleware, authenticate};
pub use csrf::{CSRF_HEADER, csrf_middleware};
pub use rate_limit::rate_limit_middleware;
pub use role::require_role;
pub use security_headers::security_headers;
