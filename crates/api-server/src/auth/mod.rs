//! 认证模块
//!
//! 提供 JWT 会话签发、验证与会话 Cookie。密码哈希由业务层 `UserService` 负责。

mod jwt;
mod session;

pub use jwt::{Claims, IssuedToken, JwtManager};
pub use session::{AuthMethod, CurrentUser, removal_cookie, session_cookie};
