//! AgriCompass HTTP 服务
//!
//! 对外提供交易市场的 REST API、WebSocket 实时推送与 Paystack 回调入口。
//!
//! ## 核心功能
//!
//! - **会话认证**：JWT 存放在 HttpOnly Cookie 中，写操作使用双提交 CSRF Token；
//!   非浏览器客户端可使用 `Authorization: Bearer`
//! - **交易流程**：商品、购物车、结算、订单状态流转与托管放款
//! - **资金**：Paystack 支付回调、钱包与提现审核
//! - **运营**：农户认证、用户管理、审计日志与仪表盘
//! - **实时推送**：`/ws` 按用户推送通知、私信与订单状态
//!
//! ## 模块结构
//!
//! - `auth`: JWT 签发与会话 Cookie
//! - `dto`: 查询参数与统一响应结构
//! - `error`: HTTP 错误类型
//! - `handlers`: HTTP 请求处理器
//! - `middleware`: 认证、CSRF、角色、限流、审计
//! - `realtime`: WebSocket 连接管理
//! - `routes`: 路由配置
//! - `state`: 应用状态与服务装配
//! - `worker`: 后台定时任务

pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod realtime;
pub mod routes;
pub mod state;
pub mod worker;

pub use dto::{ApiResponse, PageResponse, PaginationParams};
pub use error::{ApiError, Result};
pub use state::AppState;
