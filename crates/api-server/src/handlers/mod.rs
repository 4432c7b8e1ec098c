//! HTTP 请求处理器模块
//!
//! 处理器只做参数提取与响应包装，业务规则都在 `agri_marketplace` 的服务层。

pub mod admin;
pub mod auth;
pub mod cart;
pub mod dashboard;
pub mod health;
pub mod listings;
pub mod messages;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod reviews;
pub mod uploads;
pub mod users;
pub mod verification;
pub mod wallet;
