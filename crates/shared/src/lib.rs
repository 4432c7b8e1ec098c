//! 共享库
//!
//! 包含各 crate 共用的配置、错误处理、数据库连接、缓存、加密签名、重试与可观测性基础设施。

pub mod cache;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod observability;
pub mod retry;
pub mod test_utils;
