//! HTTP 层 DTO
//!
//! 业务请求体直接复用 `agri_marketplace::dto`，这里只放查询参数与响应包装。

mod request;
mod response;

pub use request::*;
pub use response::*;
