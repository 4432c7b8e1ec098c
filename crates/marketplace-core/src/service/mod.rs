//! 服务层
//!
//! 实现交易市场业务逻辑，协调仓储、事务与外部集成。
//!
//! ## 模块结构
//!
//! - `dto`: 请求与响应对象
//! - `user_service`: 注册、登录锁定、资料与账号管理
//! - `listing_service` / `cart_service` / `checkout_service`: 商品、购物车与结算
//! - `order_service` / `payment_service`: 订单状态机与托管支付
//! - `wallet_service`: 钱包与提现
//! - `verification_service` / `review_service` / `messaging_service`
//! - `analytics_service` / `admin_service`: 仪表盘与管理端

pub mod admin_service;
pub mod analytics_service;
pub mod cart_service;
pub mod checkout_service;
pub mod dto;
pub mod listing_service;
pub mod messaging_service;
pub mod order_service;
pub mod payment_service;
pub mod review_service;
pub mod user_service;
pub mod verification_service;
pub mod wallet_service;

pub use admin_service::AdminService;
pub use analytics_service::AnalyticsService;
pub use cart_service::CartService;
pub use checkout_service::CheckoutService;
pub use dto::*;
pub use listing_service::ListingService;
pub use messaging_service::MessagingService;
pub use order_service::OrderService;
pub use payment_service::{PaymentService, WebhookOutcome};
pub use review_service::ReviewService;
pub use user_service::UserService;
pub use verification_service::VerificationService;
pub use wallet_service::WalletService;

use validator::Validate;

use crate::error::{MarketError, Result};

/// 默认分页大小上限
pub const MAX_PAGE_SIZE: i64 = 100;

/// 校验请求，错误信息按字段拼接
pub fn validate_request<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|errors| {
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => format!("{}: {}", field, msg),
                    None => format!("{}: {}", field, e.code),
                })
            })
            .collect();
        messages.sort();
        MarketError::Validation(messages.join("; "))
    })
}

/// 规范化分页参数
pub fn normalize_page(page: i64, page_size: i64) -> (i64, i64) {
    let page = page.max(1);
    let page_size = if page_size <= 0 {
        20
    } else {
        page_size.min(MAX_PAGE_SIZE)
    };
    (page, page_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_page() {
        assert_eq!(normalize_page(0, 0), (1, 20));
        assert_eq!(normalize_page(3, 500), (3, MAX_PAGE_SIZE));
        assert_eq!(normalize_page(2, 10), (2, 10));
    }

    #[test]
    fn test_validate_request_collects_fields() {
        let req = SendMessageRequest {
            body: String::new(),
        };
        let err = validate_request(&req).unwrap_err();
        match err {
            MarketError::Validation(msg) => assert!(msg.starts_with("body:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
