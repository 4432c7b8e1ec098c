//! AgriCompass 交易市场核心
//!
//! 农户发布农产品，买家按阶梯价下单，货款由平台托管至确认收货后结算给农户。
//!
//! ## 核心功能
//!
//! - **阶梯定价**：每个商品最多 5 档批量价，下单时按数量选档
//! - **购物车与结算**：按农户拆单，库存在事务内扣减
//! - **托管支付**：Paystack 回调确认到账，收货或超时后放款，取消时退款到钱包
//! - **订单状态机**：角色鉴权后的状态流转及其资金副作用
//! - **钱包与提现**：复式流水，提现审核后经 Paystack 转账
//! - **农户认证**：农技员审核，通过后恢复暂停的商品
//! - **私信与通知**：站内通知、邮件与 WebSocket 实时推送
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `pricing`: 阶梯价校验与报价
//! - `escrow`: 平台费、金额换算与流水参考号
//! - `order_flow`: 订单状态流转规则
//! - `integrations`: Paystack 与 Cloudinary
//! - `notification`: 通知服务与实时推送
//! - `repository`: 数据库仓储层
//! - `service`: 业务服务层

pub mod error;
pub mod escrow;
pub mod integrations;
pub mod models;
pub mod notification;
pub mod order_flow;
pub mod pricing;
pub mod repository;
pub mod service;

pub use error::{MarketError, Result};
pub use models::*;
pub use notification::{NotificationService, RealtimeEvent, RealtimePublisher};
pub use order_flow::{Actor, OrderAction};
pub use service::{
    AdminService, AnalyticsService, CartService, CheckoutService, ListingService,
    MessagingService, OrderService, PaymentService, ReviewService, UserService,
    VerificationService, WalletService, WebhookOutcome, dto,
};
