//! 数据库仓储层
//!
//! 每个仓储持有连接池，提供普通读写方法；需要在同一事务内加锁的操作
//! 以 `*_in_tx(tx: &mut PgConnection, ..)` 关联函数的形式提供。

mod analytics_repo;
mod audit_repo;
mod cart_repo;
mod listing_repo;
mod message_repo;
mod notification_repo;
mod order_repo;
mod payment_repo;
mod review_repo;
pub mod traits;
mod user_repo;
mod verification_repo;
mod wallet_repo;

pub use analytics_repo::AnalyticsRepository;
pub use audit_repo::AuditRepository;
pub use cart_repo::CartRepository;
pub use listing_repo::ListingRepository;
pub use message_repo::MessageRepository;
pub use notification_repo::NotificationRepository;
pub use order_repo::OrderRepository;
pub use payment_repo::PaymentRepository;
pub use review_repo::ReviewRepository;
pub use traits::*;
pub use user_repo::UserRepository;
pub use verification_repo::VerificationRepository;
pub use wallet_repo::WalletRepository;
