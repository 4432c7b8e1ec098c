pub mod escrow_release_worker;
pub mod payment_expiry_worker;

pub use escrow_release_worker::EscrowReleaseWorker;
pub use payment_expiry_worker::PaymentExpiryWorker;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use agri_marketplace::notification::RealtimePublisher;
    use agri_marketplace::repository::{NotificationRepository, OrderRepository, UserRepository};
    use agri_marketplace::{NotificationService, OrderService};
    use agri_shared::config::MarketplaceConfig;

    use crate::realtime::RealtimeHub;

    /// 使用惰性连接池构造，不会真正连接数据库
    pub fn lazy_order_service() -> OrderService {
        let pool = sqlx::PgPool::connect_lazy("postgres://localhost/test").unwrap();
        let users = Arc::new(UserRepository::new(pool.clone()));
        let notifications =
            NotificationService::new(Arc::new(NotificationRepository::new(pool.clone())), users);
        let publisher: Arc<dyn RealtimePublisher> = Arc::new(RealtimeHub::default());
        OrderService::new(
            pool.clone(),
            Arc::new(OrderRepository::new(pool)),
            notifications,
            publisher,
            MarketplaceConfig::default(),
        )
    }
}
