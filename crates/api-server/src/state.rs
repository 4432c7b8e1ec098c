//! 应用状态定义
//!
//! 路由共享的仓储、服务与外部集成，启动时装配一次，之后通过 `Clone` 在 handler 间共享。

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use agri_marketplace::Result;
use agri_marketplace::integrations::{CloudinarySigner, PaymentGateway, PaystackClient};
use agri_marketplace::notification::{EmailChannel, RealtimeChannel, RealtimePublisher};
use agri_marketplace::repository::{
    AnalyticsRepository, AuditRepository, CartRepository, ListingRepository, MessageRepository,
    NotificationRepository, OrderRepository, PaymentRepository, ReviewRepository, UserRepository,
    VerificationRepository, WalletRepository,
};
use agri_marketplace::{
    AdminService, AnalyticsService, CartService, CheckoutService, ListingService,
    MessagingService, NotificationService, OrderService, PaymentService, ReviewService,
    UserService, VerificationService, WalletService,
};
use agri_shared::cache::Cache;
use agri_shared::config::AppConfig;
use agri_shared::crypto::FieldEncryptor;
use agri_shared::error::AgriError;

use crate::auth::JwtManager;
use crate::realtime::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL 连接池
    pub pool: PgPool,
    /// Redis 缓存客户端
    pub cache: Arc<Cache>,
    pub config: Arc<AppConfig>,
    pub jwt: JwtManager,
    pub hub: Arc<RealtimeHub>,
    /// 未配置 Cloudinary 时为 None
    pub uploads: Option<CloudinarySigner>,

    pub users: Arc<UserService>,
    pub listings: Arc<ListingService>,
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: OrderService,
    pub payments: Arc<PaymentService>,
    pub wallet: WalletService,
    pub verification: Arc<VerificationService>,
    pub reviews: Arc<ReviewService>,
    pub messaging: Arc<MessagingService>,
    pub analytics: Arc<AnalyticsService>,
    pub notifications: NotificationService,
    pub admin: AdminService,
}

impl AppState {
    /// 装配所有服务
    ///
    /// 第三方凭证缺失时对应功能降级，不阻止启动。
    pub fn build(pool: PgPool, cache: Arc<Cache>, config: Arc<AppConfig>) -> Result<Self> {
        let users_repo = Arc::new(UserRepository::new(pool.clone()));
        let listings_repo = Arc::new(ListingRepository::new(pool.clone()));
        let reviews_repo = Arc::new(ReviewRepository::new(pool.clone()));
        let orders_repo = Arc::new(OrderRepository::new(pool.clone()));
        let payments_repo = Arc::new(PaymentRepository::new(pool.clone()));
        let wallets_repo = Arc::new(WalletRepository::new(pool.clone()));

        let hub = Arc::new(RealtimeHub::default());
        let publisher: Arc<dyn RealtimePublisher> = hub.clone();

        let notifications = NotificationService::new(
            Arc::new(NotificationRepository::new(pool.clone())),
            users_repo.clone(),
        )
        .with_channel(Arc::new(RealtimeChannel::new(publisher.clone())))
        .with_channel(Arc::new(EmailChannel::from_config(&config.resend)));

        let gateway: Option<Arc<dyn PaymentGateway>> =
            match PaystackClient::from_config(&config.paystack)? {
                Some(client) => Some(Arc::new(client)),
                None => {
                    warn!("未配置 Paystack，结算不生成支付链接，提现审核后直接标记为已打款");
                    None
                }
            };

        let uploads = CloudinarySigner::from_config(&config.cloudinary);
        if uploads.is_none() {
            warn!("未配置 Cloudinary，上传签名接口不可用");
        }

        let encryptor = Arc::new(
            FieldEncryptor::from_config(config.security.encryption_key.as_deref())
                .map_err(AgriError::from)?,
        );
        if !encryptor.is_enabled() {
            warn!("未配置字段加密密钥，收款账号以明文存储");
        }

        let listings = Arc::new(
            ListingService::new(
                listings_repo.clone(),
                users_repo.clone(),
                reviews_repo.clone(),
            )
            .with_cache(cache.clone()),
        );

        let orders = OrderService::new(
            pool.clone(),
            orders_repo.clone(),
            notifications.clone(),
            publisher.clone(),
            config.marketplace.clone(),
        );

        let wallet = WalletService::new(
            pool.clone(),
            wallets_repo.clone(),
            gateway.clone(),
            encryptor,
            notifications.clone(),
            config.marketplace.clone(),
        );

        let payments = PaymentService::new(
            pool.clone(),
            payments_repo.clone(),
            orders_repo.clone(),
            orders.clone(),
            wallet.clone(),
            gateway.clone(),
            config.paystack.secret_key.clone().filter(|k| !k.is_empty()),
            notifications.clone(),
        )
        .with_cache(cache.clone());

        let checkout = CheckoutService::new(
            pool.clone(),
            users_repo.clone(),
            payments_repo,
            gateway,
            config.marketplace.clone(),
        )
        .with_cache(cache.clone());

        let analytics = AnalyticsService::new(
            AnalyticsRepository::new(pool.clone()),
            orders_repo.clone(),
            wallets_repo,
            listings.clone(),
        )
        .with_cache(cache.clone());

        let state = Self {
            users: Arc::new(UserService::new(users_repo.clone(), &config.auth)),
            cart: Arc::new(CartService::new(
                Arc::new(CartRepository::new(pool.clone())),
                listings_repo,
            )),
            checkout: Arc::new(checkout),
            payments: Arc::new(payments),
            verification: Arc::new(VerificationService::new(
                pool.clone(),
                Arc::new(VerificationRepository::new(pool.clone())),
                users_repo.clone(),
                notifications.clone(),
            )),
            reviews: Arc::new(ReviewService::new(
                reviews_repo,
                orders_repo,
                listings.clone(),
                notifications.clone(),
            )),
            messaging: Arc::new(MessagingService::new(
                Arc::new(MessageRepository::new(pool.clone())),
                users_repo,
                publisher,
            )),
            analytics: Arc::new(analytics),
            admin: AdminService::new(Arc::new(AuditRepository::new(pool.clone()))),
            jwt: JwtManager::new(&config.auth),
            listings,
            orders,
            wallet,
            notifications,
            uploads,
            hub,
            pool,
            cache,
            config,
        };

        info!(
            payments = state.payments_enabled(),
            uploads = state.uploads.is_some(),
            "应用状态初始化完成"
        );
        Ok(state)
    }

    pub fn payments_enabled(&self) -> bool {
        self.config.paystack.is_configured()
    }
}
