//! 交易主流程集成测试
//!
//! 注册 → 认证 → 发布商品 → 加购 → 结算 → 到账确认 → 接单 → 发货 → 确认收货 → 钱包入账 → 提现。
//! 服务内部通过事务与行锁操作数据库，需要真实 PostgreSQL。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test -p agri-marketplace --test marketplace_flow_test -- --ignored
//! ```

use std::sync::Arc;

use agri_marketplace::dto::{
    AddToCartRequest, CheckoutRequest, CreateListingRequest, CreateStaffRequest,
    RegisterRequest, ReviewWithdrawalRequest, SubmitVerificationRequest,
    VerificationDecisionRequest, WithdrawalRequest,
};
use agri_marketplace::escrow;
use agri_marketplace::integrations::{
    InitializeRequest, InitializedTransaction, PaymentGateway, RecipientRequest, TransferReceipt,
    TransferRequest, VerifiedTransaction,
};
use agri_marketplace::models::{
    ListingStatus, OrderStatus, PaymentStatus, User, UserRole, WalletEntry, WalletTxSource,
    WithdrawalStatus,
};
use agri_marketplace::notification::NoopPublisher;
use agri_marketplace::order_flow::{Actor, OrderAction};
use agri_marketplace::pricing::TierSpec;
use agri_marketplace::repository::{
    CartRepository, ListingRepository, NotificationRepository, OrderRepository,
    PaymentRepository, ReviewRepository, UserRepository, VerificationRepository,
    WalletRepository,
};
use agri_marketplace::{
    CartService, CheckoutService, ListingService, MarketError, NotificationService, OrderService,
    PaymentService, UserService, VerificationService, WalletService, WebhookOutcome,
};
use agri_shared::config::{AuthConfig, MarketplaceConfig};
use agri_shared::crypto::FieldEncryptor;
use agri_shared::error::AgriError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

// ==================== 辅助函数 ====================

fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests")
}

fn unique_email(prefix: &str) -> String {
    format!("{}-{}@test.agricompass.app", prefix, Uuid::new_v4().simple())
}

struct Services {
    users: UserService,
    verifications: VerificationService,
    listings: Arc<ListingService>,
    cart: CartService,
    checkout: CheckoutService,
    orders: OrderService,
    payments: PaymentService,
    wallet: WalletService,
}

async fn setup(pool: &PgPool) -> Services {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .expect("运行迁移失败");

    let config = MarketplaceConfig::default();
    let users_repo = Arc::new(UserRepository::new(pool.clone()));
    let listings_repo = Arc::new(ListingRepository::new(pool.clone()));
    let reviews_repo = Arc::new(ReviewRepository::new(pool.clone()));
    let orders_repo = Arc::new(OrderRepository::new(pool.clone()));
    let payments_repo = Arc::new(PaymentRepository::new(pool.clone()));
    let wallets_repo = Arc::new(WalletRepository::new(pool.clone()));

    let notifications = NotificationService::new(
        Arc::new(NotificationRepository::new(pool.clone())),
        users_repo.clone(),
    );
    let listings = Arc::new(ListingService::new(
        listings_repo.clone(),
        users_repo.clone(),
        reviews_repo,
    ));
    let orders = OrderService::new(
        pool.clone(),
        orders_repo.clone(),
        notifications.clone(),
        Arc::new(NoopPublisher),
        config.clone(),
    );
    let wallet = WalletService::new(
        pool.clone(),
        wallets_repo,
        None,
        Arc::new(FieldEncryptor::passthrough()),
        notifications.clone(),
        config.clone(),
    );
    let payments = PaymentService::new(
        pool.clone(),
        payments_repo.clone(),
        orders_repo,
        orders.clone(),
        wallet.clone(),
        None,
        None,
        notifications.clone(),
    );

    Services {
        users: UserService::new(users_repo.clone(), &AuthConfig::default()).with_bcrypt_cost(4),
        verifications: VerificationService::new(
            pool.clone(),
            Arc::new(VerificationRepository::new(pool.clone())),
            users_repo.clone(),
            notifications,
        ),
        listings,
        cart: CartService::new(Arc::new(CartRepository::new(pool.clone())), listings_repo),
        checkout: CheckoutService::new(pool.clone(), users_repo, payments_repo, None, config),
        orders,
        payments,
        wallet,
    }
}

/// 发起转账总是超时，查询转账返回固定状态
struct TimeoutTransferGateway {
    verify_status: &'static str,
}

#[async_trait]
impl PaymentGateway for TimeoutTransferGateway {
    async fn initialize_transaction(
        &self,
        _request: &InitializeRequest,
    ) -> agri_marketplace::Result<InitializedTransaction> {
        Err(AgriError::external("paystack", "not used").into())
    }

    async fn verify_transaction(
        &self,
        _reference: &str,
    ) -> agri_marketplace::Result<VerifiedTransaction> {
        Err(AgriError::external("paystack", "not used").into())
    }

    async fn create_transfer_recipient(
        &self,
        _request: &RecipientRequest,
    ) -> agri_marketplace::Result<String> {
        Ok("RCP_test".to_string())
    }

    async fn initiate_transfer(
        &self,
        _request: &TransferRequest,
    ) -> agri_marketplace::Result<TransferReceipt> {
        Err(AgriError::timeout("paystack").into())
    }

    async fn verify_transfer(&self, reference: &str) -> agri_marketplace::Result<TransferReceipt> {
        Ok(TransferReceipt {
            transfer_code: "TRF_test".to_string(),
            reference: reference.to_string(),
            status: self.verify_status.to_string(),
        })
    }
}

fn wallet_with_gateway(pool: &PgPool, gateway: TimeoutTransferGateway) -> WalletService {
    WalletService::new(
        pool.clone(),
        Arc::new(WalletRepository::new(pool.clone())),
        Some(Arc::new(gateway)),
        Arc::new(FieldEncryptor::passthrough()),
        NotificationService::new(
            Arc::new(NotificationRepository::new(pool.clone())),
            Arc::new(UserRepository::new(pool.clone())),
        ),
        MarketplaceConfig::default(),
    )
}

async fn seed_balance(pool: &PgPool, user: &User, amount: Decimal) {
    let mut tx = pool.begin().await.unwrap();
    WalletRepository::apply_entry_in_tx(
        &mut tx,
        &WalletEntry {
            user_id: user.id,
            source: WalletTxSource::Adjustment,
            amount,
            reference: format!("test:seed:{}", Uuid::new_v4()),
            order_id: None,
            description: "Test balance".to_string(),
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
}

async fn create_admin(services: &Services) -> User {
    services
        .users
        .create_staff(CreateStaffRequest {
            email: unique_email("admin"),
            password: "Harvest#2024".to_string(),
            full_name: "Admin".to_string(),
            phone: None,
            role: UserRole::Admin,
            location: None,
        })
        .await
        .unwrap()
}

/// 审核通过一笔 2000 的提现，转账发起超时
async fn approve_with_timeout(
    services: &Services,
    wallet: &WalletService,
    farmer: &User,
) -> agri_marketplace::dto::WithdrawalView {
    let withdrawal = wallet
        .request_withdrawal(
            farmer.id,
            UserRole::Farmer,
            WithdrawalRequest {
                amount: Decimal::from(2000),
                bank_code: "058".to_string(),
                account_number: "0123456789".to_string(),
                account_name: "Test Farmer".to_string(),
            },
        )
        .await
        .unwrap();
    let admin = create_admin(services).await;
    wallet
        .review(
            admin.id,
            withdrawal.id,
            ReviewWithdrawalRequest {
                approve: true,
                note: None,
            },
        )
        .await
        .unwrap()
}

async fn register(services: &Services, role: UserRole) -> User {
    services
        .users
        .register(RegisterRequest {
            email: unique_email(role.as_str()),
            password: "Harvest#2024".to_string(),
            full_name: format!("Test {}", role),
            phone: Some("+2348012345678".to_string()),
            role,
            location: Some("Kaduna".to_string()),
        })
        .await
        .expect("注册失败")
}

/// 农户提交认证，由农技员审核通过
async fn verify_farmer(services: &Services, farmer: &User) {
    let officer = services
        .users
        .create_staff(CreateStaffRequest {
            email: unique_email("officer"),
            password: "Harvest#2024".to_string(),
            full_name: "Field Officer".to_string(),
            phone: None,
            role: UserRole::FieldOfficer,
            location: None,
        })
        .await
        .expect("创建农技员失败");

    let verification = services
        .verifications
        .submit(
            farmer.id,
            SubmitVerificationRequest {
                farm_name: "Green Acres".to_string(),
                farm_size_hectares: Decimal::new(125, 1),
                farm_location: "Zaria".to_string(),
                crops: vec!["Maize".to_string(), "maize".to_string(), "Sorghum".to_string()],
                document_urls: vec![],
            },
        )
        .await
        .expect("提交认证失败");
    assert_eq!(verification.crops.len(), 2);

    services
        .verifications
        .claim(officer.id, verification.id)
        .await
        .expect("领取认证失败");
    services
        .verifications
        .decide(
            officer.id,
            UserRole::FieldOfficer,
            verification.id,
            VerificationDecisionRequest {
                approve: true,
                notes: Some("Farm inspected".to_string()),
            },
        )
        .await
        .expect("审核认证失败");
}

// ==================== 测试用例 ====================

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_full_purchase_flow() {
    let pool = PgPool::connect(&database_url()).await.unwrap();
    let services = setup(&pool).await;

    let farmer = register(&services, UserRole::Farmer).await;
    let buyer = register(&services, UserRole::Buyer).await;

    // 未认证农户的商品以暂停状态创建
    let listing = services
        .listings
        .create(
            farmer.id,
            CreateListingRequest {
                title: "White Maize".to_string(),
                description: "Dry, sorted maize".to_string(),
                category: "grains".to_string(),
                unit: "bag".to_string(),
                price_per_unit: Decimal::from(100),
                quantity_available: Decimal::from(100),
                min_order_quantity: Some(Decimal::from(5)),
                location: "Zaria".to_string(),
                image_urls: vec![],
                pricing_tiers: vec![TierSpec {
                    min_quantity: Decimal::from(20),
                    max_quantity: None,
                    price_per_unit: Decimal::from(90),
                }],
            },
        )
        .await
        .unwrap();
    assert_eq!(listing.status, ListingStatus::Paused);

    verify_farmer(&services, &farmer).await;
    let detail = services.listings.detail(listing.id, None).await.unwrap();
    assert_eq!(detail.listing.status, ListingStatus::Active);
    assert!(detail.farmer.is_verified);

    services
        .cart
        .add(
            buyer.id,
            AddToCartRequest {
                listing_id: listing.id,
                quantity: Decimal::from(20),
            },
        )
        .await
        .unwrap();
    let cart = services.cart.view(buyer.id).await.unwrap();
    assert_eq!(cart.total, Decimal::from(1800));

    let result = services
        .checkout
        .checkout(
            buyer.id,
            CheckoutRequest {
                delivery_address: "14 Ahmadu Bello Way, Kaduna".to_string(),
                note: None,
                callback_url: None,
            },
        )
        .await
        .unwrap();
    assert!(result.authorization_url.is_none());
    assert_eq!(result.orders.len(), 1);
    assert_eq!(result.payment.status, PaymentStatus::AwaitingPayment);
    let order = result.orders[0].clone();
    assert_eq!(order.unit_price, Decimal::from(90));

    // 付款前农户不能接单
    let err = services
        .orders
        .transition(order.id, OrderAction::Accept, Actor::user(farmer.id, UserRole::Farmer), None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ORDER_NOT_PAID");

    let kobo = escrow::to_kobo(result.payment.amount).unwrap();
    let outcome = services
        .payments
        .confirm_charge(&result.payment.reference, kobo, None)
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    let again = services
        .payments
        .confirm_charge(&result.payment.reference, kobo, None)
        .await
        .unwrap();
    assert_eq!(again, WebhookOutcome::Duplicate);

    let farmer_actor = Actor::user(farmer.id, UserRole::Farmer);
    services
        .orders
        .transition(order.id, OrderAction::Accept, farmer_actor, None)
        .await
        .unwrap();
    services
        .orders
        .transition(order.id, OrderAction::Deliver, farmer_actor, None)
        .await
        .unwrap();
    let completed = services
        .orders
        .transition(order.id, OrderAction::Confirm, Actor::user(buyer.id, UserRole::Buyer), None)
        .await
        .unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(completed.platform_fee, Some(Decimal::new(4500, 2)));

    let wallet = services.wallet.balance(farmer.id).await.unwrap();
    assert_eq!(wallet.balance, Decimal::new(175_500, 2));

    let detail = services
        .payments
        .payment_detail(&result.payment.reference, buyer.id, UserRole::Buyer)
        .await
        .unwrap();
    assert_eq!(detail.payment.status, PaymentStatus::Released);

    // 未配置 Paystack 时审核通过即视为已打款
    let withdrawal = services
        .wallet
        .request_withdrawal(
            farmer.id,
            UserRole::Farmer,
            WithdrawalRequest {
                amount: Decimal::from(1500),
                bank_code: "058".to_string(),
                account_number: "0123456789".to_string(),
                account_name: "Test Farmer".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(withdrawal.account_number, "******6789");

    let admin = services
        .users
        .create_staff(CreateStaffRequest {
            email: unique_email("admin"),
            password: "Harvest#2024".to_string(),
            full_name: "Admin".to_string(),
            phone: None,
            role: UserRole::Admin,
            location: None,
        })
        .await
        .unwrap();
    let reviewed = services
        .wallet
        .review(
            admin.id,
            withdrawal.id,
            ReviewWithdrawalRequest {
                approve: true,
                note: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(reviewed.status, WithdrawalStatus::Paid);

    let wallet = services.wallet.balance(farmer.id).await.unwrap();
    assert_eq!(wallet.balance, Decimal::new(25_500, 2));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_buyer_cancel_restores_stock_and_refunds() {
    let pool = PgPool::connect(&database_url()).await.unwrap();
    let services = setup(&pool).await;

    let farmer = register(&services, UserRole::Farmer).await;
    let buyer = register(&services, UserRole::Buyer).await;
    verify_farmer(&services, &farmer).await;

    let listing = services
        .listings
        .create(
            farmer.id,
            CreateListingRequest {
                title: "Tomatoes".to_string(),
                description: String::new(),
                category: "vegetables".to_string(),
                unit: "crate".to_string(),
                price_per_unit: Decimal::from(4500),
                quantity_available: Decimal::from(10),
                min_order_quantity: None,
                location: "Jos".to_string(),
                image_urls: vec![],
                pricing_tiers: vec![],
            },
        )
        .await
        .unwrap();

    services
        .cart
        .add(
            buyer.id,
            AddToCartRequest {
                listing_id: listing.id,
                quantity: Decimal::from(10),
            },
        )
        .await
        .unwrap();
    let result = services
        .checkout
        .checkout(
            buyer.id,
            CheckoutRequest {
                delivery_address: "2 Rayfield Road, Jos".to_string(),
                note: None,
                callback_url: None,
            },
        )
        .await
        .unwrap();

    // 全部买下后商品售罄
    let detail = services.listings.detail(listing.id, None).await.unwrap();
    assert_eq!(detail.listing.status, ListingStatus::SoldOut);

    let kobo = escrow::to_kobo(result.payment.amount).unwrap();
    services
        .payments
        .confirm_charge(&result.payment.reference, kobo, None)
        .await
        .unwrap();

    services
        .orders
        .transition(
            result.orders[0].id,
            OrderAction::Cancel,
            Actor::user(buyer.id, UserRole::Buyer),
            Some("changed my mind".to_string()),
        )
        .await
        .unwrap();

    let wallet = services.wallet.balance(buyer.id).await.unwrap();
    assert_eq!(wallet.balance, Decimal::from(45_000));

    let detail = services.listings.detail(listing.id, None).await.unwrap();
    assert_eq!(detail.listing.quantity_available, Decimal::from(10));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_transfer_timeout_then_success_keeps_debit() {
    let pool = PgPool::connect(&database_url()).await.unwrap();
    let services = setup(&pool).await;
    let wallet = wallet_with_gateway(&pool, TimeoutTransferGateway { verify_status: "pending" });

    let farmer = register(&services, UserRole::Farmer).await;
    seed_balance(&pool, &farmer, Decimal::from(5000)).await;

    let reviewed = approve_with_timeout(&services, &wallet, &farmer).await;
    // 结果未知时不退款，等待回调
    assert_eq!(reviewed.status, WithdrawalStatus::Approved);
    assert_eq!(wallet.balance(farmer.id).await.unwrap().balance, Decimal::from(3000));

    // 查询仍在处理中，保持原状
    let reconciled = wallet.reconcile_transfer(reviewed.id).await.unwrap();
    assert_eq!(reconciled.status, WithdrawalStatus::Approved);

    // Paystack 实际已受理，随后回调 transfer.success
    let reference = reviewed.transfer_reference.clone().unwrap();
    let settled = wallet.settle_transfer(&reference, true, None).await.unwrap().unwrap();
    assert_eq!(settled.status, WithdrawalStatus::Paid);
    assert_eq!(wallet.balance(farmer.id).await.unwrap().balance, Decimal::from(3000));

    // 重复回调不再变动
    assert!(wallet.settle_transfer(&reference, false, None).await.unwrap().is_none());
    assert_eq!(wallet.balance(farmer.id).await.unwrap().balance, Decimal::from(3000));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_reconcile_failed_transfer_refunds_once() {
    let pool = PgPool::connect(&database_url()).await.unwrap();
    let services = setup(&pool).await;
    let wallet = wallet_with_gateway(&pool, TimeoutTransferGateway { verify_status: "failed" });

    let farmer = register(&services, UserRole::Farmer).await;
    seed_balance(&pool, &farmer, Decimal::from(5000)).await;

    let reviewed = approve_with_timeout(&services, &wallet, &farmer).await;
    assert_eq!(reviewed.status, WithdrawalStatus::Approved);

    let reconciled = wallet.reconcile_transfer(reviewed.id).await.unwrap();
    assert_eq!(reconciled.status, WithdrawalStatus::Failed);
    assert_eq!(wallet.balance(farmer.id).await.unwrap().balance, Decimal::from(5000));

    let again = wallet.reconcile_transfer(reviewed.id).await.unwrap();
    assert_eq!(again.status, WithdrawalStatus::Failed);
    assert_eq!(wallet.balance(farmer.id).await.unwrap().balance, Decimal::from(5000));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_expiry_worker_races_buyer_cancel() {
    let pool = PgPool::connect(&database_url()).await.unwrap();
    let services = setup(&pool).await;

    let farmer = register(&services, UserRole::Farmer).await;
    let buyer = register(&services, UserRole::Buyer).await;
    verify_farmer(&services, &farmer).await;

    let listing = services
        .listings
        .create(
            farmer.id,
            CreateListingRequest {
                title: "Yam Tubers".to_string(),
                description: String::new(),
                category: "tubers".to_string(),
                unit: "tuber".to_string(),
                price_per_unit: Decimal::from(800),
                quantity_available: Decimal::from(50),
                min_order_quantity: None,
                location: "Benue".to_string(),
                image_urls: vec![],
                pricing_tiers: vec![],
            },
        )
        .await
        .unwrap();
    services
        .cart
        .add(
            buyer.id,
            AddToCartRequest {
                listing_id: listing.id,
                quantity: Decimal::from(20),
            },
        )
        .await
        .unwrap();
    let result = services
        .checkout
        .checkout(
            buyer.id,
            CheckoutRequest {
                delivery_address: "5 Makurdi Road".to_string(),
                note: None,
                callback_url: None,
            },
        )
        .await
        .unwrap();
    let order_id = result.orders[0].id;

    // 以一小时后为当前时间，刚下的单即已超时
    let later = Utc::now() + Duration::hours(1);
    let (cancelled, expired) = tokio::join!(
        services.orders.transition(
            order_id,
            OrderAction::Cancel,
            Actor::user(buyer.id, UserRole::Buyer),
            Some("too slow".to_string()),
        ),
        services.orders.expire_unpaid(later),
    );

    // 任一方先拿到锁都可以，但不能出现死锁或数据库错误
    expired.unwrap();
    if let Err(e) = cancelled {
        assert!(
            !matches!(e, MarketError::Database(_) | MarketError::Shared(_)),
            "取消失败: {e}"
        );
    }

    let view = services
        .orders
        .detail(order_id, buyer.id, UserRole::Buyer)
        .await
        .unwrap();
    assert_eq!(view.order.status, OrderStatus::Cancelled);

    let payment = services
        .payments
        .payment_detail(&result.payment.reference, buyer.id, UserRole::Buyer)
        .await
        .unwrap();
    assert_eq!(payment.payment.status, PaymentStatus::Failed);

    // 库存只恢复一次
    let detail = services.listings.detail(listing.id, None).await.unwrap();
    assert_eq!(detail.listing.quantity_available, Decimal::from(50));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL"]
async fn test_release_claim_skips_orders_that_failed_this_run() {
    let pool = PgPool::connect(&database_url()).await.unwrap();
    let services = setup(&pool).await;

    let farmer = register(&services, UserRole::Farmer).await;
    let buyer = register(&services, UserRole::Buyer).await;
    verify_farmer(&services, &farmer).await;

    let listing = services
        .listings
        .create(
            farmer.id,
            CreateListingRequest {
                title: "Cassava".to_string(),
                description: String::new(),
                category: "tubers".to_string(),
                unit: "bag".to_string(),
                price_per_unit: Decimal::from(300),
                quantity_available: Decimal::from(40),
                min_order_quantity: None,
                location: "Ogun".to_string(),
                image_urls: vec![],
                pricing_tiers: vec![],
            },
        )
        .await
        .unwrap();
    services
        .cart
        .add(
            buyer.id,
            AddToCartRequest {
                listing_id: listing.id,
                quantity: Decimal::from(10),
            },
        )
        .await
        .unwrap();
    let result = services
        .checkout
        .checkout(
            buyer.id,
            CheckoutRequest {
                delivery_address: "9 Abeokuta Street".to_string(),
                note: None,
                callback_url: None,
            },
        )
        .await
        .unwrap();
    let kobo = escrow::to_kobo(result.payment.amount).unwrap();
    services
        .payments
        .confirm_charge(&result.payment.reference, kobo, None)
        .await
        .unwrap();
    let order_id = result.orders[0].id;
    let farmer_actor = Actor::user(farmer.id, UserRole::Farmer);
    for action in [OrderAction::Accept, OrderAction::Deliver] {
        services
            .orders
            .transition(order_id, action, farmer_actor, None)
            .await
            .unwrap();
    }

    let later = Utc::now() + Duration::days(365);
    let mut tx = pool.begin().await.unwrap();
    let skipped = OrderRepository::claim_due_for_release_in_tx(&mut tx, later, &[order_id], 1000)
        .await
        .unwrap();
    assert!(skipped.iter().all(|o| o.id != order_id));
    let claimed = OrderRepository::claim_due_for_release_in_tx(&mut tx, later, &[], 1000)
        .await
        .unwrap();
    assert!(claimed.iter().any(|o| o.id == order_id));
    tx.rollback().await.unwrap();
}
