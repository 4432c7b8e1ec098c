//! 结算服务
//!
//! ## 结算流程
//!
//! 1. 事务内锁定购物车与商品行（按商品 id 排序加锁）
//! 2. 逐行复核购买规则，按阶梯价锁定单价
//! 3. 扣减库存（归零时自动售罄）
//! 4. 创建一笔支付（`awaiting_payment`）和每行一张订单
//! 5. 清空购物车并提交
//! 6. 事务外初始化 Paystack 交易，失败不回滚订单，买家可稍后重新获取支付链接

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use agri_shared::cache::{Cache, CacheKey};
use agri_shared::config::MarketplaceConfig;
use agri_shared::observability::metrics as app_metrics;

use super::cart_service::check_purchase;
use super::dto::{CheckoutRequest, CheckoutResult};
use super::validate_request;
use crate::error::{MarketError, Result};
use crate::escrow;
use crate::integrations::{InitializeRequest, PaymentGateway};
use crate::models::{CartItem, Listing, Order, OrderStatus, Payment, PaymentStatus, User};
use crate::pricing::{self, PriceQuote, TierSpec};
use crate::repository::{
    CartRepository, ListingRepository, OrderRepository, PaymentRepository,
    PaymentRepositoryTrait, UserRepositoryTrait,
};

pub const PROVIDER: &str = "paystack";

/// 结算行：购物车项与锁定后的报价
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub listing: Listing,
    pub quote: PriceQuote,
}

/// 复核一行并报价
pub fn price_line(
    listing: &Listing,
    tiers: &[TierSpec],
    buyer_id: Uuid,
    quantity: Decimal,
) -> Result<PriceQuote> {
    check_purchase(listing, buyer_id, quantity)?;
    pricing::quote(listing.price_per_unit, tiers, quantity)
}

pub struct CheckoutService {
    pool: PgPool,
    users: Arc<dyn UserRepositoryTrait>,
    payments: Arc<dyn PaymentRepositoryTrait>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    cache: Option<Arc<Cache>>,
    config: MarketplaceConfig,
}

impl CheckoutService {
    pub fn new(
        pool: PgPool,
        users: Arc<dyn UserRepositoryTrait>,
        payments: Arc<dyn PaymentRepositoryTrait>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        config: MarketplaceConfig,
    ) -> Self {
        Self {
            pool,
            users,
            payments,
            gateway,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 结算购物车
    #[instrument(skip(self, req), fields(buyer_id = %buyer_id))]
    pub async fn checkout(&self, buyer_id: Uuid, req: CheckoutRequest) -> Result<CheckoutResult> {
        validate_request(&req)?;
        let buyer = self
            .users
            .find_by_id(buyer_id)
            .await?
            .ok_or(MarketError::UserNotFound(buyer_id))?;
        if !buyer.is_active() {
            return Err(MarketError::AccountSuspended);
        }

        let mut tx = self.pool.begin().await?;

        let mut items: Vec<CartItem> = CartRepository::lock_items_in_tx(&mut tx, buyer_id).await?;
        if items.is_empty() {
            return Err(MarketError::EmptyCart);
        }
        items.sort_by_key(|i| i.listing_id);

        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let listing = ListingRepository::lock_in_tx(&mut tx, item.listing_id)
                .await?
                .ok_or(MarketError::ListingNotFound(item.listing_id))?;
            let tiers = ListingRepository::find_tiers_in_tx(&mut tx, listing.id).await?;
            let specs: Vec<TierSpec> = tiers.iter().map(TierSpec::from).collect();
            let quote = price_line(&listing, &specs, buyer_id, item.quantity)?;

            ListingRepository::adjust_stock_in_tx(&mut tx, listing.id, -item.quantity).await?;
            lines.push(PricedLine { listing, quote });
        }

        let now = Utc::now();
        let total: Decimal = lines.iter().map(|l| l.quote.subtotal).sum();
        let payment = PaymentRepository::create_in_tx(
            &mut tx,
            &Payment {
                id: Uuid::now_v7(),
                reference: escrow::new_payment_reference(),
                buyer_id,
                amount: total,
                currency: self.config.currency.clone(),
                status: PaymentStatus::AwaitingPayment,
                provider: PROVIDER.to_string(),
                authorization_url: None,
                paid_at: None,
                created_at: now,
                updated_at: now,
            },
        )
        .await?;

        let mut orders = Vec::with_capacity(lines.len());
        for line in &lines {
            let order = OrderRepository::create_in_tx(
                &mut tx,
                &new_order(buyer_id, &payment, line, &req),
            )
            .await?;
            orders.push(order);
        }

        CartRepository::clear_in_tx(&mut tx, buyer_id).await?;
        tx.commit().await?;

        app_metrics::record_orders_created(orders.len() as u64);
        info!(
            payment_reference = %payment.reference,
            orders = orders.len(),
            amount = %payment.amount,
            "结算完成，等待付款"
        );

        for line in &lines {
            self.invalidate_listing(line.listing.id).await;
        }

        let callback_url = req
            .callback_url
            .clone()
            .or_else(|| self.config.payment_callback_url.clone());
        let authorization_url = self
            .initialize_payment(&buyer, &payment, &orders, callback_url)
            .await;
        let payment = Payment {
            authorization_url: authorization_url.clone(),
            ..payment
        };

        Ok(CheckoutResult {
            payment,
            orders,
            authorization_url,
        })
    }

    /// 重新获取支付链接
    ///
    /// 已有链接直接返回；初始化曾失败时重新向网关发起
    #[instrument(skip(self))]
    pub async fn payment_link(&self, buyer_id: Uuid, reference: &str) -> Result<Option<String>> {
        let payment = self
            .payments
            .find_by_reference(reference)
            .await?
            .filter(|p| p.buyer_id == buyer_id)
            .ok_or_else(|| MarketError::PaymentNotFound(reference.to_string()))?;
        if payment.status != PaymentStatus::AwaitingPayment {
            return Err(MarketError::Validation(format!(
                "支付状态为 {}，无需再次付款",
                payment.status
            )));
        }
        if payment.authorization_url.is_some() {
            return Ok(payment.authorization_url);
        }
        if self.gateway.is_none() {
            return Err(MarketError::NotConfigured("paystack"));
        }

        let buyer = self
            .users
            .find_by_id(buyer_id)
            .await?
            .ok_or(MarketError::UserNotFound(buyer_id))?;
        Ok(self
            .initialize_payment(&buyer, &payment, &[], self.config.payment_callback_url.clone())
            .await)
    }

    /// 初始化网关交易，失败只记录日志
    async fn initialize_payment(
        &self,
        buyer: &User,
        payment: &Payment,
        orders: &[Order],
        callback_url: Option<String>,
    ) -> Option<String> {
        let Some(gateway) = &self.gateway else {
            info!(
                payment_reference = %payment.reference,
                "Paystack 未配置，支付保持待付款状态"
            );
            return None;
        };

        let amount = match escrow::to_kobo(payment.amount) {
            Ok(kobo) => kobo,
            Err(e) => {
                warn!(error = %e, "支付金额换算失败");
                return None;
            }
        };
        let request = InitializeRequest {
            email: buyer.email.clone(),
            amount,
            reference: payment.reference.clone(),
            currency: payment.currency.clone(),
            callback_url,
            metadata: serde_json::json!({
                "paymentId": payment.id,
                "orderNos": orders.iter().map(|o| o.order_no.as_str()).collect::<Vec<_>>(),
            }),
        };

        match gateway.initialize_transaction(&request).await {
            Ok(initialized) => {
                if let Err(e) = self
                    .payments
                    .set_authorization_url(payment.id, &initialized.authorization_url)
                    .await
                {
                    warn!(error = %e, "保存支付链接失败");
                }
                Some(initialized.authorization_url)
            }
            Err(e) => {
                warn!(
                    payment_reference = %payment.reference,
                    error = %e,
                    "初始化 Paystack 交易失败"
                );
                None
            }
        }
    }

    async fn invalidate_listing(&self, listing_id: Uuid) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache
                .delete(&CacheKey::listing_detail(&listing_id.to_string()))
                .await
        {
            warn!(listing_id = %listing_id, error = %e, "清除商品缓存失败");
        }
    }
}

fn new_order(buyer_id: Uuid, payment: &Payment, line: &PricedLine, req: &CheckoutRequest) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::now_v7(),
        order_no: escrow::new_order_no(now),
        buyer_id,
        farmer_id: line.listing.farmer_id,
        listing_id: line.listing.id,
        payment_id: Some(payment.id),
        quantity: line.quote.quantity,
        unit_price: line.quote.unit_price,
        total_amount: line.quote.subtotal,
        platform_fee: None,
        status: OrderStatus::Pending,
        delivery_address: req.delivery_address.trim().to_string(),
        note: req.note.clone(),
        cancel_reason: None,
        accepted_at: None,
        delivered_at: None,
        completed_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{InitializedTransaction, MockPaymentGateway};
    use crate::models::UserRole;
    use crate::models::fixtures::{sample_listing, sample_user};
    use crate::repository::{MockPaymentRepositoryTrait, MockUserRepositoryTrait};

    fn lazy_pool() -> PgPool {
        PgPool::connect_lazy("postgres://localhost/agricompass_test").unwrap()
    }

    fn sample_payment(buyer_id: Uuid) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            reference: "AGR-TEST-1".to_string(),
            buyer_id,
            amount: Decimal::new(1234550, 2),
            currency: "NGN".to_string(),
            status: PaymentStatus::AwaitingPayment,
            provider: PROVIDER.to_string(),
            authorization_url: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_price_line_applies_tier() {
        let listing = sample_listing(Uuid::new_v4());
        let tiers = vec![TierSpec {
            min_quantity: Decimal::from(50),
            max_quantity: None,
            price_per_unit: Decimal::from(85),
        }];
        let quote = price_line(&listing, &tiers, Uuid::new_v4(), Decimal::from(60)).unwrap();
        assert_eq!(quote.unit_price, Decimal::from(85));
        assert_eq!(quote.subtotal, Decimal::from(5100));
    }

    #[test]
    fn test_price_line_rechecks_rules() {
        let listing = sample_listing(Uuid::new_v4());
        let err = price_line(&listing, &[], Uuid::new_v4(), Decimal::from(1000)).unwrap_err();
        assert!(matches!(err, MarketError::InsufficientStock { .. }));
    }

    #[test]
    fn test_new_order_locks_quote() {
        let buyer = Uuid::new_v4();
        let listing = sample_listing(Uuid::new_v4());
        let quote = pricing::quote(listing.price_per_unit, &[], Decimal::from(12)).unwrap();
        let payment = sample_payment(buyer);
        let req = CheckoutRequest {
            delivery_address: "  4 Ring Road, Ibadan ".to_string(),
            note: None,
            callback_url: None,
        };
        let order = new_order(buyer, &payment, &PricedLine { listing: listing.clone(), quote }, &req);

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.payment_id, Some(payment.id));
        assert_eq!(order.farmer_id, listing.farmer_id);
        assert_eq!(order.total_amount, Decimal::from(1200));
        assert_eq!(order.delivery_address, "4 Ring Road, Ibadan");
        assert!(order.order_no.starts_with("AGR-"));
    }

    #[tokio::test]
    async fn test_initialize_payment_without_gateway() {
        let service = CheckoutService::new(
            lazy_pool(),
            Arc::new(MockUserRepositoryTrait::new()),
            Arc::new(MockPaymentRepositoryTrait::new()),
            None,
            MarketplaceConfig::default(),
        );
        let buyer = sample_user(UserRole::Buyer);
        let payment = sample_payment(buyer.id);
        assert!(service
            .initialize_payment(&buyer, &payment, &[], None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_initialize_payment_sends_kobo_and_stores_url() {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initialize_transaction()
            .withf(|req| req.amount == 1_234_550 && req.email == "buyer@farm.ng")
            .times(1)
            .returning(|req| {
                Ok(InitializedTransaction {
                    authorization_url: "https://checkout.paystack.com/abc".to_string(),
                    access_code: "abc".to_string(),
                    reference: req.reference.clone(),
                })
            });
        let mut payments = MockPaymentRepositoryTrait::new();
        payments
            .expect_set_authorization_url()
            .times(1)
            .returning(|_, _| Ok(()));

        let service = CheckoutService::new(
            lazy_pool(),
            Arc::new(MockUserRepositoryTrait::new()),
            Arc::new(payments),
            Some(Arc::new(gateway)),
            MarketplaceConfig::default(),
        );
        let buyer = sample_user(UserRole::Buyer);
        let payment = sample_payment(buyer.id);
        let url = service
            .initialize_payment(&buyer, &payment, &[], None)
            .await;
        assert_eq!(url.as_deref(), Some("https://checkout.paystack.com/abc"));
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_payment_pending() {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initialize_transaction().returning(|_| {
            Err(MarketError::Upstream {
                service: "paystack".to_string(),
                message: "HTTP 400".to_string(),
            })
        });
        let mut payments = MockPaymentRepositoryTrait::new();
        payments.expect_set_authorization_url().never();

        let service = CheckoutService::new(
            lazy_pool(),
            Arc::new(MockUserRepositoryTrait::new()),
            Arc::new(payments),
            Some(Arc::new(gateway)),
            MarketplaceConfig::default(),
        );
        let buyer = sample_user(UserRole::Buyer);
        let payment = sample_payment(buyer.id);
        assert!(service
            .initialize_payment(&buyer, &payment, &[], None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_payment_link_returns_stored_url() {
        let buyer = Uuid::new_v4();
        let mut payment = sample_payment(buyer);
        payment.authorization_url = Some("https://checkout.paystack.com/xyz".to_string());
        let mut payments = MockPaymentRepositoryTrait::new();
        payments
            .expect_find_by_reference()
            .returning(move |_| Ok(Some(payment.clone())));

        let service = CheckoutService::new(
            lazy_pool(),
            Arc::new(MockUserRepositoryTrait::new()),
            Arc::new(payments),
            None,
            MarketplaceConfig::default(),
        );
        let url = service.payment_link(buyer, "AGR-TEST-1").await.unwrap();
        assert_eq!(url.as_deref(), Some("https://checkout.paystack.com/xyz"));

        let err = service
            .payment_link(Uuid::new_v4(), "AGR-TEST-1")
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::PaymentNotFound(_)));
    }
}
