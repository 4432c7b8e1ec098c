//! 支付服务
//!
//! 处理 Paystack 回调与买家主动查询。`charge.success` 把支付置为托管，
//! 转账事件交给钱包服务结清提现。所有分支都可重复执行：
//! 支付状态与钱包流水参考号共同保证幂等。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use agri_shared::cache::{Cache, CacheKey};
use agri_shared::observability::metrics as app_metrics;

use super::dto::PaymentDetail;
use super::order_service::{OrderService, TransitionOutcome, next_payment_status};
use super::wallet_service::WalletService;
use crate::error::{MarketError, Result};
use crate::escrow;
use crate::integrations::PaymentGateway;
use crate::integrations::paystack::{self, PaystackEvent};
use crate::models::{
    Order, OrderStatus, Payment, PaymentStatus, UserRole, WalletEntry, WalletTxSource,
};
use crate::notification::{NotificationBuilder, NotificationService};
use crate::order_flow::{Actor, OrderAction};
use crate::repository::{
    OrderRepository, OrderRepositoryTrait, PaymentRepository, PaymentRepositoryTrait,
    WalletRepository,
};

/// 回调去重标记保留时间
const WEBHOOK_DEDUP_TTL: Duration = Duration::from_secs(24 * 3600);

/// 回调处理结果，始终向 Paystack 返回 200
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    /// 金额不符等，已记录但未入账
    Rejected,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
        }
    }
}

/// 迟到或金额不符的款项整笔退回买家钱包
fn late_refund_entry(payment: &Payment, amount_kobo: i64) -> WalletEntry {
    WalletEntry {
        user_id: payment.buyer_id,
        source: WalletTxSource::Refund,
        amount: escrow::from_kobo(amount_kobo),
        reference: escrow::late_payment_reference(&payment.reference),
        order_id: None,
        description: format!("Refund for unmatched payment {}", payment.reference),
    }
}

/// 付款前已被取消的订单，到账后退回对应金额
fn cancelled_order_refund(order: &Order) -> WalletEntry {
    WalletEntry {
        user_id: order.buyer_id,
        source: WalletTxSource::Refund,
        amount: order.total_amount,
        reference: escrow::refund_reference(&order.order_no),
        order_id: Some(order.id),
        description: format!("Refund for cancelled order {}", order.order_no),
    }
}

/// 到账事件的处理方案，在支付与订单行锁内决定
#[derive(Debug, Clone)]
enum ChargePlan {
    /// 金额相符：转入托管，退还付款前已取消的订单，再按订单状态推进支付
    Hold {
        refunds: Vec<WalletEntry>,
        settle_to: Option<PaymentStatus>,
    },
    /// 金额不符：作废待付款订单，到账金额整笔退回钱包
    RejectMismatch { expected_kobo: i64, refund: WalletEntry },
    /// 支付已过期后才到账
    LateRefund(WalletEntry),
    /// 已处理过的重复事件
    Duplicate(PaymentStatus),
}

fn plan_charge(payment: &Payment, orders: &[Order], amount_kobo: i64) -> Result<ChargePlan> {
    match payment.status {
        PaymentStatus::AwaitingPayment => {}
        PaymentStatus::Failed => return Ok(ChargePlan::LateRefund(late_refund_entry(payment, amount_kobo))),
        status => return Ok(ChargePlan::Duplicate(status)),
    }

    let expected_kobo = escrow::to_kobo(payment.amount)?;
    if amount_kobo != expected_kobo {
        return Ok(ChargePlan::RejectMismatch {
            expected_kobo,
            refund: late_refund_entry(payment, amount_kobo),
        });
    }

    let refunds = orders
        .iter()
        .filter(|o| o.status == OrderStatus::Cancelled)
        .map(cancelled_order_refund)
        .collect();
    let statuses: Vec<OrderStatus> = orders.iter().map(|o| o.status).collect();
    Ok(ChargePlan::Hold {
        refunds,
        settle_to: next_payment_status(PaymentStatus::Held, &statuses),
    })
}

pub struct PaymentService {
    pool: PgPool,
    payments: Arc<dyn PaymentRepositoryTrait>,
    orders: Arc<dyn OrderRepositoryTrait>,
    order_service: OrderService,
    wallet: WalletService,
    gateway: Option<Arc<dyn PaymentGateway>>,
    webhook_secret: Option<String>,
    cache: Option<Arc<Cache>>,
    notifications: NotificationService,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        payments: Arc<dyn PaymentRepositoryTrait>,
        orders: Arc<dyn OrderRepositoryTrait>,
        order_service: OrderService,
        wallet: WalletService,
        gateway: Option<Arc<dyn PaymentGateway>>,
        webhook_secret: Option<String>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            pool,
            payments,
            orders,
            order_service,
            wallet,
            gateway,
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()),
            cache: None,
            notifications,
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    // ==================== 回调 ====================

    /// 处理 Paystack 回调
    ///
    /// 签名无效返回错误（HTTP 401）；其余情况返回处理结果
    #[instrument(skip_all)]
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or(MarketError::NotConfigured("paystack"))?;
        if !paystack::verify_signature(secret, body, signature) {
            app_metrics::record_webhook("unknown", "invalid_signature");
            warn!("Paystack 回调签名校验失败");
            return Err(MarketError::InvalidWebhookSignature);
        }

        let event = paystack::parse_event(body)?;
        let dedup_key = event
            .reference()
            .map(|reference| CacheKey::webhook_event(event.name(), reference));

        if let (Some(cache), Some(key)) = (&self.cache, &dedup_key) {
            match cache.set_nx(key, &Utc::now().timestamp(), WEBHOOK_DEDUP_TTL).await {
                Ok(true) => {}
                Ok(false) => {
                    app_metrics::record_webhook(event.name(), WebhookOutcome::Duplicate.as_str());
                    info!(event = event.name(), "重复回调，已忽略");
                    return Ok(WebhookOutcome::Duplicate);
                }
                Err(e) => warn!(error = %e, "回调去重标记写入失败，继续处理"),
            }
        }

        match self.dispatch(&event).await {
            Ok(outcome) => {
                app_metrics::record_webhook(event.name(), outcome.as_str());
                info!(event = event.name(), outcome = outcome.as_str(), "回调处理完成");
                Ok(outcome)
            }
            Err(e) => {
                // 处理失败时撤销去重标记，允许 Paystack 重试
                if let (Some(cache), Some(key)) = (&self.cache, &dedup_key)
                    && let Err(del) = cache.delete(key).await
                {
                    warn!(error = %del, "撤销回调去重标记失败");
                }
                app_metrics::record_webhook(event.name(), "error");
                Err(e)
            }
        }
    }

    async fn dispatch(&self, event: &PaystackEvent) -> Result<WebhookOutcome> {
        match event {
            PaystackEvent::ChargeSuccess(data) => {
                self.confirm_charge(&data.reference, data.amount, data.paid_at)
                    .await
            }
            PaystackEvent::TransferSuccess(data) => {
                let settled = self.wallet.settle_transfer(&data.reference, true, None).await?;
                Ok(Self::settled_outcome(settled.is_some()))
            }
            PaystackEvent::TransferFailed(data) | PaystackEvent::TransferReversed(data) => {
                let reason = data.reason.as_deref().unwrap_or(event.name());
                let settled = self
                    .wallet
                    .settle_transfer(&data.reference, false, Some(reason))
                    .await?;
                Ok(Self::settled_outcome(settled.is_some()))
            }
            PaystackEvent::Unhandled(name) => {
                info!(event = %name, "未处理的回调事件");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    fn settled_outcome(applied: bool) -> WebhookOutcome {
        if applied {
            WebhookOutcome::Processed
        } else {
            WebhookOutcome::Duplicate
        }
    }

    /// 确认付款
    ///
    /// - 待付款且金额一致：置为托管，通知农户与买家
    /// - 金额不一致：支付失败，待处理订单取消，到账金额退回买家钱包
    /// - 已过期失败的支付：到账金额退回买家钱包，支付置为已退款
    /// - 已托管或已结清：重复事件，不做处理
    #[instrument(skip(self, paid_at))]
    pub async fn confirm_charge(
        &self,
        reference: &str,
        amount_kobo: i64,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<WebhookOutcome> {
        let found = self
            .payments
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| MarketError::PaymentNotFound(reference.to_string()))?;

        let mut tx = self.pool.begin().await?;
        let orders = OrderRepository::lock_by_payment_in_tx(&mut tx, found.id).await?;
        let payment = PaymentRepository::lock_in_tx(&mut tx, found.id)
            .await?
            .ok_or_else(|| MarketError::PaymentNotFound(reference.to_string()))?;

        let (refunds, settle_to) = match plan_charge(&payment, &orders, amount_kobo)? {
            ChargePlan::Hold { refunds, settle_to } => (refunds, settle_to),
            ChargePlan::Duplicate(status) => {
                info!(status = %status, "支付已确认，忽略重复事件");
                return Ok(WebhookOutcome::Duplicate);
            }
            ChargePlan::LateRefund(refund) => {
                let applied = WalletRepository::apply_entry_in_tx(&mut tx, &refund).await?;
                if applied.is_some() {
                    PaymentRepository::update_status_in_tx(
                        &mut tx,
                        payment.id,
                        PaymentStatus::Refunded,
                        paid_at,
                    )
                    .await?;
                }
                tx.commit().await?;

                if applied.is_none() {
                    return Ok(WebhookOutcome::Duplicate);
                }
                warn!(amount = %refund.amount, "支付已过期，款项退回买家钱包");
                app_metrics::record_payment(PaymentStatus::Refunded.as_str());
                self.notifications.notify_async(NotificationBuilder::refund_issued(
                    payment.buyer_id,
                    &refund.reference,
                    refund.amount,
                ));
                return Ok(WebhookOutcome::Processed);
            }
            ChargePlan::RejectMismatch {
                expected_kobo,
                refund,
            } => {
                let outcomes = self
                    .reject_mismatched_in_tx(&mut tx, &payment, orders, &refund)
                    .await?;
                tx.commit().await?;

                warn!(
                    expected_kobo,
                    actual_kobo = amount_kobo,
                    "{}",
                    MarketError::PaymentAmountMismatch {
                        expected: expected_kobo.to_string(),
                        actual: amount_kobo.to_string(),
                    }
                );
                app_metrics::record_payment(PaymentStatus::Failed.as_str());
                for outcome in &outcomes {
                    self.order_service.publish(outcome, Actor::System);
                }
                self.notifications.notify_async(NotificationBuilder::refund_issued(
                    payment.buyer_id,
                    &refund.reference,
                    refund.amount,
                ));
                return Ok(WebhookOutcome::Rejected);
            }
        };

        let held = PaymentRepository::update_status_in_tx(
            &mut tx,
            payment.id,
            PaymentStatus::Held,
            Some(paid_at.unwrap_or_else(Utc::now)),
        )
        .await?;

        let mut applied_refunds = Vec::new();
        for entry in refunds {
            if WalletRepository::apply_entry_in_tx(&mut tx, &entry).await?.is_some() {
                applied_refunds.push(entry);
            }
        }
        let settled = match settle_to {
            Some(next) => {
                PaymentRepository::update_status_in_tx(&mut tx, payment.id, next, None).await?
            }
            None => held,
        };
        tx.commit().await?;

        app_metrics::record_payment(settled.status.as_str());
        info!(
            amount = %settled.amount,
            status = %settled.status,
            orders = orders.len(),
            "付款已确认"
        );

        let mut notifications = vec![NotificationBuilder::payment_received(
            settled.buyer_id,
            &settled.reference,
            settled.amount,
        )];
        for order in orders.iter().filter(|o| o.status == OrderStatus::Pending) {
            let title = match self.orders.find_view(order.id).await {
                Ok(Some(view)) => view.listing_title,
                Ok(None) => String::new(),
                Err(e) => {
                    warn!(order_no = %order.order_no, error = %e, "查询订单商品失败");
                    String::new()
                }
            };
            notifications.push(NotificationBuilder::order_placed(order, &title));
        }
        for entry in &applied_refunds {
            notifications.push(NotificationBuilder::refund_issued(
                entry.user_id,
                &entry.reference,
                entry.amount,
            ));
        }
        self.notifications.notify_all_async(notifications);

        Ok(WebhookOutcome::Processed)
    }

    async fn reject_mismatched_in_tx(
        &self,
        tx: &mut PgConnection,
        payment: &Payment,
        orders: Vec<Order>,
        refund: &WalletEntry,
    ) -> Result<Vec<TransitionOutcome>> {
        let mut outcomes = Vec::new();
        for order in orders.into_iter().filter(|o| o.status == OrderStatus::Pending) {
            let outcome = self
                .order_service
                .apply_in_tx(
                    &mut *tx,
                    order,
                    OrderAction::Expire,
                    Actor::System,
                    Some("payment amount mismatch"),
                )
                .await?;
            outcomes.push(outcome);
        }

        let current = PaymentRepository::lock_in_tx(&mut *tx, payment.id).await?;
        if current.is_some_and(|p| p.status == PaymentStatus::AwaitingPayment) {
            PaymentRepository::update_status_in_tx(&mut *tx, payment.id, PaymentStatus::Failed, None)
                .await?;
        }
        WalletRepository::apply_entry_in_tx(&mut *tx, refund).await?;
        Ok(outcomes)
    }

    // ==================== 查询 ====================

    /// 买家主动查询支付结果，回调未到达时的补偿路径
    #[instrument(skip(self))]
    pub async fn verify_reference(&self, buyer_id: Uuid, reference: &str) -> Result<PaymentDetail> {
        let payment = self.find_owned(reference, buyer_id, UserRole::Buyer).await?;

        if matches!(
            payment.status,
            PaymentStatus::AwaitingPayment | PaymentStatus::Failed
        ) {
            let gateway = self
                .gateway
                .as_ref()
                .ok_or(MarketError::NotConfigured("paystack"))?;
            let verified = gateway.verify_transaction(reference).await?;
            if verified.is_successful() {
                let outcome = self
                    .confirm_charge(reference, verified.amount, verified.paid_at)
                    .await?;
                info!(outcome = outcome.as_str(), "主动查询确认付款");
            } else {
                info!(status = %verified.status, "交易尚未成功");
            }
        }

        self.payment_detail(reference, buyer_id, UserRole::Buyer).await
    }

    /// 支付详情，仅付款买家与管理员可见
    pub async fn payment_detail(
        &self,
        reference: &str,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<PaymentDetail> {
        let payment = self.find_owned(reference, user_id, role).await?;
        let orders = self.orders.list_by_payment(payment.id).await?;
        Ok(PaymentDetail { payment, orders })
    }

    async fn find_owned(&self, reference: &str, user_id: Uuid, role: UserRole) -> Result<Payment> {
        self.payments
            .find_by_reference(reference)
            .await?
            .filter(|p| role == UserRole::Admin || p.buyer_id == user_id)
            .ok_or_else(|| MarketError::PaymentNotFound(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agri_shared::config::MarketplaceConfig;
    use agri_shared::crypto::{FieldEncryptor, hmac_sha512_hex};
    use crate::integrations::MockPaymentGateway;
    use crate::models::fixtures::sample_order;
    use crate::notification::NoopPublisher;
    use crate::repository::{
        MockNotificationRepositoryTrait, MockOrderRepositoryTrait, MockPaymentRepositoryTrait,
        MockUserRepositoryTrait, MockWalletRepositoryTrait,
    };
    use rust_decimal::Decimal;
    use serde_json::json;

    const SECRET: &str = "sk_test_secret";

    fn payment(buyer_id: Uuid, status: PaymentStatus) -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            reference: "AGR-0190abc".to_string(),
            buyer_id,
            amount: Decimal::new(90000, 2),
            currency: "NGN".to_string(),
            status,
            provider: "paystack".to_string(),
            authorization_url: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn service(
        payments: MockPaymentRepositoryTrait,
        orders: MockOrderRepositoryTrait,
        gateway: Option<MockPaymentGateway>,
        secret: Option<&str>,
    ) -> PaymentService {
        let pool = PgPool::connect_lazy("postgres://localhost/agricompass_test").unwrap();
        let notifications = NotificationService::new(
            Arc::new(MockNotificationRepositoryTrait::new()),
            Arc::new(MockUserRepositoryTrait::new()),
        );
        let config = MarketplaceConfig::default();
        let order_service = OrderService::new(
            pool.clone(),
            Arc::new(MockOrderRepositoryTrait::new()),
            notifications.clone(),
            Arc::new(NoopPublisher),
            config.clone(),
        );
        let wallet = WalletService::new(
            pool.clone(),
            Arc::new(MockWalletRepositoryTrait::new()),
            None,
            Arc::new(FieldEncryptor::passthrough()),
            notifications.clone(),
            config,
        );
        PaymentService::new(
            pool,
            Arc::new(payments),
            Arc::new(orders),
            order_service,
            wallet,
            gateway.map(|g| Arc::new(g) as Arc<dyn PaymentGateway>),
            secret.map(str::to_string),
            notifications,
        )
    }

    #[test]
    fn test_late_refund_entry() {
        let p = payment(Uuid::new_v4(), PaymentStatus::Failed);
        let entry = late_refund_entry(&p, 90000);
        assert_eq!(entry.amount, Decimal::new(90000, 2));
        assert_eq!(entry.reference, "refund:payment:AGR-0190abc");
        assert_eq!(entry.user_id, p.buyer_id);
    }

    #[test]
    fn test_cancelled_order_refund_shares_order_reference() {
        let order = sample_order(Uuid::new_v4(), Uuid::new_v4(), OrderStatus::Cancelled);
        let entry = cancelled_order_refund(&order);
        assert_eq!(entry.reference, escrow::refund_reference(&order.order_no));
        assert_eq!(entry.amount, order.total_amount);
    }

    fn order_for(payment: &Payment, status: OrderStatus, total: Decimal) -> Order {
        let mut order = sample_order(payment.buyer_id, Uuid::new_v4(), status);
        order.payment_id = Some(payment.id);
        order.total_amount = total;
        order
    }

    #[test]
    fn test_matching_amount_moves_payment_to_held() {
        let p = payment(Uuid::new_v4(), PaymentStatus::AwaitingPayment);
        let orders = vec![
            order_for(&p, OrderStatus::Pending, Decimal::new(60000, 2)),
            order_for(&p, OrderStatus::Pending, Decimal::new(30000, 2)),
        ];

        match plan_charge(&p, &orders, 90000).unwrap() {
            ChargePlan::Hold { refunds, settle_to } => {
                assert!(refunds.is_empty());
                // 订单仍在进行中，支付停留在托管
                assert_eq!(settle_to, None);
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn test_charge_after_partial_cancel_refunds_cancelled_order() {
        let p = payment(Uuid::new_v4(), PaymentStatus::AwaitingPayment);
        let cancelled = order_for(&p, OrderStatus::Cancelled, Decimal::new(30000, 2));
        let orders = vec![
            order_for(&p, OrderStatus::Pending, Decimal::new(60000, 2)),
            cancelled.clone(),
        ];

        let ChargePlan::Hold { refunds, settle_to } = plan_charge(&p, &orders, 90000).unwrap() else {
            panic!("expected hold");
        };
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].order_id, Some(cancelled.id));
        assert_eq!(refunds[0].amount, Decimal::new(30000, 2));
        assert_eq!(settle_to, None);
    }

    #[test]
    fn test_charge_after_all_cancelled_settles_as_refunded() {
        let p = payment(Uuid::new_v4(), PaymentStatus::AwaitingPayment);
        let orders = vec![order_for(&p, OrderStatus::Cancelled, Decimal::new(90000, 2))];

        let ChargePlan::Hold { refunds, settle_to } = plan_charge(&p, &orders, 90000).unwrap() else {
            panic!("expected hold");
        };
        assert_eq!(refunds.len(), 1);
        assert_eq!(settle_to, Some(PaymentStatus::Refunded));
    }

    #[test]
    fn test_amount_mismatch_refunds_what_was_paid() {
        let p = payment(Uuid::new_v4(), PaymentStatus::AwaitingPayment);
        let orders = vec![order_for(&p, OrderStatus::Pending, Decimal::new(90000, 2))];

        match plan_charge(&p, &orders, 50000).unwrap() {
            ChargePlan::RejectMismatch {
                expected_kobo,
                refund,
            } => {
                assert_eq!(expected_kobo, 90000);
                assert_eq!(refund.amount, Decimal::new(50000, 2));
                assert_eq!(refund.user_id, p.buyer_id);
                assert_eq!(refund.reference, escrow::late_payment_reference(&p.reference));
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn test_charge_on_expired_or_settled_payment() {
        let expired = payment(Uuid::new_v4(), PaymentStatus::Failed);
        assert!(matches!(
            plan_charge(&expired, &[], 90000).unwrap(),
            ChargePlan::LateRefund(ref e) if e.amount == Decimal::new(90000, 2)
        ));

        let held = payment(Uuid::new_v4(), PaymentStatus::Held);
        assert!(matches!(
            plan_charge(&held, &[], 90000).unwrap(),
            ChargePlan::Duplicate(PaymentStatus::Held)
        ));
    }

    #[tokio::test]
    async fn test_webhook_requires_secret() {
        let svc = service(
            MockPaymentRepositoryTrait::new(),
            MockOrderRepositoryTrait::new(),
            None,
            None,
        );
        let err = svc.handle_webhook(b"{}", Some("abc")).await.unwrap_err();
        assert!(matches!(err, MarketError::NotConfigured("paystack")));
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let svc = service(
            MockPaymentRepositoryTrait::new(),
            MockOrderRepositoryTrait::new(),
            None,
            Some(SECRET),
        );
        let body = json!({ "event": "charge.success", "data": {} }).to_string();

        let err = svc
            .handle_webhook(body.as_bytes(), Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::InvalidWebhookSignature));

        let err = svc.handle_webhook(body.as_bytes(), None).await.unwrap_err();
        assert!(matches!(err, MarketError::InvalidWebhookSignature));
    }

    #[tokio::test]
    async fn test_webhook_ignores_unknown_event() {
        let svc = service(
            MockPaymentRepositoryTrait::new(),
            MockOrderRepositoryTrait::new(),
            None,
            Some(SECRET),
        );
        let body = json!({ "event": "subscription.create", "data": {} }).to_string();
        let signature = hmac_sha512_hex(SECRET.as_bytes(), body.as_bytes());

        let outcome = svc
            .handle_webhook(body.as_bytes(), Some(&signature))
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_charge_for_unknown_reference() {
        let mut payments = MockPaymentRepositoryTrait::new();
        payments.expect_find_by_reference().returning(|_| Ok(None));
        let svc = service(payments, MockOrderRepositoryTrait::new(), None, Some(SECRET));

        let body = json!({
            "event": "charge.success",
            "data": { "reference": "AGR-missing", "amount": 90000 }
        })
        .to_string();
        let signature = hmac_sha512_hex(SECRET.as_bytes(), body.as_bytes());

        let err = svc
            .handle_webhook(body.as_bytes(), Some(&signature))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::PaymentNotFound(_)));
    }

    #[tokio::test]
    async fn test_verify_skips_gateway_when_already_held() {
        let buyer = Uuid::new_v4();
        let held = payment(buyer, PaymentStatus::Held);
        let payment_id = held.id;

        let mut payments = MockPaymentRepositoryTrait::new();
        payments
            .expect_find_by_reference()
            .returning(move |_| Ok(Some(held.clone())));
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_list_by_payment()
            .withf(move |id| *id == payment_id)
            .returning(move |_| Ok(vec![sample_order(buyer, Uuid::new_v4(), OrderStatus::Pending)]));

        // 网关没有设置任何期望，被调用即失败
        let svc = service(payments, orders, Some(MockPaymentGateway::new()), Some(SECRET));
        let detail = svc.verify_reference(buyer, "AGR-0190abc").await.unwrap();
        assert_eq!(detail.payment.status, PaymentStatus::Held);
        assert_eq!(detail.orders.len(), 1);
    }

    #[tokio::test]
    async fn test_verify_without_gateway() {
        let buyer = Uuid::new_v4();
        let awaiting = payment(buyer, PaymentStatus::AwaitingPayment);
        let mut payments = MockPaymentRepositoryTrait::new();
        payments
            .expect_find_by_reference()
            .returning(move |_| Ok(Some(awaiting.clone())));

        let svc = service(payments, MockOrderRepositoryTrait::new(), None, None);
        let err = svc.verify_reference(buyer, "AGR-0190abc").await.unwrap_err();
        assert!(matches!(err, MarketError::NotConfigured("paystack")));
    }

    #[tokio::test]
    async fn test_payment_detail_hidden_from_other_buyers() {
        let owner = Uuid::new_v4();
        let held = payment(owner, PaymentStatus::Held);
        let mut payments = MockPaymentRepositoryTrait::new();
        payments
            .expect_find_by_reference()
            .returning(move |_| Ok(Some(held.clone())));
        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_list_by_payment().returning(|_| Ok(vec![]));

        let svc = service(payments, orders, None, None);
        let err = svc
            .payment_detail("AGR-0190abc", Uuid::new_v4(), UserRole::Buyer)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::PaymentNotFound(_)));

        let detail = svc
            .payment_detail("AGR-0190abc", Uuid::new_v4(), UserRole::Admin)
            .await
            .unwrap();
        assert_eq!(detail.payment.buyer_id, owner);
    }
}
