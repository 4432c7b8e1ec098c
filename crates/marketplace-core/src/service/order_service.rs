//! 订单服务
//!
//! 订单状态迁移与托管资金结算，以及两个后台任务：超时自动放款和未付款过期。
//!
//! ## 迁移流程
//!
//! 1. 锁定订单行，再锁定所属支付行（全局统一先订单后支付的加锁顺序）
//! 2. 校验操作者与状态图，接单要求资金已托管
//! 3. 计算副作用：归还库存、退款到买家钱包、放款到农户钱包
//! 4. 写入订单状态，按同一支付下全部订单的状态推导支付状态
//! 5. 提交后发送通知与实时推送（失败不影响迁移结果）

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use agri_shared::config::MarketplaceConfig;
use agri_shared::observability::metrics as app_metrics;

use super::normalize_page;
use crate::error::{MarketError, Result};
use crate::escrow::{self, Settlement};
use crate::models::{
    Order, OrderFilter, OrderStatus, OrderView, Page, Payment, PaymentStatus, UserRole,
    WalletEntry, WalletTxSource,
};
use crate::notification::{
    NotificationBuilder, NotificationService, OrderUpdate, RealtimeEvent, RealtimePublisher,
};
use crate::order_flow::{self, Actor, OrderAction};
use crate::repository::{
    ListingRepository, OrderRepository, OrderRepositoryTrait, PaymentRepository, WalletRepository,
};

/// 一次迁移需要执行的写操作
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub target: OrderStatus,
    /// 需要归还的库存数量
    pub restore_stock: Option<Decimal>,
    pub refund: Option<WalletEntry>,
    pub release: Option<(WalletEntry, Settlement)>,
}

impl TransitionPlan {
    pub fn platform_fee(&self) -> Option<Decimal> {
        self.release.as_ref().map(|(_, s)| s.fee)
    }
}

/// 迁移结果
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub order: Order,
    pub previous: OrderStatus,
    /// 实际写入的退款金额（重复请求时为 None）
    pub refunded: Option<Decimal>,
    /// 实际写入的放款金额（重复请求时为 None）
    pub released: Option<Decimal>,
    pub stock_restored: bool,
}

/// 计算迁移计划（不访问数据库）
pub fn plan_transition(
    order: &Order,
    payment: Option<&Payment>,
    action: OrderAction,
    actor: Actor,
    fee_bps: u32,
) -> Result<TransitionPlan> {
    let target = order_flow::authorize(order, action, actor)?;
    let funds_held = payment.is_some_and(|p| p.status == PaymentStatus::Held);

    if action == OrderAction::Accept && !funds_held {
        return Err(MarketError::OrderNotPaid);
    }

    let effects = order_flow::effects_of(target);

    let restore_stock = effects.restore_stock.then_some(order.quantity);

    let refund = (effects.refund_buyer && funds_held).then(|| WalletEntry {
        user_id: order.buyer_id,
        source: WalletTxSource::Refund,
        amount: order.total_amount,
        reference: escrow::refund_reference(&order.order_no),
        order_id: Some(order.id),
        description: format!("Refund for order {}", order.order_no),
    });

    let release = if effects.release_to_farmer {
        if !funds_held {
            return Err(MarketError::OrderNotPaid);
        }
        let settlement = escrow::settle(order.total_amount, fee_bps);
        Some((
            WalletEntry {
                user_id: order.farmer_id,
                source: WalletTxSource::EscrowRelease,
                amount: settlement.payout,
                reference: escrow::escrow_reference(&order.order_no),
                order_id: Some(order.id),
                description: format!(
                    "Payout for order {} (fee {})",
                    order.order_no, settlement.fee
                ),
            },
            settlement,
        ))
    } else {
        None
    };

    Ok(TransitionPlan {
        target,
        restore_stock,
        refund,
        release,
    })
}

/// 同一支付下订单状态变化后的支付状态
///
/// 托管中的支付在全部订单结清后变为已放款或已退款；
/// 尚未付款的支付在全部订单取消后变为失败
pub fn next_payment_status(current: PaymentStatus, statuses: &[OrderStatus]) -> Option<PaymentStatus> {
    let all_terminal = statuses.iter().all(|s| s.is_terminal());
    let next = match current {
        PaymentStatus::Held => escrow::settlement_status(statuses),
        PaymentStatus::AwaitingPayment if all_terminal => PaymentStatus::Failed,
        _ => return None,
    };
    (next != current && current.can_transition_to(next)).then_some(next)
}

#[derive(Clone)]
pub struct OrderService {
    pool: PgPool,
    orders: Arc<dyn OrderRepositoryTrait>,
    notifications: NotificationService,
    realtime: Arc<dyn RealtimePublisher>,
    config: MarketplaceConfig,
}

impl OrderService {
    pub fn new(
        pool: PgPool,
        orders: Arc<dyn OrderRepositoryTrait>,
        notifications: NotificationService,
        realtime: Arc<dyn RealtimePublisher>,
        config: MarketplaceConfig,
    ) -> Self {
        Self {
            pool,
            orders,
            notifications,
            realtime,
            config,
        }
    }

    /// 执行订单操作
    #[instrument(skip(self, reason), fields(order_id = %order_id, action = action.as_str()))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        action: OrderAction,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let order = OrderRepository::lock_in_tx(&mut tx, order_id)
            .await?
            .ok_or_else(|| MarketError::OrderNotFound(order_id.to_string()))?;
        let outcome = self
            .apply_in_tx(&mut tx, order, action, actor, reason.as_deref())
            .await?;
        tx.commit().await?;

        self.publish(&outcome, actor);
        Ok(outcome.order)
    }

    /// 在调用方事务内执行迁移
    pub async fn apply_in_tx(
        &self,
        tx: &mut PgConnection,
        order: Order,
        action: OrderAction,
        actor: Actor,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let payment = match order.payment_id {
            Some(payment_id) => PaymentRepository::lock_in_tx(&mut *tx, payment_id).await?,
            None => None,
        };
        let plan = plan_transition(
            &order,
            payment.as_ref(),
            action,
            actor,
            self.config.platform_fee_bps,
        )?;

        let stock_restored = match plan.restore_stock {
            Some(quantity) => {
                ListingRepository::adjust_stock_in_tx(&mut *tx, order.listing_id, quantity).await?;
                true
            }
            None => false,
        };

        let mut refunded = None;
        if let Some(entry) = &plan.refund {
            match WalletRepository::apply_entry_in_tx(&mut *tx, entry).await? {
                Some(_) => refunded = Some(entry.amount),
                None => warn!(reference = %entry.reference, "退款流水已存在，跳过"),
            }
        }

        let mut released = None;
        if let Some((entry, _)) = &plan.release {
            match WalletRepository::apply_entry_in_tx(&mut *tx, entry).await? {
                Some(_) => released = Some(entry.amount),
                None => warn!(reference = %entry.reference, "放款流水已存在，跳过"),
            }
        }

        let reason = match action {
            OrderAction::Expire => Some(reason.unwrap_or("payment timeout")),
            _ => reason,
        };
        let updated = OrderRepository::update_status_in_tx(
            &mut *tx,
            order.id,
            plan.target,
            reason,
            plan.platform_fee(),
        )
        .await?;

        if let Some(payment) = &payment {
            let statuses = OrderRepository::statuses_for_payment_in_tx(&mut *tx, payment.id).await?;
            if let Some(next) = next_payment_status(payment.status, &statuses) {
                PaymentRepository::update_status_in_tx(&mut *tx, payment.id, next, None).await?;
                app_metrics::record_payment(next.as_str());
                info!(payment_reference = %payment.reference, status = %next, "支付已结清");
            }
        }

        info!(
            order_no = %updated.order_no,
            from = %order.status,
            to = %updated.status,
            "订单状态已变更"
        );
        Ok(TransitionOutcome {
            order: updated,
            previous: order.status,
            refunded,
            released,
            stock_restored,
        })
    }

    /// 迁移完成后的通知与推送
    pub fn publish(&self, outcome: &TransitionOutcome, actor: Actor) {
        let order = &outcome.order;
        app_metrics::record_order_transition(order.status.as_str());

        let mut notifications: Vec<_> = order_flow::notify_targets(order, actor)
            .into_iter()
            .map(|recipient| NotificationBuilder::order_status_changed(order, recipient))
            .collect();
        if let Some(payout) = outcome.released {
            notifications.push(NotificationBuilder::escrow_released(order, payout));
        }
        if let Some(amount) = outcome.refunded {
            notifications.push(NotificationBuilder::refund_issued(
                order.buyer_id,
                &escrow::refund_reference(&order.order_no),
                amount,
            ));
        }
        self.notifications.notify_all_async(notifications);

        let event = RealtimeEvent::OrderUpdated(OrderUpdate {
            order_id: order.id,
            order_no: order.order_no.clone(),
            status: order.status,
        });
        for user_id in [order.buyer_id, order.farmer_id] {
            self.realtime.publish(user_id, &event);
        }
    }

    // ==================== 查询 ====================

    /// 订单列表：农户看卖出的，买家看买入的，管理员看全部
    pub async fn list(
        &self,
        user_id: Uuid,
        role: UserRole,
        status: Option<OrderStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<Page<OrderView>> {
        let (page, page_size) = normalize_page(page, page_size);
        let mut filter = OrderFilter {
            status,
            page,
            page_size,
            ..Default::default()
        };
        match role {
            UserRole::Farmer => filter.farmer_id = Some(user_id),
            UserRole::Buyer => filter.buyer_id = Some(user_id),
            UserRole::Admin => {}
            UserRole::FieldOfficer => {
                return Err(MarketError::Forbidden("农技员无权查看订单".to_string()));
            }
        }
        let (items, total) = self.orders.list_views(&filter).await?;
        Ok(Page::new(items, total, page, page_size))
    }

    /// 订单详情，仅买卖双方与管理员可见
    pub async fn detail(&self, order_id: Uuid, user_id: Uuid, role: UserRole) -> Result<OrderView> {
        let view = self
            .orders
            .find_view(order_id)
            .await?
            .ok_or_else(|| MarketError::OrderNotFound(order_id.to_string()))?;
        if role != UserRole::Admin && !view.order.is_party(user_id) {
            return Err(MarketError::OrderNotFound(order_id.to_string()));
        }
        Ok(view)
    }

    // ==================== 后台任务 ====================

    /// 买家超时未确认收货，系统自动完成并放款
    ///
    /// 每个订单单独一个事务，`SKIP LOCKED` 保证多实例不会重复处理；
    /// 失败的订单记录日志后跳过，下一轮再试
    #[instrument(skip(self))]
    pub async fn auto_release_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(self.config.auto_release_days);
        let mut processed = 0usize;
        let mut failed: Vec<Uuid> = Vec::new();

        while ((processed + failed.len()) as i64) < self.config.worker_batch_size {
            let mut tx = self.pool.begin().await?;
            let mut claimed =
                OrderRepository::claim_due_for_release_in_tx(&mut tx, cutoff, &failed, 1).await?;
            let Some(order) = claimed.pop() else {
                break;
            };
            let (order_id, order_no) = (order.id, order.order_no.clone());

            match self
                .apply_in_tx(&mut tx, order, OrderAction::AutoComplete, Actor::System, None)
                .await
            {
                Ok(outcome) => {
                    tx.commit().await?;
                    self.publish(&outcome, Actor::System);
                    processed += 1;
                }
                Err(e) => {
                    error!(order_no = %order_no, error = %e, "自动放款失败，本轮跳过");
                    failed.push(order_id);
                }
            }
        }

        app_metrics::record_worker_run("escrow_auto_release", processed as u64);
        if processed > 0 || !failed.is_empty() {
            info!(count = processed, failed = failed.len(), "自动放款完成");
        }
        Ok(processed)
    }

    /// 超时未付款：取消订单、归还库存，支付标记失败
    ///
    /// 候选支付不加锁读取；逐笔处理时先锁订单再锁支付，与买家取消、
    /// 支付回调的加锁顺序一致。单笔失败不影响其余支付
    #[instrument(skip(self))]
    pub async fn expire_unpaid(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::minutes(self.config.payment_timeout_minutes);
        let due =
            PaymentRepository::list_unpaid_ids(&self.pool, cutoff, self.config.worker_batch_size)
                .await?;
        let mut expired_payments = 0usize;

        for payment_id in due {
            match self.expire_payment(payment_id, cutoff).await {
                Ok(Some((payment, outcomes))) => {
                    for outcome in &outcomes {
                        self.publish(outcome, Actor::System);
                    }
                    app_metrics::record_payment(PaymentStatus::Failed.as_str());
                    info!(
                        payment_reference = %payment.reference,
                        orders = outcomes.len(),
                        "未付款订单已过期"
                    );
                    expired_payments += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(payment_id = %payment_id, error = %e, "过期处理失败，本轮跳过");
                }
            }
        }

        app_metrics::record_worker_run("unpaid_order_expiry", expired_payments as u64);
        Ok(expired_payments)
    }

    /// 返回 None 表示支付已被回调或其它实例处理
    async fn expire_payment(
        &self,
        payment_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<(Payment, Vec<TransitionOutcome>)>> {
        let mut tx = self.pool.begin().await?;
        let orders = OrderRepository::lock_by_payment_in_tx(&mut tx, payment_id).await?;
        let Some(payment) = PaymentRepository::lock_in_tx(&mut tx, payment_id).await? else {
            return Ok(None);
        };
        if !is_expirable(&payment, cutoff) {
            return Ok(None);
        }

        let mut outcomes = Vec::with_capacity(orders.len());
        for order in orders.into_iter().filter(|o| o.status == OrderStatus::Pending) {
            let outcome = self
                .apply_in_tx(&mut tx, order, OrderAction::Expire, Actor::System, None)
                .await?;
            outcomes.push(outcome);
        }

        // 没有待处理订单时（如已全部取消）也要结束支付
        let statuses = OrderRepository::statuses_for_payment_in_tx(&mut tx, payment_id).await?;
        if let Some(next) = next_payment_status(PaymentStatus::AwaitingPayment, &statuses) {
            let current = PaymentRepository::lock_in_tx(&mut tx, payment_id).await?;
            if current.is_some_and(|p| p.status == PaymentStatus::AwaitingPayment) {
                PaymentRepository::update_status_in_tx(&mut tx, payment_id, next, None).await?;
            }
        }
        tx.commit().await?;
        Ok(Some((payment, outcomes)))
    }
}

/// 仍在等待付款且已超过付款时限
pub fn is_expirable(payment: &Payment, cutoff: DateTime<Utc>) -> bool {
    payment.status == PaymentStatus::AwaitingPayment && payment.created_at < cutoff
}
