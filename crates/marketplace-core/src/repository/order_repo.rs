//! 订单仓储
//!
//! 状态迁移全部在事务中完成：先 `lock_in_tx` 锁定订单，再 `update_status_in_tx`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::OrderRepositoryTrait;
use crate::error::Result;
use crate::models::{Order, OrderFilter, OrderStatus, OrderView};

const ORDER_COLUMNS: &str = "id, order_no, buyer_id, farmer_id, listing_id, payment_id, quantity, \
     unit_price, total_amount, platform_fee, status, delivery_address, note, cancel_reason, \
     accepted_at, delivered_at, completed_at, cancelled_at, created_at, updated_at";

const ORDER_VIEW_SELECT: &str = "SELECT o.id, o.order_no, o.buyer_id, o.farmer_id, o.listing_id, \
         o.payment_id, o.quantity, o.unit_price, o.total_amount, o.platform_fee, o.status, \
         o.delivery_address, o.note, o.cancel_reason, o.accepted_at, o.delivered_at, \
         o.completed_at, o.cancelled_at, o.created_at, o.updated_at, \
         l.title AS listing_title, l.unit AS listing_unit, \
         b.full_name AS buyer_name, f.full_name AS farmer_name, \
         p.status AS payment_status, p.reference AS payment_reference \
     FROM orders o \
     JOIN listings l ON l.id = o.listing_id \
     JOIN users b ON b.id = o.buyer_id \
     JOIN users f ON f.id = o.farmer_id \
     LEFT JOIN payments p ON p.id = o.payment_id";

pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询操作 ====================

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    pub async fn find_view(&self, id: Uuid) -> Result<Option<OrderView>> {
        let sql = format!("{ORDER_VIEW_SELECT} WHERE o.id = $1");
        let view = sqlx::query_as::<_, OrderView>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(view)
    }

    pub async fn list_views(&self, filter: &OrderFilter) -> Result<(Vec<OrderView>, i64)> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM orders
            WHERE ($1::uuid IS NULL OR buyer_id = $1)
              AND ($2::uuid IS NULL OR farmer_id = $2)
              AND ($3::text IS NULL OR status = $3)
            "#,
        )
        .bind(filter.buyer_id)
        .bind(filter.farmer_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "{ORDER_VIEW_SELECT} \
             WHERE ($1::uuid IS NULL OR o.buyer_id = $1) \
               AND ($2::uuid IS NULL OR o.farmer_id = $2) \
               AND ($3::text IS NULL OR o.status = $3) \
             ORDER BY o.created_at DESC LIMIT $4 OFFSET $5"
        );
        let views = sqlx::query_as::<_, OrderView>(&sql)
            .bind(filter.buyer_id)
            .bind(filter.farmer_id)
            .bind(status)
            .bind(filter.page_size)
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((views, total))
    }

    pub async fn list_by_payment(&self, payment_id: Uuid) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_id = $1 ORDER BY created_at"
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(payment_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    // ==================== 事务操作 ====================

    pub async fn create_in_tx(tx: &mut PgConnection, order: &Order) -> Result<Order> {
        let sql = format!(
            "INSERT INTO orders (id, order_no, buyer_id, farmer_id, listing_id, payment_id, quantity, \
                 unit_price, total_amount, status, delivery_address, note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {ORDER_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Order>(&sql)
            .bind(order.id)
            .bind(&order.order_no)
            .bind(order.buyer_id)
            .bind(order.farmer_id)
            .bind(order.listing_id)
            .bind(order.payment_id)
            .bind(order.quantity)
            .bind(order.unit_price)
            .bind(order.total_amount)
            .bind(order.status)
            .bind(&order.delivery_address)
            .bind(&order.note)
            .fetch_one(&mut *tx)
            .await?;
        Ok(created)
    }

    pub async fn lock_in_tx(tx: &mut PgConnection, id: Uuid) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE");
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(order)
    }

    /// 锁定同一支付下的全部订单，按 id 排序避免死锁
    pub async fn lock_by_payment_in_tx(tx: &mut PgConnection, payment_id: Uuid) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_id = $1 ORDER BY id FOR UPDATE"
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(payment_id)
            .fetch_all(&mut *tx)
            .await?;
        Ok(orders)
    }

    pub async fn statuses_for_payment_in_tx(
        tx: &mut PgConnection,
        payment_id: Uuid,
    ) -> Result<Vec<OrderStatus>> {
        let statuses = sqlx::query_scalar::<_, OrderStatus>(
            "SELECT status FROM orders WHERE payment_id = $1",
        )
        .bind(payment_id)
        .fetch_all(&mut *tx)
        .await?;
        Ok(statuses)
    }

    /// 更新订单状态并记录对应的时间戳
    pub async fn update_status_in_tx(
        tx: &mut PgConnection,
        id: Uuid,
        status: OrderStatus,
        cancel_reason: Option<&str>,
        platform_fee: Option<Decimal>,
    ) -> Result<Order> {
        let sql = format!(
            "UPDATE orders SET \
               status = $2, \
               cancel_reason = COALESCE($3, cancel_reason), \
               platform_fee = COALESCE($4, platform_fee), \
               accepted_at = CASE WHEN $2 = 'accepted' THEN NOW() ELSE accepted_at END, \
               delivered_at = CASE WHEN $2 = 'delivered' THEN NOW() ELSE delivered_at END, \
               completed_at = CASE WHEN $2 = 'completed' THEN NOW() ELSE completed_at END, \
               cancelled_at = CASE WHEN $2 IN ('cancelled', 'rejected') THEN NOW() ELSE cancelled_at END, \
               updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {ORDER_COLUMNS}"
        );
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(cancel_reason)
            .bind(platform_fee)
            .fetch_one(&mut *tx)
            .await?;
        Ok(order)
    }

    /// 领取超时未确认收货的订单，多实例并发时跳过已被锁定的行
    ///
    /// `skip` 为本轮已失败的订单，避免同一订单反复占住队首
    pub async fn claim_due_for_release_in_tx(
        tx: &mut PgConnection,
        delivered_before: DateTime<Utc>,
        skip: &[Uuid],
        limit: i64,
    ) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE status = 'delivered' AND delivered_at < $1 AND id <> ALL($2) \
             ORDER BY delivered_at \
             LIMIT $3 \
             FOR UPDATE SKIP LOCKED"
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(delivered_before)
            .bind(skip)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;
        Ok(orders)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        self.find_by_id(id).await
    }

    async fn find_view(&self, id: Uuid) -> Result<Option<OrderView>> {
        self.find_view(id).await
    }

    async fn list_views(&self, filter: &OrderFilter) -> Result<(Vec<OrderView>, i64)> {
        self.list_views(filter).await
    }

    async fn list_by_payment(&self, payment_id: Uuid) -> Result<Vec<Order>> {
        self.list_by_payment(payment_id).await
    }
}
