//! 托管支付仓储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::PaymentRepositoryTrait;
use crate::error::Result;
use crate::models::{Payment, PaymentStatus};

const PAYMENT_COLUMNS: &str = "id, reference, buyer_id, amount, currency, status, provider, \
     authorization_url, paid_at, created_at, updated_at";

pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    pub async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = $1");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    pub async fn set_authorization_url(&self, id: Uuid, url: &str) -> Result<()> {
        sqlx::query(
            "UPDATE payments SET authorization_url = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== 事务操作 ====================

    pub async fn create_in_tx(tx: &mut PgConnection, payment: &Payment) -> Result<Payment> {
        let sql = format!(
            "INSERT INTO payments (id, reference, buyer_id, amount, currency, status, provider) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {PAYMENT_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Payment>(&sql)
            .bind(payment.id)
            .bind(&payment.reference)
            .bind(payment.buyer_id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.status)
            .bind(&payment.provider)
            .fetch_one(&mut *tx)
            .await?;
        Ok(created)
    }

    pub async fn lock_by_reference_in_tx(
        tx: &mut PgConnection,
        reference: &str,
    ) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = $1 FOR UPDATE");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(reference)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(payment)
    }

    pub async fn lock_in_tx(tx: &mut PgConnection, id: Uuid) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE");
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(payment)
    }

    /// 更新支付状态；`paid_at` 只在首次付款时写入
    pub async fn update_status_in_tx(
        tx: &mut PgConnection,
        id: Uuid,
        status: PaymentStatus,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<Payment> {
        let sql = format!(
            "UPDATE payments SET status = $2, paid_at = COALESCE(paid_at, $3), updated_at = NOW() \
             WHERE id = $1 RETURNING {PAYMENT_COLUMNS}"
        );
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(id)
            .bind(status)
            .bind(paid_at)
            .fetch_one(&mut *tx)
            .await?;
        Ok(payment)
    }

    /// 超时未付款的支付 id，不加锁
    ///
    /// 调用方按先订单后支付的顺序加锁，并在锁内复核状态
    pub async fn list_unpaid_ids(
        pool: &PgPool,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM payments \
             WHERE status = 'awaiting_payment' AND created_at < $1 \
             ORDER BY created_at \
             LIMIT $2",
        )
        .bind(created_before)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl PaymentRepositoryTrait for PaymentRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        self.find_by_id(id).await
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>> {
        self.find_by_reference(reference).await
    }

    async fn set_authorization_url(&self, id: Uuid, url: &str) -> Result<()> {
        self.set_authorization_url(id, url).await
    }
}
