//! 统计查询
//!
//! 仪表盘使用的聚合 SQL，全部只读

use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ListingRevenue, MonthlyRevenue, OfficerDashboard, StatusCount};

pub struct AnalyticsRepository {
    pool: PgPool,
}

impl AnalyticsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 农户 ====================

    /// 已完成订单的 (毛收入, 净收入)
    pub async fn farmer_revenue(&self, farmer_id: Uuid) -> Result<(Decimal, Decimal)> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total_amount), 0) AS gross,
                   COALESCE(SUM(total_amount - COALESCE(platform_fee, 0)), 0) AS net
            FROM orders
            WHERE farmer_id = $1 AND status = 'completed'
            "#,
        )
        .bind(farmer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("gross"), row.get("net")))
    }

    /// 资金已托管、尚未完成的订单金额
    pub async fn farmer_pending_payout(&self, farmer_id: Uuid) -> Result<Decimal> {
        let amount: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(o.total_amount), 0)
            FROM orders o
            JOIN payments p ON p.id = o.payment_id
            WHERE o.farmer_id = $1
              AND o.status IN ('pending', 'accepted', 'delivered')
              AND p.status = 'held'
            "#,
        )
        .bind(farmer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(amount)
    }

    pub async fn farmer_active_listings(&self, farmer_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM listings WHERE farmer_id = $1 AND status = 'active'",
        )
        .bind(farmer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn farmer_top_listings(&self, farmer_id: Uuid, limit: i64) -> Result<Vec<ListingRevenue>> {
        let items = sqlx::query_as::<_, ListingRevenue>(
            r#"
            SELECT l.id AS listing_id, l.title,
                   SUM(o.total_amount) AS revenue,
                   SUM(o.quantity) AS quantity_sold,
                   COUNT(*) AS order_count
            FROM orders o
            JOIN listings l ON l.id = o.listing_id
            WHERE o.farmer_id = $1 AND o.status = 'completed'
            GROUP BY l.id, l.title
            ORDER BY revenue DESC
            LIMIT $2
            "#,
        )
        .bind(farmer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// 最近 12 个月（含当月）的完成订单收入，没有成交的月份不返回
    pub async fn farmer_monthly_revenue(&self, farmer_id: Uuid) -> Result<Vec<MonthlyRevenue>> {
        let items = sqlx::query_as::<_, MonthlyRevenue>(
            r#"
            SELECT to_char(date_trunc('month', completed_at), 'YYYY-MM') AS month,
                   SUM(total_amount) AS revenue,
                   COUNT(*) AS order_count
            FROM orders
            WHERE farmer_id = $1
              AND status = 'completed'
              AND completed_at >= date_trunc('month', NOW()) - INTERVAL '11 months'
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .bind(farmer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    // ==================== 订单分布 ====================

    /// 订单状态分布，buyer/farmer 均为空时统计全平台
    pub async fn orders_by_status(
        &self,
        buyer_id: Option<Uuid>,
        farmer_id: Option<Uuid>,
    ) -> Result<Vec<StatusCount>> {
        let items = sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT status, COUNT(*) AS count
            FROM orders
            WHERE ($1::uuid IS NULL OR buyer_id = $1)
              AND ($2::uuid IS NULL OR farmer_id = $2)
            GROUP BY status
            ORDER BY status
            "#,
        )
        .bind(buyer_id)
        .bind(farmer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    // ==================== 买家 ====================

    /// (已完成订单消费, 托管中金额)
    pub async fn buyer_spend(&self, buyer_id: Uuid) -> Result<(Decimal, Decimal)> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(o.total_amount) FILTER (WHERE o.status = 'completed'), 0) AS spent,
                   COALESCE(SUM(o.total_amount) FILTER (
                       WHERE o.status IN ('pending', 'accepted', 'delivered') AND p.status = 'held'
                   ), 0) AS in_escrow
            FROM orders o
            LEFT JOIN payments p ON p.id = o.payment_id
            WHERE o.buyer_id = $1
            "#,
        )
        .bind(buyer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("spent"), row.get("in_escrow")))
    }

    // ==================== 认证专员 ====================

    pub async fn officer_stats(&self, officer_id: Uuid) -> Result<OfficerDashboard> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) FILTER (WHERE status = 'pending') AS pending_queue,
                   COUNT(*) FILTER (WHERE status = 'in_review' AND officer_id = $1) AS in_review_by_me,
                   COUNT(*) FILTER (WHERE status = 'approved' AND officer_id = $1) AS approved_by_me,
                   COUNT(*) FILTER (WHERE status = 'rejected' AND officer_id = $1) AS rejected_by_me
            FROM verifications
            "#,
        )
        .bind(officer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(OfficerDashboard {
            pending_queue: row.get("pending_queue"),
            in_review_by_me: row.get("in_review_by_me"),
            approved_by_me: row.get("approved_by_me"),
            rejected_by_me: row.get("rejected_by_me"),
        })
    }

    // ==================== 管理员 ====================

    pub async fn users_by_role(&self) -> Result<Vec<StatusCount>> {
        let items = sqlx::query_as::<_, StatusCount>(
            "SELECT role AS status, COUNT(*) AS count FROM users GROUP BY role ORDER BY role",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn verified_farmers(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE role = 'farmer' AND is_verified",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// (成交额, 平台服务费)
    pub async fn platform_totals(&self) -> Result<(Decimal, Decimal)> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total_amount), 0) AS gmv,
                   COALESCE(SUM(platform_fee), 0) AS fees
            FROM orders
            WHERE status = 'completed'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("gmv"), row.get("fees")))
    }

    pub async fn escrow_held(&self) -> Result<Decimal> {
        let amount: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(o.total_amount), 0)
            FROM orders o
            JOIN payments p ON p.id = o.payment_id
            WHERE p.status = 'held' AND o.status IN ('pending', 'accepted', 'delivered')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(amount)
    }

    /// 待审核提现 (笔数, 金额)
    pub async fn pending_withdrawals(&self) -> Result<(i64, Decimal)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count, COALESCE(SUM(amount), 0) AS amount
            FROM withdrawals
            WHERE status = 'pending'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("count"), row.get("amount")))
    }

    pub async fn pending_verifications(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM verifications WHERE status IN ('pending', 'in_review')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
