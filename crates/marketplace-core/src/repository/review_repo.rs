//! 评价仓储

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::traits::ReviewRepositoryTrait;
use crate::error::{MarketError, Result};
use crate::models::{RatingSummary, Review, ReviewView};

pub struct ReviewRepository {
    pool: PgPool,
}

impl ReviewRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Review>> {
        let review = sqlx::query_as::<_, Review>(
            r#"
            SELECT id, order_id, listing_id, farmer_id, buyer_id, rating, comment, created_at
            FROM reviews
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(review)
    }

    /// 每个订单只能评价一次，由 order_id 唯一约束兜底
    pub async fn create(&self, review: &Review) -> Result<Review> {
        sqlx::query_as::<_, Review>(
            r#"
            INSERT INTO reviews (id, order_id, listing_id, farmer_id, buyer_id, rating, comment)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, order_id, listing_id, farmer_id, buyer_id, rating, comment, created_at
            "#,
        )
        .bind(review.id)
        .bind(review.order_id)
        .bind(review.listing_id)
        .bind(review.farmer_id)
        .bind(review.buyer_id)
        .bind(review.rating)
        .bind(&review.comment)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => MarketError::AlreadyReviewed,
            other => MarketError::Database(other),
        })
    }

    pub async fn list_for_listing(
        &self,
        listing_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ReviewView>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews WHERE listing_id = $1")
            .bind(listing_id)
            .fetch_one(&self.pool)
            .await?;

        let items = sqlx::query_as::<_, ReviewView>(
            r#"
            SELECT r.id, r.order_id, r.listing_id, r.farmer_id, r.buyer_id, r.rating, r.comment,
                   r.created_at, u.full_name AS buyer_name
            FROM reviews r
            JOIN users u ON u.id = r.buyer_id
            WHERE r.listing_id = $1
            ORDER BY r.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(listing_id)
        .bind(page_size)
        .bind((page.max(1) - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;

        Ok((items, total))
    }

    pub async fn summary_for_farmer(&self, farmer_id: Uuid) -> Result<RatingSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count,
                   AVG(rating)::float8 AS average,
                   COUNT(*) FILTER (WHERE rating = 1) AS r1,
                   COUNT(*) FILTER (WHERE rating = 2) AS r2,
                   COUNT(*) FILTER (WHERE rating = 3) AS r3,
                   COUNT(*) FILTER (WHERE rating = 4) AS r4,
                   COUNT(*) FILTER (WHERE rating = 5) AS r5
            FROM reviews
            WHERE farmer_id = $1
            "#,
        )
        .bind(farmer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(RatingSummary {
            average: row.get::<Option<f64>, _>("average"),
            count: row.get("count"),
            histogram: [
                row.get("r1"),
                row.get("r2"),
                row.get("r3"),
                row.get("r4"),
                row.get("r5"),
            ],
        })
    }
}

#[async_trait]
impl ReviewRepositoryTrait for ReviewRepository {
    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Review>> {
        self.find_by_order(order_id).await
    }

    async fn create(&self, review: &Review) -> Result<Review> {
        self.create(review).await
    }

    async fn list_for_listing(
        &self,
        listing_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ReviewView>, i64)> {
        self.list_for_listing(listing_id, page, page_size).await
    }

    async fn summary_for_farmer(&self, farmer_id: Uuid) -> Result<RatingSummary> {
        self.summary_for_farmer(farmer_id).await
    }
}
