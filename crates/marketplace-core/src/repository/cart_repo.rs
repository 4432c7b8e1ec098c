//! 购物车仓储

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::CartRepositoryTrait;
use crate::error::Result;
use crate::models::CartItem;

pub struct CartRepository {
    pool: PgPool,
}

impl CartRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, buyer_id: Uuid) -> Result<Vec<CartItem>> {
        let items = sqlx::query_as::<_, CartItem>(
            r#"
            SELECT id, buyer_id, listing_id, quantity, created_at, updated_at
            FROM cart_items
            WHERE buyer_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(buyer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn find(&self, buyer_id: Uuid, item_id: Uuid) -> Result<Option<CartItem>> {
        let item = sqlx::query_as::<_, CartItem>(
            r#"
            SELECT id, buyer_id, listing_id, quantity, created_at, updated_at
            FROM cart_items
            WHERE id = $1 AND buyer_id = $2
            "#,
        )
        .bind(item_id)
        .bind(buyer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn find_by_listing(
        &self,
        buyer_id: Uuid,
        listing_id: Uuid,
    ) -> Result<Option<CartItem>> {
        let item = sqlx::query_as::<_, CartItem>(
            r#"
            SELECT id, buyer_id, listing_id, quantity, created_at, updated_at
            FROM cart_items
            WHERE buyer_id = $1 AND listing_id = $2
            "#,
        )
        .bind(buyer_id)
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn upsert(
        &self,
        buyer_id: Uuid,
        listing_id: Uuid,
        quantity: Decimal,
    ) -> Result<CartItem> {
        let item = sqlx::query_as::<_, CartItem>(
            r#"
            INSERT INTO cart_items (id, buyer_id, listing_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (buyer_id, listing_id)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = NOW()
            RETURNING id, buyer_id, listing_id, quantity, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(buyer_id)
        .bind(listing_id)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn update_quantity(&self, item_id: Uuid, quantity: Decimal) -> Result<Option<CartItem>> {
        let item = sqlx::query_as::<_, CartItem>(
            r#"
            UPDATE cart_items SET quantity = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, buyer_id, listing_id, quantity, created_at, updated_at
            "#,
        )
        .bind(item_id)
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    pub async fn remove(&self, buyer_id: Uuid, item_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1 AND buyer_id = $2")
            .bind(item_id)
            .bind(buyer_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear(&self, buyer_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE buyer_id = $1")
            .bind(buyer_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ==================== 事务操作 ====================

    /// 结算时读取并锁定购物车，防止同一买家并发结算
    pub async fn lock_items_in_tx(tx: &mut PgConnection, buyer_id: Uuid) -> Result<Vec<CartItem>> {
        let items = sqlx::query_as::<_, CartItem>(
            r#"
            SELECT id, buyer_id, listing_id, quantity, created_at, updated_at
            FROM cart_items
            WHERE buyer_id = $1
            ORDER BY listing_id
            FOR UPDATE
            "#,
        )
        .bind(buyer_id)
        .fetch_all(&mut *tx)
        .await?;
        Ok(items)
    }

    pub async fn clear_in_tx(tx: &mut PgConnection, buyer_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE buyer_id = $1")
            .bind(buyer_id)
            .execute(&mut *tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CartRepositoryTrait for CartRepository {
    async fn list(&self, buyer_id: Uuid) -> Result<Vec<CartItem>> {
        self.list(buyer_id).await
    }

    async fn find(&self, buyer_id: Uuid, item_id: Uuid) -> Result<Option<CartItem>> {
        self.find(buyer_id, item_id).await
    }

    async fn find_by_listing(&self, buyer_id: Uuid, listing_id: Uuid) -> Result<Option<CartItem>> {
        self.find_by_listing(buyer_id, listing_id).await
    }

    async fn upsert(&self, buyer_id: Uuid, listing_id: Uuid, quantity: Decimal) -> Result<CartItem> {
        self.upsert(buyer_id, listing_id, quantity).await
    }

    async fn update_quantity(&self, item_id: Uuid, quantity: Decimal) -> Result<Option<CartItem>> {
        self.update_quantity(item_id, quantity).await
    }

    async fn remove(&self, buyer_id: Uuid, item_id: Uuid) -> Result<bool> {
        self.remove(buyer_id, item_id).await
    }

    async fn clear(&self, buyer_id: Uuid) -> Result<u64> {
        self.clear(buyer_id).await
    }
}
