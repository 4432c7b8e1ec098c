//! 商品与阶梯价仓储
//!
//! 结算时通过 `lock_in_tx` 对商品行加锁，保证并发下单时库存扣减正确

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::ListingRepositoryTrait;
use crate::error::Result;
use crate::models::{Listing, ListingFilter, ListingStatus, ListingUpdate, NewListing, PricingTier};
use crate::pricing::TierSpec;

const LISTING_COLUMNS: &str = "id, farmer_id, title, description, category, unit, price_per_unit, \
     quantity_available, min_order_quantity, location, image_urls, status, created_at, updated_at";

pub struct ListingRepository {
    pool: PgPool,
}

impl ListingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询操作 ====================

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Listing>> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1");
        let listing = sqlx::query_as::<_, Listing>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(listing)
    }

    pub async fn find_tiers(&self, listing_id: Uuid) -> Result<Vec<PricingTier>> {
        let tiers = sqlx::query_as::<_, PricingTier>(
            r#"
            SELECT id, listing_id, min_quantity, max_quantity, price_per_unit
            FROM pricing_tiers
            WHERE listing_id = $1
            ORDER BY min_quantity ASC
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tiers)
    }

    /// 分页搜索商品
    ///
    /// 未指定状态时只返回在售商品
    pub async fn search(&self, filter: &ListingFilter) -> Result<(Vec<Listing>, i64)> {
        let pattern = filter.query.as_ref().map(|q| format!("%{}%", q.trim()));
        let location = filter.location.as_ref().map(|l| format!("%{}%", l.trim()));
        let status = filter.status.unwrap_or(ListingStatus::Active);

        const WHERE_CLAUSE: &str = "WHERE status = $1 \
               AND ($2::text IS NULL OR title ILIKE $2 OR description ILIKE $2) \
               AND ($3::text IS NULL OR category = $3) \
               AND ($4::text IS NULL OR location ILIKE $4) \
               AND ($5::uuid IS NULL OR farmer_id = $5) \
               AND ($6::numeric IS NULL OR price_per_unit >= $6) \
               AND ($7::numeric IS NULL OR price_per_unit <= $7)";

        let count_sql = format!("SELECT COUNT(*) FROM listings {WHERE_CLAUSE}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(status)
            .bind(&pattern)
            .bind(&filter.category)
            .bind(&location)
            .bind(filter.farmer_id)
            .bind(filter.min_price)
            .bind(filter.max_price)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings {WHERE_CLAUSE} \
             ORDER BY created_at DESC LIMIT $8 OFFSET $9"
        );
        let listings = sqlx::query_as::<_, Listing>(&sql)
            .bind(status)
            .bind(&pattern)
            .bind(&filter.category)
            .bind(&location)
            .bind(filter.farmer_id)
            .bind(filter.min_price)
            .bind(filter.max_price)
            .bind(filter.page_size)
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((listings, total))
    }

    // ==================== 写入操作 ====================

    /// 创建商品及其阶梯价
    pub async fn create(&self, listing: &NewListing, tiers: &[TierSpec]) -> Result<Listing> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO listings (id, farmer_id, title, description, category, unit, price_per_unit, \
                 quantity_available, min_order_quantity, location, image_urls, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {LISTING_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Listing>(&sql)
            .bind(Uuid::now_v7())
            .bind(listing.farmer_id)
            .bind(&listing.title)
            .bind(&listing.description)
            .bind(&listing.category)
            .bind(&listing.unit)
            .bind(listing.price_per_unit)
            .bind(listing.quantity_available)
            .bind(listing.min_order_quantity)
            .bind(&listing.location)
            .bind(Json(&listing.image_urls))
            .bind(listing.status)
            .fetch_one(&mut *tx)
            .await?;

        Self::insert_tiers_in_tx(&mut tx, created.id, tiers).await?;
        tx.commit().await?;

        Ok(created)
    }

    pub async fn update(&self, id: Uuid, update: &ListingUpdate) -> Result<Option<Listing>> {
        let sql = format!(
            "UPDATE listings SET \
               title = COALESCE($2, title), \
               description = COALESCE($3, description), \
               category = COALESCE($4, category), \
               unit = COALESCE($5, unit), \
               price_per_unit = COALESCE($6, price_per_unit), \
               quantity_available = COALESCE($7, quantity_available), \
               min_order_quantity = COALESCE($8, min_order_quantity), \
               location = COALESCE($9, location), \
               image_urls = COALESCE($10, image_urls), \
               status = CASE \
                   WHEN status = 'sold_out' AND COALESCE($7, quantity_available) > 0 THEN 'active' \
                   WHEN status = 'active' AND COALESCE($7, quantity_available) = 0 THEN 'sold_out' \
                   ELSE status END, \
               updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {LISTING_COLUMNS}"
        );
        let listing = sqlx::query_as::<_, Listing>(&sql)
            .bind(id)
            .bind(&update.title)
            .bind(&update.description)
            .bind(&update.category)
            .bind(&update.unit)
            .bind(update.price_per_unit)
            .bind(update.quantity_available)
            .bind(update.min_order_quantity)
            .bind(&update.location)
            .bind(update.image_urls.as_ref().map(Json))
            .fetch_optional(&self.pool)
            .await?;
        Ok(listing)
    }

    pub async fn set_status(&self, id: Uuid, status: ListingStatus) -> Result<Option<Listing>> {
        let sql = format!(
            "UPDATE listings SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {LISTING_COLUMNS}"
        );
        let listing = sqlx::query_as::<_, Listing>(&sql)
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await?;
        Ok(listing)
    }

    /// 整体替换阶梯价
    pub async fn replace_tiers(
        &self,
        listing_id: Uuid,
        tiers: &[TierSpec],
    ) -> Result<Vec<PricingTier>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pricing_tiers WHERE listing_id = $1")
            .bind(listing_id)
            .execute(&mut *tx)
            .await?;
        let inserted = Self::insert_tiers_in_tx(&mut tx, listing_id, tiers).await?;

        sqlx::query("UPDATE listings SET updated_at = NOW() WHERE id = $1")
            .bind(listing_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    // ==================== 事务操作 ====================

    async fn insert_tiers_in_tx(
        tx: &mut PgConnection,
        listing_id: Uuid,
        tiers: &[TierSpec],
    ) -> Result<Vec<PricingTier>> {
        let mut inserted = Vec::with_capacity(tiers.len());
        for tier in tiers {
            let row = sqlx::query_as::<_, PricingTier>(
                r#"
                INSERT INTO pricing_tiers (id, listing_id, min_quantity, max_quantity, price_per_unit)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, listing_id, min_quantity, max_quantity, price_per_unit
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(listing_id)
            .bind(tier.min_quantity)
            .bind(tier.max_quantity)
            .bind(tier.price_per_unit)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(row);
        }
        inserted.sort_by(|a, b| a.min_quantity.cmp(&b.min_quantity));
        Ok(inserted)
    }

    /// 锁定商品行（SELECT ... FOR UPDATE）
    pub async fn lock_in_tx(tx: &mut PgConnection, id: Uuid) -> Result<Option<Listing>> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1 FOR UPDATE");
        let listing = sqlx::query_as::<_, Listing>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(listing)
    }

    pub async fn find_tiers_in_tx(tx: &mut PgConnection, listing_id: Uuid) -> Result<Vec<PricingTier>> {
        let tiers = sqlx::query_as::<_, PricingTier>(
            r#"
            SELECT id, listing_id, min_quantity, max_quantity, price_per_unit
            FROM pricing_tiers
            WHERE listing_id = $1
            "#,
        )
        .bind(listing_id)
        .fetch_all(&mut *tx)
        .await?;
        Ok(tiers)
    }

    /// 调整库存
    ///
    /// delta 为负表示扣减。库存归零时标记售罄，售罄商品补货后恢复在售
    pub async fn adjust_stock_in_tx(
        tx: &mut PgConnection,
        id: Uuid,
        delta: Decimal,
    ) -> Result<Listing> {
        let sql = format!(
            "UPDATE listings SET \
               quantity_available = quantity_available + $2, \
               status = CASE \
                   WHEN quantity_available + $2 = 0 AND status = 'active' THEN 'sold_out' \
                   WHEN quantity_available + $2 > 0 AND status = 'sold_out' THEN 'active' \
                   ELSE status END, \
               updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {LISTING_COLUMNS}"
        );
        let listing = sqlx::query_as::<_, Listing>(&sql)
            .bind(id)
            .bind(delta)
            .fetch_one(&mut *tx)
            .await?;
        Ok(listing)
    }

    /// 认证通过后上架农户被暂停的商品
    pub async fn activate_paused_for_farmer_in_tx(
        tx: &mut PgConnection,
        farmer_id: Uuid,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET status = CASE WHEN quantity_available > 0 THEN 'active' ELSE 'sold_out' END,
                updated_at = NOW()
            WHERE farmer_id = $1 AND status = 'paused'
            "#,
        )
        .bind(farmer_id)
        .execute(&mut *tx)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ListingRepositoryTrait for ListingRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Listing>> {
        self.find_by_id(id).await
    }

    async fn find_tiers(&self, listing_id: Uuid) -> Result<Vec<PricingTier>> {
        self.find_tiers(listing_id).await
    }

    async fn search(&self, filter: &ListingFilter) -> Result<(Vec<Listing>, i64)> {
        self.search(filter).await
    }

    async fn create(&self, listing: &NewListing, tiers: &[TierSpec]) -> Result<Listing> {
        self.create(listing, tiers).await
    }

    async fn update(&self, id: Uuid, update: &ListingUpdate) -> Result<Option<Listing>> {
        self.update(id, update).await
    }

    async fn set_status(&self, id: Uuid, status: ListingStatus) -> Result<Option<Listing>> {
        self.set_status(id, status).await
    }

    async fn replace_tiers(
        &self,
        listing_id: Uuid,
        tiers: &[TierSpec],
    ) -> Result<Vec<PricingTier>> {
        self.replace_tiers(listing_id, tiers).await
    }
}
