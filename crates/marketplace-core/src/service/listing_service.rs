//! 商品服务
//!
//! 商品发布与维护、公开搜索、详情（阶梯价、农户摘要与评分）以及报价。
//! 未认证农户发布的商品为 `paused`，认证通过后由认证服务统一上架。

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use agri_shared::cache::{Cache, CacheKey};

use super::dto::{CreateListingRequest, ListingDetail, UpdateListingRequest};
use super::{normalize_page, validate_request};
use crate::error::{MarketError, Result};
use crate::models::{
    Listing, ListingFilter, ListingStatus, ListingUpdate, NewListing, Page, PricingTier,
    RatingSummary, UserRole,
};
use crate::pricing::{self, PriceQuote, TierSpec};
use crate::repository::{ListingRepositoryTrait, ReviewRepositoryTrait, UserRepositoryTrait};

const DETAIL_TTL: Duration = Duration::from_secs(300);
const RATING_TTL: Duration = Duration::from_secs(600);

pub struct ListingService {
    listings: Arc<dyn ListingRepositoryTrait>,
    users: Arc<dyn UserRepositoryTrait>,
    reviews: Arc<dyn ReviewRepositoryTrait>,
    cache: Option<Arc<Cache>>,
}

impl ListingService {
    pub fn new(
        listings: Arc<dyn ListingRepositoryTrait>,
        users: Arc<dyn UserRepositoryTrait>,
        reviews: Arc<dyn ReviewRepositoryTrait>,
    ) -> Self {
        Self {
            listings,
            users,
            reviews,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 发布商品
    #[instrument(skip(self, req), fields(farmer_id = %farmer_id))]
    pub async fn create(&self, farmer_id: Uuid, req: CreateListingRequest) -> Result<Listing> {
        validate_request(&req)?;
        pricing::validate_tiers(&req.pricing_tiers)?;

        let farmer = self
            .users
            .find_by_id(farmer_id)
            .await?
            .ok_or(MarketError::UserNotFound(farmer_id))?;
        if farmer.role != UserRole::Farmer {
            return Err(MarketError::Forbidden("只有农户可以发布商品".to_string()));
        }

        let min_order_quantity = req.min_order_quantity.unwrap_or(Decimal::ONE);
        if min_order_quantity > req.quantity_available {
            return Err(MarketError::Validation(
                "最小起订量不能大于库存".to_string(),
            ));
        }

        let status = if farmer.can_publish_listings() {
            ListingStatus::Active
        } else {
            ListingStatus::Paused
        };

        let listing = self
            .listings
            .create(
                &NewListing {
                    farmer_id,
                    title: req.title.trim().to_string(),
                    description: req.description,
                    category: req.category.trim().to_lowercase(),
                    unit: req.unit,
                    price_per_unit: req.price_per_unit,
                    quantity_available: req.quantity_available,
                    min_order_quantity,
                    location: req.location,
                    image_urls: req.image_urls,
                    status,
                },
                &req.pricing_tiers,
            )
            .await?;

        info!(
            listing_id = %listing.id,
            status = %listing.status,
            tiers = req.pricing_tiers.len(),
            "商品已发布"
        );
        Ok(listing)
    }

    /// 更新商品（仅所有者）
    #[instrument(skip(self, req), fields(listing_id = %listing_id))]
    pub async fn update(
        &self,
        farmer_id: Uuid,
        listing_id: Uuid,
        req: UpdateListingRequest,
    ) -> Result<Listing> {
        validate_request(&req)?;
        let current = self.owned_listing(farmer_id, listing_id).await?;
        if current.status == ListingStatus::Archived {
            return Err(MarketError::ListingUnavailable(listing_id));
        }
        if let Some(quantity) = req.quantity_available
            && quantity < Decimal::ZERO
        {
            return Err(MarketError::Validation("库存不能为负数".to_string()));
        }

        let update = ListingUpdate {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
            category: req.category.map(|c| c.trim().to_lowercase()),
            unit: req.unit,
            price_per_unit: req.price_per_unit,
            quantity_available: req.quantity_available,
            min_order_quantity: req.min_order_quantity,
            location: req.location,
            image_urls: req.image_urls,
        };
        let listing = self
            .listings
            .update(listing_id, &update)
            .await?
            .ok_or(MarketError::ListingNotFound(listing_id))?;

        self.invalidate(listing_id).await;
        Ok(listing)
    }

    /// 农户修改商品状态
    ///
    /// - 只能切换为 active / paused / archived，售罄由库存驱动
    /// - 已下架商品不可恢复
    /// - 上架需要已认证且有库存
    #[instrument(skip(self), fields(listing_id = %listing_id, status = %status))]
    pub async fn set_status(
        &self,
        farmer_id: Uuid,
        listing_id: Uuid,
        status: ListingStatus,
    ) -> Result<Listing> {
        let current = self.owned_listing(farmer_id, listing_id).await?;
        if current.status == ListingStatus::Archived {
            return Err(MarketError::ListingUnavailable(listing_id));
        }

        match status {
            ListingStatus::SoldOut => {
                return Err(MarketError::Validation(
                    "售罄状态由库存自动维护".to_string(),
                ));
            }
            ListingStatus::Active => {
                let farmer = self
                    .users
                    .find_by_id(farmer_id)
                    .await?
                    .ok_or(MarketError::UserNotFound(farmer_id))?;
                if !farmer.can_publish_listings() {
                    return Err(MarketError::Forbidden(
                        "农户通过认证后才能上架商品".to_string(),
                    ));
                }
                if current.quantity_available <= Decimal::ZERO {
                    return Err(MarketError::InsufficientStock {
                        requested: "1".to_string(),
                        available: current.quantity_available.to_string(),
                    });
                }
            }
            ListingStatus::Paused | ListingStatus::Archived => {}
        }

        let listing = self
            .listings
            .set_status(listing_id, status)
            .await?
            .ok_or(MarketError::ListingNotFound(listing_id))?;
        self.invalidate(listing_id).await;
        info!("商品状态已更新");
        Ok(listing)
    }

    /// 整体替换阶梯价
    #[instrument(skip(self, tiers), fields(listing_id = %listing_id, count = tiers.len()))]
    pub async fn replace_tiers(
        &self,
        farmer_id: Uuid,
        listing_id: Uuid,
        tiers: Vec<TierSpec>,
    ) -> Result<Vec<PricingTier>> {
        pricing::validate_tiers(&tiers)?;
        self.owned_listing(farmer_id, listing_id).await?;
        let saved = self.listings.replace_tiers(listing_id, &tiers).await?;
        self.invalidate(listing_id).await;
        Ok(saved)
    }

    /// 公开搜索，默认只返回在售商品
    pub async fn search(&self, mut filter: ListingFilter) -> Result<Page<Listing>> {
        let (page, page_size) = normalize_page(filter.page, filter.page_size);
        filter.page = page;
        filter.page_size = page_size;
        if let (Some(min), Some(max)) = (filter.min_price, filter.max_price)
            && min > max
        {
            return Err(MarketError::Validation("最低价不能高于最高价".to_string()));
        }
        let (items, total) = self.listings.search(&filter).await?;
        Ok(Page::new(items, total, page, page_size))
    }

    /// 农户自己的商品（含暂停与售罄）
    pub async fn farmer_listings(
        &self,
        farmer_id: Uuid,
        status: Option<ListingStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Listing>> {
        let (page, page_size) = normalize_page(page, page_size);
        let filter = ListingFilter {
            farmer_id: Some(farmer_id),
            status,
            page,
            page_size,
            ..Default::default()
        };
        let (items, total) = self.listings.search(&filter).await?;
        Ok(Page::new(items, total, page, page_size))
    }

    /// 商品详情
    ///
    /// 非在售商品只对所有者可见
    #[instrument(skip(self))]
    pub async fn detail(&self, listing_id: Uuid, viewer: Option<Uuid>) -> Result<ListingDetail> {
        let detail = match self.cached_detail(listing_id).await {
            Some(detail) => detail,
            None => {
                let detail = self.load_detail(listing_id).await?;
                self.store_detail(&detail).await;
                detail
            }
        };

        let is_owner = viewer == Some(detail.listing.farmer_id);
        let visible = match detail.listing.status {
            ListingStatus::Active | ListingStatus::SoldOut => true,
            ListingStatus::Paused | ListingStatus::Archived => is_owner,
        };
        if !visible {
            return Err(MarketError::ListingNotFound(listing_id));
        }
        Ok(detail)
    }

    async fn load_detail(&self, listing_id: Uuid) -> Result<ListingDetail> {
        let listing = self
            .listings
            .find_by_id(listing_id)
            .await?
            .ok_or(MarketError::ListingNotFound(listing_id))?;
        let pricing_tiers = self.listings.find_tiers(listing_id).await?;
        let farmer = self
            .users
            .find_summary(listing.farmer_id)
            .await?
            .ok_or(MarketError::UserNotFound(listing.farmer_id))?;
        let farmer_rating = self.farmer_rating(listing.farmer_id).await?;

        Ok(ListingDetail {
            listing,
            pricing_tiers,
            farmer,
            farmer_rating,
        })
    }

    /// 按阶梯价报价
    pub async fn quote(&self, listing_id: Uuid, quantity: Decimal) -> Result<PriceQuote> {
        let listing = self
            .listings
            .find_by_id(listing_id)
            .await?
            .ok_or(MarketError::ListingNotFound(listing_id))?;
        let tiers = self.listings.find_tiers(listing_id).await?;
        let specs: Vec<TierSpec> = tiers.iter().map(TierSpec::from).collect();
        pricing::quote(listing.price_per_unit, &specs, quantity)
    }

    /// 农户评分汇总（带缓存）
    pub async fn farmer_rating(&self, farmer_id: Uuid) -> Result<RatingSummary> {
        let key = CacheKey::farmer_rating(&farmer_id.to_string());
        if let Some(cache) = &self.cache {
            match cache.get::<RatingSummary>(&key).await {
                Ok(Some(summary)) => return Ok(summary),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "读取评分缓存失败"),
            }
        }

        let summary = self.reviews.summary_for_farmer(farmer_id).await?;
        if let Some(cache) = &self.cache
            && let Err(e) = cache.set(&key, &summary, RATING_TTL).await
        {
            warn!(error = %e, "写入评分缓存失败");
        }
        Ok(summary)
    }

    async fn owned_listing(&self, farmer_id: Uuid, listing_id: Uuid) -> Result<Listing> {
        let listing = self
            .listings
            .find_by_id(listing_id)
            .await?
            .ok_or(MarketError::ListingNotFound(listing_id))?;
        if listing.farmer_id != farmer_id {
            return Err(MarketError::Forbidden("只能修改自己发布的商品".to_string()));
        }
        Ok(listing)
    }

    async fn cached_detail(&self, listing_id: Uuid) -> Option<ListingDetail> {
        let cache = self.cache.as_ref()?;
        match cache
            .get::<ListingDetail>(&CacheKey::listing_detail(&listing_id.to_string()))
            .await
        {
            Ok(hit) => {
                if hit.is_some() {
                    debug!(listing_id = %listing_id, "商品详情缓存命中");
                }
                hit
            }
            Err(e) => {
                warn!(error = %e, "读取商品详情缓存失败");
                None
            }
        }
    }

    async fn store_detail(&self, detail: &ListingDetail) {
        if let Some(cache) = &self.cache {
            let key = CacheKey::listing_detail(&detail.listing.id.to_string());
            if let Err(e) = cache.set(&key, detail, DETAIL_TTL).await {
                warn!(error = %e, "写入商品详情缓存失败");
            }
        }
    }

    /// 商品变更后清除详情缓存
    pub async fn invalidate(&self, listing_id: Uuid) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache
                .delete(&CacheKey::listing_detail(&listing_id.to_string()))
                .await
        {
            warn!(listing_id = %listing_id, error = %e, "清除商品缓存失败");
        }
    }

    /// 新评价后清除农户评分缓存
    pub async fn invalidate_rating(&self, farmer_id: Uuid) {
        if let Some(cache) = &self.cache
            && let Err(e) = cache
                .delete(&CacheKey::farmer_rating(&farmer_id.to_string()))
                .await
        {
            warn!(farmer_id = %farmer_id, error = %e, "清除评分缓存失败");
        }
    }
}
