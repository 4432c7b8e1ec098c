//! 购物车服务
//!
//! 加购时即校验商品状态、起订量与库存；查看购物车时按阶梯价实时报价。
//! 结算时在事务内对同样的规则再校验一次。

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use super::dto::{AddToCartRequest, CartLine, CartView, UpdateCartItemRequest};
use super::validate_request;
use crate::error::{MarketError, Result};
use crate::models::{CartItem, Listing};
use crate::pricing::{self, TierSpec};
use crate::repository::{CartRepositoryTrait, ListingRepositoryTrait};

/// 购买规则校验：在售、非本人商品、满足起订量、库存充足
pub fn check_purchase(listing: &Listing, buyer_id: Uuid, quantity: Decimal) -> Result<()> {
    if listing.farmer_id == buyer_id {
        return Err(MarketError::OwnListing);
    }
    if !listing.is_purchasable() {
        return Err(MarketError::ListingUnavailable(listing.id));
    }
    if quantity < listing.min_order_quantity {
        return Err(MarketError::BelowMinimumOrder {
            minimum: listing.min_order_quantity.to_string(),
        });
    }
    if quantity > listing.quantity_available {
        return Err(MarketError::InsufficientStock {
            requested: quantity.to_string(),
            available: listing.quantity_available.to_string(),
        });
    }
    Ok(())
}

pub struct CartService {
    cart: Arc<dyn CartRepositoryTrait>,
    listings: Arc<dyn ListingRepositoryTrait>,
}

impl CartService {
    pub fn new(
        cart: Arc<dyn CartRepositoryTrait>,
        listings: Arc<dyn ListingRepositoryTrait>,
    ) -> Self {
        Self { cart, listings }
    }

    /// 加入购物车，同一商品再次加入时覆盖数量
    #[instrument(skip(self, req), fields(buyer_id = %buyer_id, listing_id = %req.listing_id))]
    pub async fn add(&self, buyer_id: Uuid, req: AddToCartRequest) -> Result<CartItem> {
        validate_request(&req)?;
        let listing = self.find_listing(req.listing_id).await?;
        check_purchase(&listing, buyer_id, req.quantity)?;
        self.cart.upsert(buyer_id, req.listing_id, req.quantity).await
    }

    #[instrument(skip(self, req), fields(buyer_id = %buyer_id, item_id = %item_id))]
    pub async fn update(
        &self,
        buyer_id: Uuid,
        item_id: Uuid,
        req: UpdateCartItemRequest,
    ) -> Result<CartItem> {
        validate_request(&req)?;
        let item = self
            .cart
            .find(buyer_id, item_id)
            .await?
            .ok_or(MarketError::CartItemNotFound(item_id))?;
        let listing = self.find_listing(item.listing_id).await?;
        check_purchase(&listing, buyer_id, req.quantity)?;
        self.cart
            .update_quantity(item_id, req.quantity)
            .await?
            .ok_or(MarketError::CartItemNotFound(item_id))
    }

    pub async fn remove(&self, buyer_id: Uuid, item_id: Uuid) -> Result<()> {
        if self.cart.remove(buyer_id, item_id).await? {
            Ok(())
        } else {
            Err(MarketError::CartItemNotFound(item_id))
        }
    }

    pub async fn clear(&self, buyer_id: Uuid) -> Result<u64> {
        self.cart.clear(buyer_id).await
    }

    /// 查看购物车
    ///
    /// 每行按当前阶梯价报价；不满足购买规则的行附带 issue，不计入合计
    #[instrument(skip(self))]
    pub async fn view(&self, buyer_id: Uuid) -> Result<CartView> {
        let items = self.cart.list(buyer_id).await?;
        let mut lines = Vec::with_capacity(items.len());

        for item in items {
            let Some(listing) = self.listings.find_by_id(item.listing_id).await? else {
                // 商品已被删除时保留该行，提示买家移除
                lines.push(CartLine {
                    listing_title: String::new(),
                    listing_unit: String::new(),
                    farmer_id: Uuid::nil(),
                    available: Decimal::ZERO,
                    quote: None,
                    issue: Some(MarketError::ListingNotFound(item.listing_id).to_string()),
                    item,
                });
                continue;
            };

            let tiers = self.listings.find_tiers(listing.id).await?;
            let specs: Vec<TierSpec> = tiers.iter().map(TierSpec::from).collect();
            let issue = check_purchase(&listing, buyer_id, item.quantity)
                .err()
                .map(|e| e.to_string());
            let quote = pricing::quote(listing.price_per_unit, &specs, item.quantity).ok();

            lines.push(CartLine {
                listing_title: listing.title,
                listing_unit: listing.unit,
                farmer_id: listing.farmer_id,
                available: listing.quantity_available,
                quote,
                issue,
                item,
            });
        }

        let total = lines
            .iter()
            .filter(|l| l.issue.is_none())
            .filter_map(|l| l.quote.as_ref())
            .map(|q| q.subtotal)
            .sum();
        let checkout_ready = !lines.is_empty() && lines.iter().all(|l| l.issue.is_none());

        Ok(CartView {
            item_count: lines.len(),
            total,
            checkout_ready,
            lines,
        })
    }

    async fn find_listing(&self, listing_id: Uuid) -> Result<Listing> {
        self.listings
            .find_by_id(listing_id)
            .await?
            .ok_or(MarketError::ListingNotFound(listing_id))
    }
}
