//! 商品、阶梯价与购物车实体

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::enums::ListingStatus;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Uuid,
    pub farmer_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    /// 计量单位（kg、crate、bag 等）
    pub unit: String,
    pub price_per_unit: Decimal,
    pub quantity_available: Decimal,
    pub min_order_quantity: Decimal,
    pub location: String,
    pub image_urls: Json<Vec<String>>,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_purchasable(&self) -> bool {
        self.status == ListingStatus::Active && self.quantity_available > Decimal::ZERO
    }
}

/// 批量阶梯价
///
/// `max_quantity` 为空表示无上限
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PricingTier {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub min_quantity: Decimal,
    pub max_quantity: Option<Decimal>,
    pub price_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub listing_id: Uuid,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建商品
#[derive(Debug, Clone)]
pub struct NewListing {
    pub farmer_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub unit: String,
    pub price_per_unit: Decimal,
    pub quantity_available: Decimal,
    pub min_order_quantity: Decimal,
    pub location: String,
    pub image_urls: Vec<String>,
    pub status: ListingStatus,
}

/// 商品部分更新，None 表示保持不变
#[derive(Debug, Clone, Default)]
pub struct ListingUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub price_per_unit: Option<Decimal>,
    pub quantity_available: Option<Decimal>,
    pub min_order_quantity: Option<Decimal>,
    pub location: Option<String>,
    pub image_urls: Option<Vec<String>>,
}

/// 商品查询条件
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub query: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub farmer_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    /// 为空时只查在售商品
    pub status: Option<ListingStatus>,
    pub page: i64,
    pub page_size: i64,
}

impl ListingFilter {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.page_size
    }
}

#[cfg(test)]
pub(crate) fn sample_listing(farmer_id: Uuid) -> Listing {
    let now = Utc::now();
    Listing {
        id: Uuid::new_v4(),
        farmer_id,
        title: "White Maize".to_string(),
        description: "Dry, sorted maize".to_string(),
        category: "grains".to_string(),
        unit: "kg".to_string(),
        price_per_unit: Decimal::new(10000, 2),
        quantity_available: Decimal::from(500),
        min_order_quantity: Decimal::from(5),
        location: "Kaduna".to_string(),
        image_urls: Json(vec![]),
        status: ListingStatus::Active,
        created_at: now,
        updated_at: now,
    }
}
