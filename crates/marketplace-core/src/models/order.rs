//! 订单与托管支付实体

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{OrderStatus, PaymentStatus};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    /// 对外展示的订单号，如 AGR-20240601-7F3K2Q
    pub order_no: String,
    pub buyer_id: Uuid,
    pub farmer_id: Uuid,
    pub listing_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub quantity: Decimal,
    /// 下单时按阶梯价锁定的单价
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    /// 完成放款时计算
    pub platform_fee: Option<Decimal>,
    pub status: OrderStatus,
    pub delivery_address: String,
    pub note: Option<String>,
    pub cancel_reason: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.farmer_id == user_id
    }

    /// 对方用户（用于通知）
    pub fn counterparty(&self, user_id: Uuid) -> Uuid {
        if user_id == self.buyer_id {
            self.farmer_id
        } else {
            self.buyer_id
        }
    }
}

/// 订单列表/详情视图，附带商品与双方信息
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub order: Order,
    pub listing_title: String,
    pub listing_unit: String,
    pub buyer_name: String,
    pub farmer_name: String,
    pub payment_status: Option<PaymentStatus>,
    pub payment_reference: Option<String>,
}

/// 一次结算对应一笔支付，覆盖该次结算生成的全部订单
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub reference: String,
    pub buyer_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub provider: String,
    pub authorization_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_funded(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Held | PaymentStatus::Released | PaymentStatus::Refunded
        )
    }
}

/// 订单查询条件
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub buyer_id: Option<Uuid>,
    pub farmer_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub page: i64,
    pub page_size: i64,
}

impl OrderFilter {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.page_size
    }
}

#[cfg(test)]
pub(crate) fn sample_order(buyer_id: Uuid, farmer_id: Uuid, status: OrderStatus) -> Order {
    let now = Utc::now();
    Order {
        id: Uuid::new_v4(),
        order_no: "AGR-20240601-ABC123".to_string(),
        buyer_id,
        farmer_id,
        listing_id: Uuid::new_v4(),
        payment_id: Some(Uuid::new_v4()),
        quantity: Decimal::from(10),
        unit_price: Decimal::new(9000, 2),
        total_amount: Decimal::new(90000, 2),
        platform_fee: None,
        status,
        delivery_address: "12 Market Road, Zaria".to_string(),
        note: None,
        cancel_reason: None,
        accepted_at: None,
        delivered_at: None,
        completed_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    }
}
