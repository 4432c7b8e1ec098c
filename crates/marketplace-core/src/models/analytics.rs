//! 仪表盘统计结构

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::OrderView;
use super::social::RatingSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ListingRevenue {
    pub listing_id: Uuid,
    pub title: String,
    pub revenue: Decimal,
    pub quantity_sold: Decimal,
    pub order_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRevenue {
    /// YYYY-MM
    pub month: String,
    pub revenue: Decimal,
    pub order_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmerDashboard {
    /// 已完成订单扣除服务费后的收入
    pub net_revenue: Decimal,
    pub gross_revenue: Decimal,
    /// 托管中尚未放款的金额
    pub pending_payout: Decimal,
    pub wallet_balance: Decimal,
    pub active_listings: i64,
    pub orders_by_status: Vec<StatusCount>,
    pub top_listings: Vec<ListingRevenue>,
    pub monthly_revenue: Vec<MonthlyRevenue>,
    pub rating: RatingSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyerDashboard {
    pub total_spent: Decimal,
    /// 已付款、订单尚未结束的托管金额
    pub in_escrow: Decimal,
    pub orders_by_status: Vec<StatusCount>,
    pub recent_orders: Vec<OrderView>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficerDashboard {
    pub pending_queue: i64,
    pub in_review_by_me: i64,
    pub approved_by_me: i64,
    pub rejected_by_me: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboard {
    pub users_by_role: Vec<StatusCount>,
    pub verified_farmers: i64,
    /// 已完成订单成交额
    pub gmv: Decimal,
    pub platform_fees: Decimal,
    pub escrow_held: Decimal,
    pub orders_by_status: Vec<StatusCount>,
    pub pending_withdrawals: i64,
    pub pending_withdrawal_amount: Decimal,
    pub pending_verifications: i64,
}

/// 按状态取数量，不存在时为 0
pub fn count_for(counts: &[StatusCount], status: &str) -> i64 {
    counts
        .iter()
        .find(|c| c.status == status)
        .map(|c| c.count)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_for() {
        let counts = vec![
            StatusCount {
                status: "pending".to_string(),
                count: 3,
            },
            StatusCount {
                status: "completed".to_string(),
                count: 7,
            },
        ];
        assert_eq!(count_for(&counts, "completed"), 7);
        assert_eq!(count_for(&counts, "cancelled"), 0);
    }
}
