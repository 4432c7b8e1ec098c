//! 领域模型定义

mod analytics;
pub mod enums;
mod listing;
mod order;
mod social;
mod user;
mod verification;
mod wallet;

pub use analytics::{
    AdminDashboard, BuyerDashboard, FarmerDashboard, ListingRevenue, MonthlyRevenue,
    OfficerDashboard, StatusCount, count_for,
};
pub use enums::*;
pub use listing::{CartItem, Listing, ListingFilter, ListingUpdate, NewListing, PricingTier};
pub use order::{Order, OrderFilter, OrderView, Payment};
pub use social::{
    AuditFilter, AuditLog, Conversation, ConversationSummary, Message, NewAuditLog,
    NewNotification, Notification, RatingSummary, Review, ReviewView,
};
pub use user::{NewUser, User, UserFilter, UserSummary};
pub use verification::{NewVerification, Verification, VerificationView};
pub use wallet::{
    NewWithdrawal, Wallet, WalletEntry, WalletTransaction, Withdrawal, WithdrawalFilter,
};

#[cfg(test)]
pub(crate) mod fixtures {
    pub(crate) use super::listing::sample_listing;
    pub(crate) use super::order::sample_order;
    pub(crate) use super::user::sample_user;
}

/// 分页结果
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        let total_pages = if page_size > 0 {
            (total + page_size - 1) / page_size
        } else {
            0
        };
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}
