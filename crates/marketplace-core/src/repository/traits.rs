//! 仓储 Trait 定义
//!
//! 服务层依赖这些接口完成非事务性的读写，便于使用 mock 进行单元测试。
//! 需要行锁的事务操作由各仓储的 `*_in_tx` 关联函数提供。

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AuditFilter, AuditLog, CartItem, Conversation, ConversationSummary, Listing, ListingFilter,
    ListingStatus, ListingUpdate, Message, NewAuditLog, NewListing, NewNotification, NewUser,
    NewVerification, Notification, Order, OrderFilter, OrderView, Payment, PricingTier,
    RatingSummary, Review, ReviewView, User, UserFilter, UserStatus, UserSummary, Verification,
    VerificationStatus, VerificationView, Wallet, WalletTransaction, Withdrawal,
    WithdrawalFilter,
};
use crate::pricing::TierSpec;

/// 用户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepositoryTrait: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_summary(&self, id: Uuid) -> Result<Option<UserSummary>>;
    async fn create(&self, user: &NewUser) -> Result<User>;

    // 登录状态
    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lockout_minutes: i32,
    ) -> Result<User>;
    async fn record_successful_login(&self, id: Uuid) -> Result<()>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()>;

    async fn update_profile(
        &self,
        id: Uuid,
        full_name: Option<String>,
        phone: Option<String>,
        location: Option<String>,
        avatar_url: Option<String>,
    ) -> Result<Option<User>>;
    async fn set_status(&self, id: Uuid, status: UserStatus) -> Result<Option<User>>;
    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64)>;
}

/// 商品仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingRepositoryTrait: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Listing>>;
    async fn find_tiers(&self, listing_id: Uuid) -> Result<Vec<PricingTier>>;
    async fn search(&self, filter: &ListingFilter) -> Result<(Vec<Listing>, i64)>;
    async fn create(&self, listing: &NewListing, tiers: &[TierSpec]) -> Result<Listing>;
    async fn update(&self, id: Uuid, update: &ListingUpdate) -> Result<Option<Listing>>;
    async fn set_status(&self, id: Uuid, status: ListingStatus) -> Result<Option<Listing>>;
    async fn replace_tiers(&self, listing_id: Uuid, tiers: &[TierSpec]) -> Result<Vec<PricingTier>>;
}

/// 购物车仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CartRepositoryTrait: Send + Sync {
    async fn list(&self, buyer_id: Uuid) -> Result<Vec<CartItem>>;
    async fn find(&self, buyer_id: Uuid, item_id: Uuid) -> Result<Option<CartItem>>;
    async fn find_by_listing(&self, buyer_id: Uuid, listing_id: Uuid) -> Result<Option<CartItem>>;
    /// 同一商品重复加入时覆盖数量
    async fn upsert(&self, buyer_id: Uuid, listing_id: Uuid, quantity: Decimal) -> Result<CartItem>;
    async fn update_quantity(&self, item_id: Uuid, quantity: Decimal) -> Result<Option<CartItem>>;
    async fn remove(&self, buyer_id: Uuid, item_id: Uuid) -> Result<bool>;
    async fn clear(&self, buyer_id: Uuid) -> Result<u64>;
}

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;
    async fn find_view(&self, id: Uuid) -> Result<Option<OrderView>>;
    async fn list_views(&self, filter: &OrderFilter) -> Result<(Vec<OrderView>, i64)>;
    async fn list_by_payment(&self, payment_id: Uuid) -> Result<Vec<Order>>;
}

/// 支付仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentRepositoryTrait: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Payment>>;
    async fn set_authorization_url(&self, id: Uuid, url: &str) -> Result<()>;
}

/// 钱包与提现仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletRepositoryTrait: Send + Sync {
    async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>>;
    async fn list_transactions(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<WalletTransaction>, i64)>;
    async fn find_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>>;
    async fn list_withdrawals(&self, filter: &WithdrawalFilter) -> Result<(Vec<Withdrawal>, i64)>;
}

/// 认证申请仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationRepositoryTrait: Send + Sync {
    async fn find_view(&self, id: Uuid) -> Result<Option<VerificationView>>;
    async fn latest_for_farmer(&self, farmer_id: Uuid) -> Result<Option<Verification>>;
    async fn create(&self, verification: &NewVerification) -> Result<Verification>;
    async fn list(
        &self,
        status: Option<VerificationStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<VerificationView>, i64)>;
}

/// 评价仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReviewRepositoryTrait: Send + Sync {
    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Review>>;
    async fn create(&self, review: &Review) -> Result<Review>;
    async fn list_for_listing(
        &self,
        listing_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<ReviewView>, i64)>;
    async fn summary_for_farmer(&self, farmer_id: Uuid) -> Result<RatingSummary>;
}

/// 站内通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepositoryTrait: Send + Sync {
    async fn create(&self, notification: &NewNotification) -> Result<Notification>;
    async fn list(
        &self,
        user_id: Uuid,
        unread_only: bool,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Notification>, i64)>;
    async fn unread_count(&self, user_id: Uuid) -> Result<i64>;
    async fn mark_read(&self, user_id: Uuid, id: Uuid) -> Result<bool>;
    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64>;
}

/// 会话与消息仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepositoryTrait: Send + Sync {
    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    async fn find_or_create_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Conversation>;
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>>;
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Message>, i64)>;
    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Message>;
    /// 标记对方发送的消息为已读
    async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64>;
}

/// 审计日志仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditRepositoryTrait: Send + Sync {
    async fn record(&self, log: &NewAuditLog) -> Result<()>;
    async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditLog>, i64)>;
}
