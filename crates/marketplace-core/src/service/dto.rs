//! 服务层数据传输对象
//!
//! 请求 DTO 使用 validator 做字段级校验，跨字段的业务规则（阶梯价、库存等）在服务内检查。

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{
    CartItem, Listing, ListingStatus, Order, Payment, PricingTier, RatingSummary, UserRole,
    UserStatus, UserSummary, Withdrawal, WithdrawalStatus,
};
use crate::pricing::{PriceQuote, TierSpec};

fn positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("positive").with_message("必须大于 0".into()))
    }
}

fn account_number(value: &str) -> Result<(), ValidationError> {
    if value.len() == 10 && value.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("account_number").with_message("银行账号必须为 10 位数字".into()))
    }
}

// ==================== 账号 ====================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "密码长度必须在8-128个字符之间"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "姓名长度必须在1-100个字符之间"))]
    pub full_name: String,
    #[validate(length(min = 7, max = 20, message = "手机号长度必须在7-20个字符之间"))]
    pub phone: Option<String>,
    pub role: UserRole,
    #[validate(length(max = 200))]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    #[validate(length(min = 1, message = "密码不能为空"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "原密码不能为空"))]
    pub current_password: String,
    #[validate(length(min = 8, max = 128, message = "新密码长度必须在8-128个字符之间"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100))]
    pub full_name: Option<String>,
    #[validate(length(min = 7, max = 20))]
    pub phone: Option<String>,
    #[validate(length(max = 200))]
    pub location: Option<String>,
    #[validate(url(message = "头像地址必须是有效的URL"))]
    pub avatar_url: Option<String>,
}

/// 管理员创建农技员或管理员账号
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateStaffRequest {
    #[validate(email(message = "邮箱格式不正确"))]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    #[validate(length(min = 7, max = 20))]
    pub phone: Option<String>,
    pub role: UserRole,
    #[validate(length(max = 200))]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetUserStatusRequest {
    pub status: UserStatus,
}

// ==================== 商品 ====================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateListingRequest {
    #[validate(length(min = 1, max = 150, message = "标题长度必须在1-150个字符之间"))]
    pub title: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, max = 50))]
    pub category: String,
    #[validate(length(min = 1, max = 20))]
    pub unit: String,
    #[validate(custom(function = "positive"))]
    pub price_per_unit: Decimal,
    #[validate(custom(function = "positive"))]
    pub quantity_available: Decimal,
    #[validate(custom(function = "positive"))]
    pub min_order_quantity: Option<Decimal>,
    #[validate(length(min = 1, max = 200))]
    pub location: String,
    #[validate(length(max = 10, message = "最多 10 张图片"))]
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub pricing_tiers: Vec<TierSpec>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateListingRequest {
    #[validate(length(min = 1, max = 150))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub category: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub unit: Option<String>,
    #[validate(custom(function = "positive"))]
    pub price_per_unit: Option<Decimal>,
    pub quantity_available: Option<Decimal>,
    #[validate(custom(function = "positive"))]
    pub min_order_quantity: Option<Decimal>,
    #[validate(length(min = 1, max = 200))]
    pub location: Option<String>,
    #[validate(length(max = 10))]
    pub image_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceTiersRequest {
    pub tiers: Vec<TierSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetListingStatusRequest {
    pub status: ListingStatus,
}

/// 商品详情
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDetail {
    #[serde(flatten)]
    pub listing: Listing,
    pub pricing_tiers: Vec<PricingTier>,
    pub farmer: UserSummary,
    pub farmer_rating: RatingSummary,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    #[validate(custom(function = "positive"))]
    pub quantity: Decimal,
}

// ==================== 购物车与结算 ====================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub listing_id: Uuid,
    #[validate(custom(function = "positive"))]
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartItemRequest {
    #[validate(custom(function = "positive"))]
    pub quantity: Decimal,
}

/// 购物车行，附带实时报价
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[serde(flatten)]
    pub item: CartItem,
    pub listing_title: String,
    pub listing_unit: String,
    pub farmer_id: Uuid,
    pub available: Decimal,
    /// 商品已下架等原因无法报价时为 None
    pub quote: Option<PriceQuote>,
    /// 结算前需要处理的问题
    pub issue: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub total: Decimal,
    pub item_count: usize,
    /// 所有行均可结算
    pub checkout_ready: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(length(min = 5, max = 500, message = "收货地址长度必须在5-500个字符之间"))]
    pub delivery_address: String,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    #[validate(url)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub payment: Payment,
    pub orders: Vec<Order>,
    /// 支付网关未配置或初始化失败时为空
    pub authorization_url: Option<String>,
}

// ==================== 订单 ====================

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetail {
    #[serde(flatten)]
    pub payment: Payment,
    pub orders: Vec<Order>,
}

// ==================== 钱包 ====================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    #[validate(custom(function = "positive"))]
    pub amount: Decimal,
    #[validate(length(min = 3, max = 10, message = "银行代码长度必须在3-10个字符之间"))]
    pub bank_code: String,
    #[validate(custom(function = "account_number"))]
    pub account_number: String,
    #[validate(length(min = 1, max = 100))]
    pub account_name: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewWithdrawalRequest {
    pub approve: bool,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// 对外展示的提现记录，账号已脱敏
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub status: WithdrawalStatus,
    pub reviewed_by: Option<Uuid>,
    pub review_note: Option<String>,
    pub transfer_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalView {
    pub fn from_withdrawal(withdrawal: Withdrawal, masked_account: String) -> Self {
        Self {
            id: withdrawal.id,
            user_id: withdrawal.user_id,
            amount: withdrawal.amount,
            bank_code: withdrawal.bank_code,
            account_number: masked_account,
            account_name: withdrawal.account_name,
            status: withdrawal.status,
            reviewed_by: withdrawal.reviewed_by,
            review_note: withdrawal.review_note,
            transfer_reference: withdrawal.transfer_reference,
            created_at: withdrawal.created_at,
            updated_at: withdrawal.updated_at,
        }
    }
}

// ==================== 认证 ====================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVerificationRequest {
    #[validate(length(min = 1, max = 150))]
    pub farm_name: String,
    #[validate(custom(function = "positive"))]
    pub farm_size_hectares: Decimal,
    #[validate(length(min = 1, max = 200))]
    pub farm_location: String,
    #[validate(length(min = 1, max = 20, message = "作物种类必须在1-20项之间"))]
    pub crops: Vec<String>,
    #[validate(length(max = 10))]
    #[serde(default)]
    pub document_urls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDecisionRequest {
    pub approve: bool,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

// ==================== 评价与消息 ====================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub order_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "评分必须在1-5之间"))]
    pub rating: i16,
    #[validate(length(max = 1000, message = "评价内容不能超过1000个字符"))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    pub participant_id: Uuid,
    pub listing_id: Option<Uuid>,
    /// 可选的首条消息
    #[validate(length(min = 1, max = 2000))]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 2000, message = "消息长度必须在1-2000个字符之间"))]
    pub body: String,
}
