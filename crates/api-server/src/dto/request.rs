//! 查询参数定义

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use agri_marketplace::models::{
    ListingFilter, ListingStatus, UserFilter, UserRole, UserStatus, WithdrawalStatus,
};

/// 分页参数
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

/// 商品搜索
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingQuery {
    #[serde(alias = "query")]
    pub q: Option<String>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub farmer_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

impl ListingQuery {
    /// 公开搜索固定只查在售商品
    pub fn into_filter(self, page: PaginationParams) -> ListingFilter {
        ListingFilter {
            query: self.q.filter(|q| !q.trim().is_empty()),
            category: self.category,
            location: self.location,
            farmer_id: self.farmer_id,
            min_price: self.min_price,
            max_price: self.max_price,
            status: Some(ListingStatus::Active),
            page: page.page,
            page_size: page.page_size,
        }
    }
}

/// 按状态过滤（订单、农户商品、认证队列）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery<S> {
    pub status: Option<S>,
}

impl<S> Default for StatusQuery<S> {
    fn default() -> Self {
        Self { status: None }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

/// 管理端提现列表
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalQuery {
    pub status: Option<WithdrawalStatus>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub actor_id: Option<Uuid>,
    pub module: Option<String>,
}

/// 管理端用户列表
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    #[serde(alias = "query")]
    pub q: Option<String>,
}

impl UserQuery {
    pub fn into_filter(self, page: PaginationParams) -> UserFilter {
        UserFilter {
            role: self.role,
            status: self.status,
            query: self.q.filter(|q| !q.trim().is_empty()),
            page: page.page,
            page_size: page.page_size,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSignatureRequest {
    pub purpose: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let params = PaginationParams::default();
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 20);

        let params: PaginationParams = serde_json::from_str(r#"{"pageSize":50}"#).unwrap();
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 50);
    }

    #[test]
    fn test_listing_query_forces_active_status() {
        let query: ListingQuery = serde_json::from_value(serde_json::json!({
            "query": "  ",
            "category": "grains",
            "minPrice": "100"
        }))
        .unwrap();
        let filter = query.into_filter(PaginationParams::default());
        assert_eq!(filter.status, Some(ListingStatus::Active));
        assert!(filter.query.is_none());
        assert_eq!(filter.category.as_deref(), Some("grains"));
        assert_eq!(filter.min_price, Some(Decimal::from(100)));
    }

    #[test]
    fn test_status_query_parses_snake_case() {
        let query: StatusQuery<WithdrawalStatus> =
            serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert_eq!(query.status, Some(WithdrawalStatus::Pending));
    }
}
