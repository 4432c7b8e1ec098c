//! 用户实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{UserRole, UserStatus};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    /// 农户通过实地认证后为 true
    pub is_verified: bool,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(skip_serializing)]
    pub failed_login_attempts: i32,
    #[serde(skip_serializing)]
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|t| t > now)
    }

    /// 剩余锁定分钟数（向上取整）
    pub fn lock_remaining_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.locked_until
            .map(|t| ((t - now).num_seconds() + 59) / 60)
            .unwrap_or(0)
            .max(0)
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// 已认证农户才能上架在售商品
    pub fn can_publish_listings(&self) -> bool {
        self.role == UserRole::Farmer && self.is_verified
    }
}

/// 对外展示的用户摘要（商品详情、会话列表等）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub full_name: String,
    pub role: UserRole,
    pub is_verified: bool,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            role: user.role,
            is_verified: user.is_verified,
            location: user.location.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

/// 新用户
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub location: Option<String>,
}

/// 用户查询条件（管理端）
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    /// 按姓名或邮箱模糊匹配
    pub query: Option<String>,
    pub page: i64,
    pub page_size: i64,
}

impl UserFilter {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.page_size
    }
}

#[cfg(test)]
pub(crate) fn sample_user(role: UserRole) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        email: format!("{}@farm.ng", role),
        password_hash: "$2b$04$hash".to_string(),
        full_name: "Ada Obi".to_string(),
        phone: Some("+2348012345678".to_string()),
        role,
        status: UserStatus::Active,
        is_verified: false,
        location: Some("Kaduna".to_string()),
        avatar_url: None,
        failed_login_attempts: 0,
        locked_until: None,
        last_login_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_lock_state() {
        let now = Utc::now();
        let mut user = sample_user(UserRole::Buyer);
        assert!(!user.is_locked(now));
        assert_eq!(user.lock_remaining_minutes(now), 0);

        user.locked_until = Some(now + Duration::minutes(29) + Duration::seconds(10));
        assert!(user.is_locked(now));
        assert_eq!(user.lock_remaining_minutes(now), 30);

        user.locked_until = Some(now - Duration::minutes(1));
        assert!(!user.is_locked(now));
        assert_eq!(user.lock_remaining_minutes(now), 0);
    }

    #[test]
    fn test_publish_requires_verified_farmer() {
        let mut farmer = sample_user(UserRole::Farmer);
        assert!(!farmer.can_publish_listings());
        farmer.is_verified = true;
        assert!(farmer.can_publish_listings());

        let mut buyer = sample_user(UserRole::Buyer);
        buyer.is_verified = true;
        assert!(!buyer.can_publish_listings());
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = sample_user(UserRole::Farmer);
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("failedLoginAttempts").is_none());
        assert_eq!(json["role"], "farmer");
        assert_eq!(json["fullName"], "Ada Obi");
    }
}
