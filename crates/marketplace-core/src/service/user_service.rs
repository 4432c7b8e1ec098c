//! 用户服务
//!
//! 注册、登录（连续失败锁定）、修改密码、个人资料，以及管理端的账号管理。
//! 会话令牌由 HTTP 层签发，这里只负责身份校验。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use agri_shared::config::AuthConfig;
use agri_shared::crypto::mask_email;

use super::dto::{
    ChangePasswordRequest, CreateStaffRequest, LoginRequest, RegisterRequest,
    UpdateProfileRequest,
};
use super::{normalize_page, validate_request};
use crate::error::{MarketError, Result};
use crate::models::{NewUser, Page, User, UserFilter, UserRole, UserStatus, UserSummary};
use crate::repository::UserRepositoryTrait;

pub struct UserService {
    users: Arc<dyn UserRepositoryTrait>,
    max_failed_logins: i32,
    lockout_minutes: i32,
    bcrypt_cost: u32,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepositoryTrait>, auth: &AuthConfig) -> Self {
        Self {
            users,
            max_failed_logins: auth.max_failed_logins,
            lockout_minutes: auth.lockout_minutes as i32,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// 测试中使用较低的 bcrypt 成本
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// 自助注册（仅农户与买家）
    #[instrument(skip(self, req), fields(email = %mask_email(&req.email), role = %req.role))]
    pub async fn register(&self, mut req: RegisterRequest) -> Result<User> {
        if !req.role.is_self_registrable() {
            return Err(MarketError::Forbidden(format!(
                "角色 {} 只能由管理员创建",
                req.role
            )));
        }
        // 先规范化再校验，前后空格与大写不算格式错误
        req.email = normalize_email(&req.email);
        validate_request(&req)?;
        let user = self
            .create_account(
                req.email,
                req.password,
                req.full_name,
                req.phone,
                req.role,
                req.location,
            )
            .await?;
        info!(user_id = %user.id, "用户注册成功");
        Ok(user)
    }

    /// 管理员创建农技员或管理员
    #[instrument(skip(self, req), fields(email = %mask_email(&req.email), role = %req.role))]
    pub async fn create_staff(&self, mut req: CreateStaffRequest) -> Result<User> {
        if !req.role.is_staff() {
            return Err(MarketError::Validation(
                "只能创建 field_officer 或 admin 账号".to_string(),
            ));
        }
        req.email = normalize_email(&req.email);
        validate_request(&req)?;
        let user = self
            .create_account(
                req.email,
                req.password,
                req.full_name,
                req.phone,
                req.role,
                req.location,
            )
            .await?;
        info!(user_id = %user.id, "员工账号已创建");
        Ok(user)
    }

    async fn create_account(
        &self,
        email: String,
        password: String,
        full_name: String,
        phone: Option<String>,
        role: UserRole,
        location: Option<String>,
    ) -> Result<User> {
        let email = normalize_email(&email);
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(MarketError::EmailTaken(email));
        }

        let password_hash = self.hash_password(password).await?;
        self.users
            .create(&NewUser {
                email,
                password_hash,
                full_name: full_name.trim().to_string(),
                phone,
                role,
                location,
            })
            .await
    }

    /// 登录校验
    ///
    /// 1. 账号不存在与密码错误返回相同错误
    /// 2. 停用账号拒绝登录
    /// 3. 锁定期内拒绝登录
    /// 4. 密码错误累计失败次数，达到上限后锁定
    #[instrument(skip(self, req), fields(email = %mask_email(&req.email)))]
    pub async fn login(&self, mut req: LoginRequest) -> Result<User> {
        req.email = normalize_email(&req.email);
        validate_request(&req)?;
        let Some(user) = self.users.find_by_email(&req.email).await? else {
            return Err(MarketError::InvalidCredentials);
        };

        if !user.is_active() {
            return Err(MarketError::AccountSuspended);
        }
        let now = Utc::now();
        if user.is_locked(now) {
            return Err(MarketError::AccountLocked {
                minutes: user.lock_remaining_minutes(now),
            });
        }

        if !self.verify_password(req.password, user.password_hash.clone()).await? {
            let updated = self
                .users
                .record_failed_login(user.id, self.max_failed_logins, self.lockout_minutes)
                .await?;
            let now = Utc::now();
            if updated.is_locked(now) {
                warn!(user_id = %user.id, "连续登录失败，账号已锁定");
                return Err(MarketError::AccountLocked {
                    minutes: updated.lock_remaining_minutes(now),
                });
            }
            return Err(MarketError::InvalidCredentials);
        }

        self.users.record_successful_login(user.id).await?;
        info!(user_id = %user.id, "登录成功");
        Ok(user)
    }

    #[instrument(skip(self, req))]
    pub async fn change_password(&self, user_id: Uuid, req: ChangePasswordRequest) -> Result<()> {
        validate_request(&req)?;
        let user = self.get(user_id).await?;
        if !self
            .verify_password(req.current_password, user.password_hash.clone())
            .await?
        {
            return Err(MarketError::InvalidCredentials);
        }
        let hash = self.hash_password(req.new_password).await?;
        self.users.update_password(user_id, &hash).await?;
        info!(user_id = %user_id, "密码已修改");
        Ok(())
    }

    pub async fn get(&self, user_id: Uuid) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(MarketError::UserNotFound(user_id))
    }

    pub async fn summary(&self, user_id: Uuid) -> Result<UserSummary> {
        self.users
            .find_summary(user_id)
            .await?
            .ok_or(MarketError::UserNotFound(user_id))
    }

    pub async fn update_profile(&self, user_id: Uuid, req: UpdateProfileRequest) -> Result<User> {
        validate_request(&req)?;
        self.users
            .update_profile(user_id, req.full_name, req.phone, req.location, req.avatar_url)
            .await?
            .ok_or(MarketError::UserNotFound(user_id))
    }

    /// 停用或恢复账号，管理员不能停用自己
    #[instrument(skip(self))]
    pub async fn set_status(&self, admin_id: Uuid, user_id: Uuid, status: UserStatus) -> Result<User> {
        if admin_id == user_id && status == UserStatus::Suspended {
            return Err(MarketError::Forbidden("不能停用自己的账号".to_string()));
        }
        let user = self
            .users
            .set_status(user_id, status)
            .await?
            .ok_or(MarketError::UserNotFound(user_id))?;
        info!(user_id = %user_id, status = %status, "账号状态已更新");
        Ok(user)
    }

    pub async fn list(&self, mut filter: UserFilter) -> Result<Page<User>> {
        let (page, page_size) = normalize_page(filter.page, filter.page_size);
        filter.page = page;
        filter.page_size = page_size;
        let (items, total) = self.users.list(&filter).await?;
        Ok(Page::new(items, total, page, page_size))
    }

    /// 按角色列出活跃用户 id（用于广播类通知）
    pub async fn ids_by_role(&self, role: UserRole) -> Result<Vec<Uuid>> {
        let filter = UserFilter {
            role: Some(role),
            status: Some(UserStatus::Active),
            query: None,
            page: 1,
            page_size: super::MAX_PAGE_SIZE,
        };
        let (users, _) = self.users.list(&filter).await?;
        Ok(users.into_iter().map(|u| u.id).collect())
    }

    async fn hash_password(&self, password: String) -> Result<String> {
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| MarketError::Internal(format!("密码哈希任务失败: {}", e)))?
            .map_err(|e| MarketError::Internal(format!("密码哈希失败: {}", e)))
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool> {
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| MarketError::Internal(format!("密码校验任务失败: {}", e)))?
            .map_err(|e| MarketError::Internal(format!("密码校验失败: {}", e)))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
