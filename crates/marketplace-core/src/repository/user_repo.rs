//! 用户仓储

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::UserRepositoryTrait;
use crate::error::{MarketError, Result};
use crate::models::{NewUser, User, UserFilter, UserStatus, UserSummary};

const USER_COLUMNS: &str = "id, email, password_hash, full_name, phone, role, status, is_verified, \
     location, avatar_url, failed_login_attempts, locked_until, last_login_at, created_at, updated_at";

pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询操作 ====================

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// 邮箱不区分大小写
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = LOWER($1)");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_summary(&self, id: Uuid) -> Result<Option<UserSummary>> {
        let summary = sqlx::query_as::<_, UserSummary>(
            r#"
            SELECT id, full_name, role, is_verified, location, avatar_url
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(summary)
    }

    pub async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64)> {
        let pattern = filter.query.as_ref().map(|q| format!("%{}%", q.trim()));
        let role = filter.role.map(|r| r.as_str());
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM users
            WHERE ($1::text IS NULL OR role = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR full_name ILIKE $3 OR email ILIKE $3)
            "#,
        )
        .bind(role)
        .bind(status)
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE ($1::text IS NULL OR role = $1) \
               AND ($2::text IS NULL OR status = $2) \
               AND ($3::text IS NULL OR full_name ILIKE $3 OR email ILIKE $3) \
             ORDER BY created_at DESC LIMIT $4 OFFSET $5"
        );
        let users = sqlx::query_as::<_, User>(&sql)
            .bind(role)
            .bind(status)
            .bind(&pattern)
            .bind(filter.page_size)
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((users, total))
    }

    // ==================== 写入操作 ====================

    pub async fn create(&self, user: &NewUser) -> Result<User> {
        let sql = format!(
            "INSERT INTO users (id, email, password_hash, full_name, phone, role, location) \
             VALUES ($1, LOWER($2), $3, $4, $5, $6, $7) \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::now_v7())
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.full_name)
            .bind(&user.phone)
            .bind(user.role)
            .bind(&user.location)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    MarketError::EmailTaken(user.email.to_lowercase())
                }
                other => MarketError::Database(other),
            })
    }

    /// 记录一次登录失败
    ///
    /// 达到上限时锁定账号并清零计数，锁定期满后重新计数
    pub async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lockout_minutes: i32,
    ) -> Result<User> {
        let sql = format!(
            "UPDATE users SET \
               failed_login_attempts = CASE WHEN failed_login_attempts + 1 >= $2 THEN 0 \
                                            ELSE failed_login_attempts + 1 END, \
               locked_until = CASE WHEN failed_login_attempts + 1 >= $2 \
                                   THEN NOW() + make_interval(mins => $3) \
                                   ELSE locked_until END, \
               updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(max_attempts)
            .bind(lockout_minutes)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(MarketError::UserNotFound(id))?;
        Ok(user)
    }

    pub async fn record_successful_login(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0, locked_until = NULL,
                last_login_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::UserNotFound(id));
        }
        Ok(())
    }

    pub async fn update_profile(
        &self,
        id: Uuid,
        full_name: Option<String>,
        phone: Option<String>,
        location: Option<String>,
        avatar_url: Option<String>,
    ) -> Result<Option<User>> {
        let sql = format!(
            "UPDATE users SET \
               full_name = COALESCE($2, full_name), \
               phone = COALESCE($3, phone), \
               location = COALESCE($4, location), \
               avatar_url = COALESCE($5, avatar_url), \
               updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(full_name)
            .bind(phone)
            .bind(location)
            .bind(avatar_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn set_status(&self, id: Uuid, status: UserStatus) -> Result<Option<User>> {
        let sql = format!(
            "UPDATE users SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    // ==================== 事务操作 ====================

    /// 在事务中设置农户认证标记
    pub async fn set_verified_in_tx(tx: &mut PgConnection, id: Uuid, verified: bool) -> Result<()> {
        sqlx::query("UPDATE users SET is_verified = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(verified)
            .execute(&mut *tx)
            .await?;
        Ok(())
    }

    /// 在事务中读取用户邮箱与姓名（结算时用于支付初始化）
    pub async fn find_in_tx(tx: &mut PgConnection, id: Uuid) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserRepositoryTrait for UserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_by_email(email).await
    }

    async fn find_summary(&self, id: Uuid) -> Result<Option<UserSummary>> {
        self.find_summary(id).await
    }

    async fn create(&self, user: &NewUser) -> Result<User> {
        self.create(user).await
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: i32,
        lockout_minutes: i32,
    ) -> Result<User> {
        self.record_failed_login(id, max_attempts, lockout_minutes)
            .await
    }

    async fn record_successful_login(&self, id: Uuid) -> Result<()> {
        self.record_successful_login(id).await
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        self.update_password(id, password_hash).await
    }

    async fn update_profile(
        &self,
        id: Uuid,
        full_name: Option<String>,
        phone: Option<String>,
        location: Option<String>,
        avatar_url: Option<String>,
    ) -> Result<Option<User>> {
        self.update_profile(id, full_name, phone, location, avatar_url)
            .await
    }

    async fn set_status(&self, id: Uuid, status: UserStatus) -> Result<Option<User>> {
        self.set_status(id, status).await
    }

    async fn list(&self, filter: &UserFilter) -> Result<(Vec<User>, i64)> {
        self.list(filter).await
    }
}
