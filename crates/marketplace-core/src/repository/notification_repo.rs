//! 站内通知仓储

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::NotificationRepositoryTrait;
use crate::error::Result;
use crate::models::{NewNotification, Notification};

pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, notification: &NewNotification) -> Result<Notification> {
        let created = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, body, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, kind, title, body, data, is_read, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(notification.user_id)
        .bind(notification.kind)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.data)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        unread_only: bool,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Notification>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND (NOT $2 OR NOT is_read)",
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, kind, title, body, data, is_read, created_at
            FROM notifications
            WHERE user_id = $1 AND (NOT $2 OR NOT is_read)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(page_size)
        .bind((page.max(1) - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;

        Ok((items, total))
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// 只能标记自己的通知；返回是否找到
    pub async fn mark_read(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE user_id = $1 AND NOT is_read",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationRepositoryTrait for NotificationRepository {
    async fn create(&self, notification: &NewNotification) -> Result<Notification> {
        self.create(notification).await
    }

    async fn list(
        &self,
        user_id: Uuid,
        unread_only: bool,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Notification>, i64)> {
        self.list(user_id, unread_only, page, page_size).await
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        self.unread_count(user_id).await
    }

    async fn mark_read(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        self.mark_read(user_id, id).await
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        self.mark_all_read(user_id).await
    }
}
