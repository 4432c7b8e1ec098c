//! 操作审计日志仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::AuditRepositoryTrait;
use crate::error::Result;
use crate::models::{AuditFilter, AuditLog, NewAuditLog};

pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, log: &NewAuditLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (actor_id, actor_role, module, action, target_type, target_id, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(log.actor_id)
        .bind(&log.actor_role)
        .bind(&log.module)
        .bind(&log.action)
        .bind(&log.target_type)
        .bind(&log.target_id)
        .bind(&log.ip_address)
        .bind(&log.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditLog>, i64)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM audit_logs
            WHERE ($1::uuid IS NULL OR actor_id = $1)
              AND ($2::text IS NULL OR module = $2)
            "#,
        )
        .bind(filter.actor_id)
        .bind(&filter.module)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT id, actor_id, actor_role, module, action, target_type, target_id,
                   ip_address, user_agent, created_at
            FROM audit_logs
            WHERE ($1::uuid IS NULL OR actor_id = $1)
              AND ($2::text IS NULL OR module = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.actor_id)
        .bind(&filter.module)
        .bind(filter.page_size)
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok((items, total))
    }
}

#[async_trait]
impl AuditRepositoryTrait for AuditRepository {
    async fn record(&self, log: &NewAuditLog) -> Result<()> {
        self.record(log).await
    }

    async fn list(&self, filter: &AuditFilter) -> Result<(Vec<AuditLog>, i64)> {
        self.list(filter).await
    }
}
