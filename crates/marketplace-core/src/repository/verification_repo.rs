//! 农户认证申请仓储

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::VerificationRepositoryTrait;
use crate::error::{MarketError, Result};
use crate::models::{NewVerification, Verification, VerificationStatus, VerificationView};

const VERIFICATION_COLUMNS: &str = "id, farmer_id, officer_id, farm_name, farm_size_hectares, \
     farm_location, crops, document_urls, status, officer_notes, submitted_at, reviewed_at";

const VIEW_SELECT: &str = "SELECT v.id, v.farmer_id, v.officer_id, v.farm_name, \
         v.farm_size_hectares, v.farm_location, v.crops, v.document_urls, v.status, \
         v.officer_notes, v.submitted_at, v.reviewed_at, \
         u.full_name AS farmer_name, u.email AS farmer_email, u.phone AS farmer_phone \
     FROM verifications v \
     JOIN users u ON u.id = v.farmer_id";

pub struct VerificationRepository {
    pool: PgPool,
}

impl VerificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_view(&self, id: Uuid) -> Result<Option<VerificationView>> {
        let sql = format!("{VIEW_SELECT} WHERE v.id = $1");
        let view = sqlx::query_as::<_, VerificationView>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(view)
    }

    pub async fn latest_for_farmer(&self, farmer_id: Uuid) -> Result<Option<Verification>> {
        let sql = format!(
            "SELECT {VERIFICATION_COLUMNS} FROM verifications WHERE farmer_id = $1 \
             ORDER BY submitted_at DESC LIMIT 1"
        );
        let verification = sqlx::query_as::<_, Verification>(&sql)
            .bind(farmer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(verification)
    }

    /// 提交认证申请
    ///
    /// 部分唯一索引保证每个农户只有一个未结申请，并发提交时第二个会冲突
    pub async fn create(&self, verification: &NewVerification) -> Result<Verification> {
        let sql = format!(
            "INSERT INTO verifications (id, farmer_id, farm_name, farm_size_hectares, farm_location, \
                 crops, document_urls) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {VERIFICATION_COLUMNS}"
        );
        sqlx::query_as::<_, Verification>(&sql)
            .bind(Uuid::now_v7())
            .bind(verification.farmer_id)
            .bind(&verification.farm_name)
            .bind(verification.farm_size_hectares)
            .bind(&verification.farm_location)
            .bind(Json(&verification.crops))
            .bind(Json(&verification.document_urls))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    MarketError::VerificationInProgress
                }
                other => MarketError::Database(other),
            })
    }

    /// 按状态分页列出，待审队列按提交时间先后排列
    pub async fn list(
        &self,
        status: Option<VerificationStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<VerificationView>, i64)> {
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM verifications WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "{VIEW_SELECT} WHERE ($1::text IS NULL OR v.status = $1) \
             ORDER BY v.submitted_at ASC LIMIT $2 OFFSET $3"
        );
        let items = sqlx::query_as::<_, VerificationView>(&sql)
            .bind(status)
            .bind(page_size)
            .bind((page.max(1) - 1) * page_size)
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }

    // ==================== 事务操作 ====================

    pub async fn lock_in_tx(tx: &mut PgConnection, id: Uuid) -> Result<Option<Verification>> {
        let sql = format!("SELECT {VERIFICATION_COLUMNS} FROM verifications WHERE id = $1 FOR UPDATE");
        let verification = sqlx::query_as::<_, Verification>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(verification)
    }

    pub async fn update_in_tx(
        tx: &mut PgConnection,
        id: Uuid,
        status: VerificationStatus,
        officer_id: Uuid,
        notes: Option<&str>,
    ) -> Result<Verification> {
        let sql = format!(
            "UPDATE verifications SET \
               status = $2, \
               officer_id = $3, \
               officer_notes = COALESCE($4, officer_notes), \
               reviewed_at = CASE WHEN $2 IN ('approved', 'rejected') THEN NOW() ELSE reviewed_at END \
             WHERE id = $1 \
             RETURNING {VERIFICATION_COLUMNS}"
        );
        let verification = sqlx::query_as::<_, Verification>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(officer_id)
            .bind(notes)
            .fetch_one(&mut *tx)
            .await?;
        Ok(verification)
    }
}

#[async_trait]
impl VerificationRepositoryTrait for VerificationRepository {
    async fn find_view(&self, id: Uuid) -> Result<Option<VerificationView>> {
        self.find_view(id).await
    }

    async fn latest_for_farmer(&self, farmer_id: Uuid) -> Result<Option<Verification>> {
        self.latest_for_farmer(farmer_id).await
    }

    async fn create(&self, verification: &NewVerification) -> Result<Verification> {
        self.create(verification).await
    }

    async fn list(
        &self,
        status: Option<VerificationStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<VerificationView>, i64)> {
        self.list(status, page, page_size).await
    }
}
