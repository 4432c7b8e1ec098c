//! 农户实地认证实体

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use super::enums::VerificationStatus;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub id: Uuid,
    pub farmer_id: Uuid,
    /// 认领该申请的农技员
    pub officer_id: Option<Uuid>,
    pub farm_name: String,
    pub farm_size_hectares: Decimal,
    pub farm_location: String,
    pub crops: Json<Vec<String>>,
    pub document_urls: Json<Vec<String>>,
    pub status: VerificationStatus,
    pub officer_notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewVerification {
    pub farmer_id: Uuid,
    pub farm_name: String,
    pub farm_size_hectares: Decimal,
    pub farm_location: String,
    pub crops: Vec<String>,
    pub document_urls: Vec<String>,
}

/// 审核队列视图
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VerificationView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub verification: Verification,
    pub farmer_name: String,
    pub farmer_email: String,
    pub farmer_phone: Option<String>,
}
