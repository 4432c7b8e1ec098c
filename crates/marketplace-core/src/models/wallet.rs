//! 钱包、流水与提现实体

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{WalletTxKind, WalletTxSource, WithdrawalStatus};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: WalletTxKind,
    pub source: WalletTxSource,
    pub amount: Decimal,
    pub balance_after: Decimal,
    /// 业务幂等键，如 escrow:AGR-20240601-ABC123
    pub reference: String,
    pub order_id: Option<Uuid>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// 待写入的钱包流水
#[derive(Debug, Clone)]
pub struct WalletEntry {
    pub user_id: Uuid,
    pub source: WalletTxSource,
    pub amount: Decimal,
    pub reference: String,
    pub order_id: Option<Uuid>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub bank_code: String,
    /// 库中为密文，出库时由服务层解密并脱敏
    pub account_number: String,
    pub account_name: String,
    pub status: WithdrawalStatus,
    pub reviewed_by: Option<Uuid>,
    pub review_note: Option<String>,
    pub transfer_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub bank_code: String,
    /// 已加密的账号
    pub account_number: String,
    pub account_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct WithdrawalFilter {
    pub user_id: Option<Uuid>,
    pub status: Option<WithdrawalStatus>,
    pub page: i64,
    pub page_size: i64,
}

impl WithdrawalFilter {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.page_size
    }
}
