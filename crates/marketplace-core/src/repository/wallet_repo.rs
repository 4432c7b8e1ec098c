//! 钱包与提现仓储
//!
//! 所有余额变动都通过 `apply_entry_in_tx` 写入流水表，流水 reference 唯一，
//! 重复入账会被识别为幂等请求而不是再次记账。

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::WalletRepositoryTrait;
use crate::error::{MarketError, Result};
use crate::models::{
    NewWithdrawal, Wallet, WalletEntry, WalletTransaction, WalletTxKind, Withdrawal,
    WithdrawalFilter, WithdrawalStatus,
};

const TX_COLUMNS: &str =
    "id, user_id, kind, source, amount, balance_after, reference, order_id, description, created_at";

const WITHDRAWAL_COLUMNS: &str = "id, user_id, amount, bank_code, account_number, account_name, \
     status, reviewed_by, review_note, transfer_reference, created_at, updated_at";

pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询操作 ====================

    pub async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT user_id, balance, updated_at FROM wallets WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(wallet)
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<WalletTransaction>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM wallet_transactions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            "SELECT {TX_COLUMNS} FROM wallet_transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        let items = sqlx::query_as::<_, WalletTransaction>(&sql)
            .bind(user_id)
            .bind(page_size)
            .bind((page.max(1) - 1) * page_size)
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }

    pub async fn find_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>> {
        let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1");
        let withdrawal = sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(withdrawal)
    }

    pub async fn list_withdrawals(
        &self,
        filter: &WithdrawalFilter,
    ) -> Result<(Vec<Withdrawal>, i64)> {
        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM withdrawals
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(filter.user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals \
             WHERE ($1::uuid IS NULL OR user_id = $1) \
               AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        );
        let items = sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(filter.user_id)
            .bind(status)
            .bind(filter.page_size)
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }

    // ==================== 事务操作 ====================

    /// 记账
    ///
    /// 1. 确保钱包存在并加行锁
    /// 2. 计算变动后余额，借记不得透支
    /// 3. 写入流水（reference 冲突视为重复请求，返回 None）
    /// 4. 更新余额
    pub async fn apply_entry_in_tx(
        tx: &mut PgConnection,
        entry: &WalletEntry,
    ) -> Result<Option<WalletTransaction>> {
        if entry.amount <= Decimal::ZERO {
            return Err(MarketError::Validation(format!(
                "记账金额必须大于 0: {}",
                entry.amount
            )));
        }

        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(entry.user_id)
            .execute(&mut *tx)
            .await?;

        let balance: Decimal =
            sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = $1 FOR UPDATE")
                .bind(entry.user_id)
                .fetch_one(&mut *tx)
                .await?;

        let kind = entry.source.kind();
        let balance_after = match kind {
            WalletTxKind::Credit => balance + entry.amount,
            WalletTxKind::Debit => {
                if balance < entry.amount {
                    return Err(MarketError::InsufficientBalance {
                        required: entry.amount.to_string(),
                        available: balance.to_string(),
                    });
                }
                balance - entry.amount
            }
        };

        let sql = format!(
            "INSERT INTO wallet_transactions \
                 (id, user_id, kind, source, amount, balance_after, reference, order_id, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (reference) DO NOTHING \
             RETURNING {TX_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, WalletTransaction>(&sql)
            .bind(Uuid::now_v7())
            .bind(entry.user_id)
            .bind(kind)
            .bind(entry.source)
            .bind(entry.amount)
            .bind(balance_after)
            .bind(&entry.reference)
            .bind(entry.order_id)
            .bind(&entry.description)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(transaction) = inserted else {
            return Ok(None);
        };

        sqlx::query("UPDATE wallets SET balance = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(entry.user_id)
            .bind(balance_after)
            .execute(&mut *tx)
            .await?;

        Ok(Some(transaction))
    }

    pub async fn create_withdrawal_in_tx(
        tx: &mut PgConnection,
        id: Uuid,
        withdrawal: &NewWithdrawal,
    ) -> Result<Withdrawal> {
        let sql = format!(
            "INSERT INTO withdrawals (id, user_id, amount, bank_code, account_number, account_name) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {WITHDRAWAL_COLUMNS}"
        );
        let created = sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(id)
            .bind(withdrawal.user_id)
            .bind(withdrawal.amount)
            .bind(&withdrawal.bank_code)
            .bind(&withdrawal.account_number)
            .bind(&withdrawal.account_name)
            .fetch_one(&mut *tx)
            .await?;
        Ok(created)
    }

    pub async fn lock_withdrawal_in_tx(tx: &mut PgConnection, id: Uuid) -> Result<Option<Withdrawal>> {
        let sql = format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1 FOR UPDATE");
        let withdrawal = sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(withdrawal)
    }

    pub async fn lock_withdrawal_by_transfer_in_tx(
        tx: &mut PgConnection,
        transfer_reference: &str,
    ) -> Result<Option<Withdrawal>> {
        let sql = format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE transfer_reference = $1 FOR UPDATE"
        );
        let withdrawal = sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(transfer_reference)
            .fetch_optional(&mut *tx)
            .await?;
        Ok(withdrawal)
    }

    pub async fn update_withdrawal_in_tx(
        tx: &mut PgConnection,
        id: Uuid,
        status: WithdrawalStatus,
        reviewed_by: Option<Uuid>,
        review_note: Option<&str>,
        transfer_reference: Option<&str>,
    ) -> Result<Withdrawal> {
        let sql = format!(
            "UPDATE withdrawals SET \
               status = $2, \
               reviewed_by = COALESCE($3, reviewed_by), \
               review_note = COALESCE($4, review_note), \
               transfer_reference = COALESCE($5, transfer_reference), \
               updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {WITHDRAWAL_COLUMNS}"
        );
        let withdrawal = sqlx::query_as::<_, Withdrawal>(&sql)
            .bind(id)
            .bind(status)
            .bind(reviewed_by)
            .bind(review_note)
            .bind(transfer_reference)
            .fetch_one(&mut *tx)
            .await?;
        Ok(withdrawal)
    }
}

#[async_trait]
impl WalletRepositoryTrait for WalletRepository {
    async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        self.find_wallet(user_id).await
    }

    async fn list_transactions(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<WalletTransaction>, i64)> {
        self.list_transactions(user_id, page, page_size).await
    }

    async fn find_withdrawal(&self, id: Uuid) -> Result<Option<Withdrawal>> {
        self.find_withdrawal(id).await
    }

    async fn list_withdrawals(&self, filter: &WithdrawalFilter) -> Result<(Vec<Withdrawal>, i64)> {
        self.list_withdrawals(filter).await
    }
}
