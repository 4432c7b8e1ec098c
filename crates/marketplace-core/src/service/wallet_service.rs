//! 钱包与提现服务
//!
//! 提现申请即时扣款，账号加密入库；审核通过后发起 Paystack 转账，
//! 转账结果由回调确认。拒绝或转账失败时原路退回钱包。

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use agri_shared::config::MarketplaceConfig;
use agri_shared::crypto::{FieldEncryptor, mask_account_number};
use agri_shared::error::AgriError;
use agri_shared::observability::metrics as app_metrics;

use super::dto::{ReviewWithdrawalRequest, WithdrawalRequest, WithdrawalView};
use super::{normalize_page, validate_request};
use crate::error::{MarketError, Result};
use crate::escrow;
use crate::integrations::{PaymentGateway, RecipientRequest, TransferReceipt, TransferRequest};
use crate::models::{
    NewWithdrawal, Page, UserRole, Wallet, WalletEntry, WalletTransaction, WalletTxSource,
    Withdrawal, WithdrawalFilter, WithdrawalStatus,
};
use crate::notification::{NotificationBuilder, NotificationService};
use crate::repository::{WalletRepository, WalletRepositoryTrait};

/// Paystack 转账收款人类型（尼日利亚银行账户）
const RECIPIENT_TYPE: &str = "nuban";

/// 校验提现状态迁移
fn ensure_transition(from: WithdrawalStatus, to: WithdrawalStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(MarketError::InvalidWithdrawalTransition { from, to })
    }
}

fn reversal_entry(withdrawal: &Withdrawal, description: String) -> WalletEntry {
    WalletEntry {
        user_id: withdrawal.user_id,
        source: WalletTxSource::WithdrawalReversal,
        amount: withdrawal.amount,
        reference: escrow::withdrawal_reversal_reference(withdrawal.id),
        order_id: None,
        description,
    }
}

/// 发起转账的结果
#[derive(Debug, Clone, PartialEq, Eq)]
enum TransferAttempt {
    /// Paystack 同步返回成功
    Completed,
    /// 已受理，等待回调
    Accepted { transfer_code: String, status: String },
    /// 转账确定未生效，可以退回钱包
    Rejected(String),
    /// 超时或 5xx，Paystack 可能已经受理；保持 approved，由回调或核对结清
    Unknown(String),
}

fn classify_transfer(result: Result<TransferReceipt>) -> TransferAttempt {
    match result {
        Ok(receipt) => match receipt.status.as_str() {
            "success" => TransferAttempt::Completed,
            "failed" | "reversed" => TransferAttempt::Rejected(format!("transfer {}", receipt.status)),
            _ => TransferAttempt::Accepted {
                transfer_code: receipt.transfer_code,
                status: receipt.status,
            },
        },
        Err(e) if e.is_retryable() => TransferAttempt::Unknown(e.to_string()),
        Err(e) => TransferAttempt::Rejected(e.to_string()),
    }
}

#[derive(Clone)]
pub struct WalletService {
    pool: PgPool,
    wallets: Arc<dyn WalletRepositoryTrait>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    encryptor: Arc<FieldEncryptor>,
    notifications: NotificationService,
    config: MarketplaceConfig,
}

impl WalletService {
    pub fn new(
        pool: PgPool,
        wallets: Arc<dyn WalletRepositoryTrait>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        encryptor: Arc<FieldEncryptor>,
        notifications: NotificationService,
        config: MarketplaceConfig,
    ) -> Self {
        Self {
            pool,
            wallets,
            gateway,
            encryptor,
            notifications,
            config,
        }
    }

    /// 钱包余额，未产生过流水时为 0
    pub async fn balance(&self, user_id: Uuid) -> Result<Wallet> {
        let wallet = self.wallets.find_wallet(user_id).await?;
        Ok(wallet.unwrap_or_else(|| Wallet {
            user_id,
            balance: Decimal::ZERO,
            updated_at: Utc::now(),
        }))
    }

    pub async fn transactions(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<WalletTransaction>> {
        let (page, page_size) = normalize_page(page, page_size);
        let (items, total) = self.wallets.list_transactions(user_id, page, page_size).await?;
        Ok(Page::new(items, total, page, page_size))
    }

    // ==================== 提现 ====================

    /// 申请提现
    ///
    /// 扣款与提现记录在同一事务内写入，余额不足时整体回滚
    #[instrument(skip(self, req), fields(user_id = %user_id, amount = %req.amount))]
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        role: UserRole,
        req: WithdrawalRequest,
    ) -> Result<WithdrawalView> {
        if role.is_staff() {
            return Err(MarketError::Forbidden("工作人员账号不能提现".to_string()));
        }
        validate_request(&req)?;
        if req.amount.scale() > 2 {
            return Err(MarketError::Validation("amount: 最多两位小数".to_string()));
        }
        if req.amount < self.config.min_withdrawal {
            return Err(MarketError::BelowMinimumWithdrawal {
                minimum: self.config.min_withdrawal.to_string(),
            });
        }

        let encrypted = self
            .encryptor
            .encrypt(&req.account_number)
            .map_err(AgriError::from)?;
        let id = Uuid::now_v7();

        let mut tx = self.pool.begin().await?;
        WalletRepository::apply_entry_in_tx(
            &mut tx,
            &WalletEntry {
                user_id,
                source: WalletTxSource::Withdrawal,
                amount: req.amount,
                reference: escrow::withdrawal_reference(id),
                order_id: None,
                description: format!(
                    "Withdrawal to {} {}",
                    req.bank_code,
                    mask_account_number(&req.account_number)
                ),
            },
        )
        .await?;
        let withdrawal = WalletRepository::create_withdrawal_in_tx(
            &mut tx,
            id,
            &NewWithdrawal {
                user_id,
                amount: req.amount,
                bank_code: req.bank_code,
                account_number: encrypted,
                account_name: req.account_name,
            },
        )
        .await?;
        tx.commit().await?;

        app_metrics::record_withdrawal(withdrawal.status.as_str());
        info!(withdrawal_id = %withdrawal.id, "提现申请已创建");
        self.notifications
            .notify_async(NotificationBuilder::withdrawal_updated(&withdrawal));

        Ok(WithdrawalView::from_withdrawal(
            withdrawal,
            mask_account_number(&req.account_number),
        ))
    }

    /// 管理员审核提现
    ///
    /// - 拒绝：退回钱包
    /// - 通过且已配置 Paystack：发起转账，状态为 approved，等待回调
    /// - 通过但未配置 Paystack：视为线下打款，直接标记 paid
    #[instrument(skip(self, req), fields(withdrawal_id = %withdrawal_id, approve = req.approve))]
    pub async fn review(
        &self,
        admin_id: Uuid,
        withdrawal_id: Uuid,
        req: ReviewWithdrawalRequest,
    ) -> Result<WithdrawalView> {
        validate_request(&req)?;
        let note = req.note.as_deref().map(str::trim).filter(|n| !n.is_empty());

        let mut tx = self.pool.begin().await?;
        let current = WalletRepository::lock_withdrawal_in_tx(&mut tx, withdrawal_id)
            .await?
            .ok_or(MarketError::WithdrawalNotFound(withdrawal_id))?;

        let target = if req.approve {
            WithdrawalStatus::Approved
        } else {
            WithdrawalStatus::Rejected
        };
        ensure_transition(current.status, target)?;

        let withdrawal = if !req.approve {
            let updated = WalletRepository::update_withdrawal_in_tx(
                &mut tx,
                withdrawal_id,
                WithdrawalStatus::Rejected,
                Some(admin_id),
                note,
                None,
            )
            .await?;
            WalletRepository::apply_entry_in_tx(
                &mut tx,
                &reversal_entry(&updated, "Withdrawal rejected".to_string()),
            )
            .await?;
            tx.commit().await?;
            updated
        } else if self.gateway.is_none() {
            let updated = WalletRepository::update_withdrawal_in_tx(
                &mut tx,
                withdrawal_id,
                WithdrawalStatus::Paid,
                Some(admin_id),
                note.or(Some("manual payout")),
                None,
            )
            .await?;
            tx.commit().await?;
            updated
        } else {
            let reference = escrow::new_transfer_reference(withdrawal_id);
            let approved = WalletRepository::update_withdrawal_in_tx(
                &mut tx,
                withdrawal_id,
                WithdrawalStatus::Approved,
                Some(admin_id),
                note,
                Some(&reference),
            )
            .await?;
            tx.commit().await?;
            self.start_transfer(approved).await?
        };

        app_metrics::record_withdrawal(withdrawal.status.as_str());
        info!(status = %withdrawal.status, "提现审核完成");
        self.notifications
            .notify_async(NotificationBuilder::withdrawal_updated(&withdrawal));
        Ok(self.to_view(withdrawal))
    }

    /// 发起转账
    ///
    /// 只有确定未发出的转账才退款；结果未知时保持 approved
    async fn start_transfer(&self, withdrawal: Withdrawal) -> Result<Withdrawal> {
        let Some(gateway) = self.gateway.as_ref() else {
            return Err(MarketError::NotConfigured("paystack"));
        };
        let Some(reference) = withdrawal.transfer_reference.clone() else {
            return Err(MarketError::Internal(format!(
                "提现 {} 缺少转账参考号",
                withdrawal.id
            )));
        };

        match self.attempt_transfer(gateway.as_ref(), &withdrawal, &reference).await {
            TransferAttempt::Completed => {
                info!(reference = %reference, "转账已即时到账");
                Ok(self
                    .settle_transfer(&reference, true, None)
                    .await?
                    .unwrap_or(withdrawal))
            }
            TransferAttempt::Accepted {
                transfer_code,
                status,
            } => {
                info!(transfer_code = %transfer_code, status = %status, "转账已发起，等待回调确认");
                Ok(withdrawal)
            }
            TransferAttempt::Rejected(reason) => {
                error!(reference = %reference, reason = %reason, "转账未能发起，退回钱包");
                Ok(self
                    .settle_transfer(&reference, false, Some("transfer could not be initiated"))
                    .await?
                    .unwrap_or(withdrawal))
            }
            TransferAttempt::Unknown(reason) => {
                warn!(
                    reference = %reference,
                    reason = %reason,
                    "转账结果未知，保持 approved 等待回调或核对"
                );
                Ok(withdrawal)
            }
        }
    }

    async fn attempt_transfer(
        &self,
        gateway: &dyn PaymentGateway,
        withdrawal: &Withdrawal,
        reference: &str,
    ) -> TransferAttempt {
        let account_number = match self.encryptor.decrypt(&withdrawal.account_number) {
            Ok(plain) => plain,
            Err(e) => return TransferAttempt::Rejected(format!("账号解密失败: {e}")),
        };
        let amount = match escrow::to_kobo(withdrawal.amount) {
            Ok(kobo) => kobo,
            Err(e) => return TransferAttempt::Rejected(e.to_string()),
        };
        // 收款人未建立时转账不可能发出，任何错误都可以安全退款
        let recipient = match gateway
            .create_transfer_recipient(&RecipientRequest {
                recipient_type: RECIPIENT_TYPE.to_string(),
                name: withdrawal.account_name.clone(),
                account_number,
                bank_code: withdrawal.bank_code.clone(),
                currency: self.config.currency.clone(),
            })
            .await
        {
            Ok(code) => code,
            Err(e) => return TransferAttempt::Rejected(format!("recipient: {e}")),
        };
        classify_transfer(
            gateway
                .initiate_transfer(&TransferRequest {
                    source: "balance".to_string(),
                    amount,
                    recipient,
                    reference: reference.to_string(),
                    reason: format!("AgriCompass payout {}", withdrawal.id),
                })
                .await,
        )
    }

    /// 向 Paystack 查询 approved 提现的转账状态并结清
    ///
    /// 用于回调丢失或发起时结果未知的提现；仍在处理中则原样返回
    #[instrument(skip(self), fields(withdrawal_id = %withdrawal_id))]
    pub async fn reconcile_transfer(&self, withdrawal_id: Uuid) -> Result<WithdrawalView> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or(MarketError::NotConfigured("paystack"))?;
        let withdrawal = self
            .wallets
            .find_withdrawal(withdrawal_id)
            .await?
            .ok_or(MarketError::WithdrawalNotFound(withdrawal_id))?;
        if withdrawal.status != WithdrawalStatus::Approved {
            return Ok(self.to_view(withdrawal));
        }
        let Some(reference) = withdrawal.transfer_reference.clone() else {
            return Err(MarketError::Internal(format!(
                "提现 {} 缺少转账参考号",
                withdrawal.id
            )));
        };

        let receipt = gateway.verify_transfer(&reference).await?;
        let settled = match receipt.status.as_str() {
            "success" => self.settle_transfer(&reference, true, None).await?,
            "failed" | "reversed" => {
                self.settle_transfer(&reference, false, Some("transfer failed"))
                    .await?
            }
            other => {
                info!(status = other, "转账仍在处理中");
                None
            }
        };
        Ok(self.to_view(settled.unwrap_or(withdrawal)))
    }

    /// 处理转账结果（回调或同步返回）
    ///
    /// 只处理 approved 状态的提现，重复结果返回 None
    #[instrument(skip(self))]
    pub async fn settle_transfer(
        &self,
        transfer_reference: &str,
        success: bool,
        reason: Option<&str>,
    ) -> Result<Option<Withdrawal>> {
        let mut tx = self.pool.begin().await?;
        let Some(current) =
            WalletRepository::lock_withdrawal_by_transfer_in_tx(&mut tx, transfer_reference).await?
        else {
            warn!("未找到对应的提现记录");
            return Ok(None);
        };
        if current.status != WithdrawalStatus::Approved {
            info!(status = %current.status, "提现已结清，忽略重复结果");
            return Ok(None);
        }

        let updated = Self::settle_in_tx(&mut tx, &current, success, reason).await?;
        tx.commit().await?;

        app_metrics::record_withdrawal(updated.status.as_str());
        info!(withdrawal_id = %updated.id, status = %updated.status, "转账结果已处理");
        self.notifications
            .notify_async(NotificationBuilder::withdrawal_updated(&updated));
        Ok(Some(updated))
    }

    async fn settle_in_tx(
        tx: &mut PgConnection,
        current: &Withdrawal,
        success: bool,
        reason: Option<&str>,
    ) -> Result<Withdrawal> {
        let target = if success {
            WithdrawalStatus::Paid
        } else {
            WithdrawalStatus::Failed
        };
        ensure_transition(current.status, target)?;

        let updated =
            WalletRepository::update_withdrawal_in_tx(&mut *tx, current.id, target, None, reason, None)
                .await?;
        if !success {
            WalletRepository::apply_entry_in_tx(
                &mut *tx,
                &reversal_entry(&updated, "Transfer failed".to_string()),
            )
            .await?;
        }
        Ok(updated)
    }

    // ==================== 查询 ====================

    pub async fn get_withdrawal(
        &self,
        withdrawal_id: Uuid,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<WithdrawalView> {
        let withdrawal = self
            .wallets
            .find_withdrawal(withdrawal_id)
            .await?
            .ok_or(MarketError::WithdrawalNotFound(withdrawal_id))?;
        if role != UserRole::Admin && withdrawal.user_id != user_id {
            return Err(MarketError::WithdrawalNotFound(withdrawal_id));
        }
        Ok(self.to_view(withdrawal))
    }

    /// 提现列表；`user_id` 为 None 时返回全部（管理员）
    pub async fn list_withdrawals(
        &self,
        user_id: Option<Uuid>,
        status: Option<WithdrawalStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<Page<WithdrawalView>> {
        let (page, page_size) = normalize_page(page, page_size);
        let filter = WithdrawalFilter {
            user_id,
            status,
            page,
            page_size,
        };
        let (items, total) = self.wallets.list_withdrawals(&filter).await?;
        let views = items.into_iter().map(|w| self.to_view(w)).collect();
        Ok(Page::new(views, total, page, page_size))
    }

    /// 解密后脱敏；密文损坏时整体遮盖
    fn to_view(&self, withdrawal: Withdrawal) -> WithdrawalView {
        let masked = match self.encryptor.decrypt(&withdrawal.account_number) {
            Ok(plain) => mask_account_number(&plain),
            Err(e) => {
                warn!(withdrawal_id = %withdrawal.id, error = %e, "账号解密失败");
                "****".to_string()
            }
        };
        WithdrawalView::from_withdrawal(withdrawal, masked)
    }
}
