//! 交易市场枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，数据库中以小写下划线字符串存储

use std::fmt;

use serde::{Deserialize, Serialize};

/// 为枚举生成 `as_str` 与 `Display`，与数据库存储值一致
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum UserRole {
    Farmer,
    Buyer,
    FieldOfficer,
    Admin,
}

string_enum!(UserRole {
    Farmer => "farmer",
    Buyer => "buyer",
    FieldOfficer => "field_officer",
    Admin => "admin",
});

impl UserRole {
    /// 可自助注册的角色
    pub fn is_self_registrable(&self) -> bool {
        matches!(self, Self::Farmer | Self::Buyer)
    }

    /// 写操作需要记录审计日志的角色
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::FieldOfficer | Self::Admin)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
}

string_enum!(UserStatus {
    Active => "active",
    Suspended => "suspended",
});

/// 商品状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ListingStatus {
    /// 在售
    #[default]
    Active,
    /// 农户暂停，或未认证农户发布后等待认证
    Paused,
    /// 库存售罄，补货后恢复在售
    SoldOut,
    /// 已下架，不再展示
    Archived,
}

string_enum!(ListingStatus {
    Active => "active",
    Paused => "paused",
    SoldOut => "sold_out",
    Archived => "archived",
});

/// 订单状态
///
/// ```text
/// pending ──► accepted ──► delivered ──► completed
///    │            │
///    ├──► rejected└──► cancelled
///    └──► cancelled
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Delivered,
    Completed,
    Cancelled,
}

string_enum!(OrderStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Delivered => "delivered",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    /// 状态图上的合法边（不考虑操作者）
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Accepted, Delivered)
                | (Accepted, Cancelled)
                | (Delivered, Completed)
        )
    }
}

/// 托管支付状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum PaymentStatus {
    /// 已创建，等待买家付款
    #[default]
    AwaitingPayment,
    /// 已付款，资金由平台托管
    Held,
    /// 订单全部结清，至少一笔放款给农户
    Released,
    /// 订单全部取消/拒绝，资金退回买家钱包
    Refunded,
    /// 支付失败或超时
    Failed,
}

string_enum!(PaymentStatus {
    AwaitingPayment => "awaiting_payment",
    Held => "held",
    Released => "released",
    Refunded => "refunded",
    Failed => "failed",
});

impl PaymentStatus {
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (AwaitingPayment, Held)
                | (AwaitingPayment, Failed)
                | (Held, Released)
                | (Held, Refunded)
                | (Failed, Refunded)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum WalletTxKind {
    Credit,
    Debit,
}

string_enum!(WalletTxKind {
    Credit => "credit",
    Debit => "debit",
});

/// 钱包流水来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum WalletTxSource {
    EscrowRelease,
    Refund,
    Withdrawal,
    WithdrawalReversal,
    Adjustment,
}

string_enum!(WalletTxSource {
    EscrowRelease => "escrow_release",
    Refund => "refund",
    Withdrawal => "withdrawal",
    WithdrawalReversal => "withdrawal_reversal",
    Adjustment => "adjustment",
});

impl WalletTxSource {
    pub fn kind(&self) -> WalletTxKind {
        match self {
            Self::Withdrawal => WalletTxKind::Debit,
            Self::EscrowRelease | Self::Refund | Self::WithdrawalReversal | Self::Adjustment => {
                WalletTxKind::Credit
            }
        }
    }
}

/// 提现状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum WithdrawalStatus {
    #[default]
    Pending,
    /// 已审核，转账处理中
    Approved,
    Paid,
    Rejected,
    /// 转账失败，金额已退回钱包
    Failed,
}

string_enum!(WithdrawalStatus {
    Pending => "pending",
    Approved => "approved",
    Paid => "paid",
    Rejected => "rejected",
    Failed => "failed",
});

impl WithdrawalStatus {
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Paid) | (Approved, Failed)
        )
    }
}

/// 农户认证状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum VerificationStatus {
    #[default]
    Pending,
    InReview,
    Approved,
    Rejected,
}

string_enum!(VerificationStatus {
    Pending => "pending",
    InReview => "in_review",
    Approved => "approved",
    Rejected => "rejected",
});

impl VerificationStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InReview)
    }
}

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPlaced,
    OrderAccepted,
    OrderRejected,
    OrderDelivered,
    OrderCompleted,
    OrderCancelled,
    PaymentReceived,
    EscrowReleased,
    RefundIssued,
    VerificationSubmitted,
    VerificationApproved,
    VerificationRejected,
    WithdrawalApproved,
    WithdrawalRejected,
    WithdrawalPaid,
    WithdrawalFailed,
    NewReview,
    System,
}

string_enum!(NotificationKind {
    OrderPlaced => "order_placed",
    OrderAccepted => "order_accepted",
    OrderRejected => "order_rejected",
    OrderDelivered => "order_delivered",
    OrderCompleted => "order_completed",
    OrderCancelled => "order_cancelled",
    PaymentReceived => "payment_received",
    EscrowReleased => "escrow_released",
    RefundIssued => "refund_issued",
    VerificationSubmitted => "verification_submitted",
    VerificationApproved => "verification_approved",
    VerificationRejected => "verification_rejected",
    WithdrawalApproved => "withdrawal_approved",
    WithdrawalRejected => "withdrawal_rejected",
    WithdrawalPaid => "withdrawal_paid",
    WithdrawalFailed => "withdrawal_failed",
    NewReview => "new_review",
    System => "system",
});

impl NotificationKind {
    /// 是否同时发送邮件
    pub fn sends_email(&self) -> bool {
        matches!(
            self,
            Self::OrderPlaced
                | Self::PaymentReceived
                | Self::VerificationApproved
                | Self::VerificationRejected
                | Self::WithdrawalApproved
                | Self::WithdrawalRejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        assert_eq!(
            serde_json::to_string(&UserRole::FieldOfficer).unwrap(),
            "\"field_officer\""
        );
        let role: UserRole = serde_json::from_str("\"buyer\"").unwrap();
        assert_eq!(role, UserRole::Buyer);
        assert_eq!("admin".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert!("root".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_role_capabilities() {
        assert!(UserRole::Farmer.is_self_registrable());
        assert!(UserRole::Buyer.is_self_registrable());
        assert!(!UserRole::FieldOfficer.is_self_registrable());
        assert!(!UserRole::Admin.is_self_registrable());
        assert!(UserRole::FieldOfficer.is_staff());
        assert!(!UserRole::Farmer.is_staff());
    }

    #[test]
    fn test_order_transitions() {
        use OrderStatus::*;
        let all = [Pending, Accepted, Rejected, Delivered, Completed, Cancelled];
        let legal = [
            (Pending, Accepted),
            (Pending, Rejected),
            (Pending, Cancelled),
            (Accepted, Delivered),
            (Accepted, Cancelled),
            (Delivered, Completed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_order_states() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Delivered.is_terminal());
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_payment_transitions() {
        use PaymentStatus::*;
        assert!(AwaitingPayment.can_transition_to(Held));
        assert!(Held.can_transition_to(Released));
        assert!(Failed.can_transition_to(Refunded));
        assert!(!Released.can_transition_to(Refunded));
        assert!(!Held.can_transition_to(AwaitingPayment));
        assert_eq!(AwaitingPayment.to_string(), "awaiting_payment");
    }

    #[test]
    fn test_withdrawal_transitions() {
        use WithdrawalStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Paid));
        assert!(Approved.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Paid));
        assert!(!Rejected.can_transition_to(Approved));
    }

    #[test]
    fn test_wallet_source_kind() {
        assert_eq!(WalletTxSource::Withdrawal.kind(), WalletTxKind::Debit);
        assert_eq!(WalletTxSource::EscrowRelease.kind(), WalletTxKind::Credit);
        assert_eq!(WalletTxSource::WithdrawalReversal.kind(), WalletTxKind::Credit);
    }

    #[test]
    fn test_notification_kind() {
        assert!(NotificationKind::OrderPlaced.sends_email());
        assert!(!NotificationKind::OrderDelivered.sends_email());
        assert_eq!(
            serde_json::to_string(&NotificationKind::EscrowReleased).unwrap(),
            "\"escrow_released\""
        );
        assert_eq!(NotificationKind::NewReview.as_str(), "new_review");
    }

    #[test]
    fn test_verification_open() {
        assert!(VerificationStatus::Pending.is_open());
        assert!(VerificationStatus::InReview.is_open());
        assert!(!VerificationStatus::Rejected.is_open());
    }
}
