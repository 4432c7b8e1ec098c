//! 通知类型定义

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::models::{
    NewNotification, Notification, NotificationKind, Order, OrderStatus, Withdrawal,
    WithdrawalStatus,
};
use crate::order_flow::notification_kind;

/// 投递渠道（站内通知总是落库，渠道只负责额外投递）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Realtime,
    Email,
}

/// 一次投递：已落库的通知加上收件人信息
#[derive(Debug, Clone)]
pub struct Delivery {
    pub notification: Notification,
    /// 仅在需要发邮件时查询
    pub recipient_email: Option<String>,
    pub recipient_name: Option<String>,
}

impl Delivery {
    pub fn new(notification: Notification) -> Self {
        Self {
            notification,
            recipient_email: None,
            recipient_name: None,
        }
    }

    pub fn with_recipient(mut self, email: impl Into<String>, name: impl Into<String>) -> Self {
        self.recipient_email = Some(email.into());
        self.recipient_name = Some(name.into());
        self
    }

    pub fn user_id(&self) -> Uuid {
        self.notification.user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Success,
    Failed,
    /// 渠道不可用（未配置、用户不在线等）
    Skipped,
}

/// 单渠道投递结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResult {
    pub channel: ChannelType,
    pub status: SendStatus,
    pub error: Option<String>,
    pub external_message_id: Option<String>,
    pub duration_ms: u64,
}

impl ChannelResult {
    pub fn success(channel: ChannelType, external_message_id: Option<String>, duration_ms: u64) -> Self {
        Self {
            channel,
            status: SendStatus::Success,
            error: None,
            external_message_id,
            duration_ms,
        }
    }

    pub fn failed(channel: ChannelType, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            channel,
            status: SendStatus::Failed,
            error: Some(error.into()),
            external_message_id: None,
            duration_ms,
        }
    }

    pub fn skipped(channel: ChannelType, reason: impl Into<String>) -> Self {
        Self {
            channel,
            status: SendStatus::Skipped,
            error: Some(reason.into()),
            external_message_id: None,
            duration_ms: 0,
        }
    }
}

/// 一条通知在所有渠道上的投递结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub notification_id: Uuid,
    pub channel_results: Vec<ChannelResult>,
    pub duration_ms: u64,
}

impl DeliveryReport {
    pub fn count(&self, status: SendStatus) -> usize {
        self.channel_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(SendStatus::Failed) > 0
    }
}

/// 业务事件对应的通知内容
pub struct NotificationBuilder;

impl NotificationBuilder {
    fn build(user_id: Uuid, kind: NotificationKind, title: String, body: String, data: serde_json::Value) -> NewNotification {
        NewNotification {
            user_id,
            kind,
            title,
            body,
            data,
        }
    }

    fn order_data(order: &Order) -> serde_json::Value {
        json!({
            "orderId": order.id,
            "orderNo": order.order_no,
            "status": order.status,
            "totalAmount": order.total_amount,
        })
    }

    /// 买家付款成功后通知农户有新订单
    pub fn order_placed(order: &Order, listing_title: &str) -> NewNotification {
        Self::build(
            order.farmer_id,
            NotificationKind::OrderPlaced,
            "New order received".to_string(),
            format!(
                "Order {} for {} x {} has been paid and is awaiting your acceptance.",
                order.order_no, order.quantity, listing_title
            ),
            Self::order_data(order),
        )
    }

    /// 通知买家付款已确认（资金托管中）
    pub fn payment_received(buyer_id: Uuid, reference: &str, amount: Decimal) -> NewNotification {
        Self::build(
            buyer_id,
            NotificationKind::PaymentReceived,
            "Payment confirmed".to_string(),
            format!(
                "Your payment of NGN {} ({}) is held in escrow until you confirm delivery.",
                amount, reference
            ),
            json!({ "reference": reference, "amount": amount }),
        )
    }

    /// 订单状态变化
    pub fn order_status_changed(order: &Order, recipient: Uuid) -> NewNotification {
        let body = match order.status {
            OrderStatus::Accepted => format!("Order {} was accepted by the farmer.", order.order_no),
            OrderStatus::Rejected => format!(
                "Order {} was rejected. Any payment has been refunded to your wallet.",
                order.order_no
            ),
            OrderStatus::Delivered => format!(
                "Order {} was marked as delivered. Please confirm receipt.",
                order.order_no
            ),
            OrderStatus::Completed => format!("Order {} is completed.", order.order_no),
            OrderStatus::Cancelled => match order.cancel_reason.as_deref() {
                Some(reason) => format!("Order {} was cancelled: {}", order.order_no, reason),
                None => format!("Order {} was cancelled.", order.order_no),
            },
            OrderStatus::Pending => format!("Order {} was placed.", order.order_no),
        };

        Self::build(
            recipient,
            notification_kind(order.status),
            format!("Order {}", order.status),
            body,
            Self::order_data(order),
        )
    }

    pub fn escrow_released(order: &Order, payout: Decimal) -> NewNotification {
        Self::build(
            order.farmer_id,
            NotificationKind::EscrowReleased,
            "Funds released".to_string(),
            format!(
                "NGN {} from order {} has been credited to your wallet.",
                payout, order.order_no
            ),
            json!({ "orderId": order.id, "orderNo": order.order_no, "amount": payout }),
        )
    }

    pub fn refund_issued(buyer_id: Uuid, reference: &str, amount: Decimal) -> NewNotification {
        Self::build(
            buyer_id,
            NotificationKind::RefundIssued,
            "Refund issued".to_string(),
            format!("NGN {} has been refunded to your wallet ({}).", amount, reference),
            json!({ "reference": reference, "amount": amount }),
        )
    }

    pub fn verification_submitted(officer_or_admin: Uuid, verification_id: Uuid, farm_name: &str) -> NewNotification {
        Self::build(
            officer_or_admin,
            NotificationKind::VerificationSubmitted,
            "New verification request".to_string(),
            format!("{} is waiting for a field visit.", farm_name),
            json!({ "verificationId": verification_id }),
        )
    }

    pub fn verification_decided(
        farmer_id: Uuid,
        verification_id: Uuid,
        approved: bool,
        notes: Option<&str>,
    ) -> NewNotification {
        let (kind, title, body) = if approved {
            (
                NotificationKind::VerificationApproved,
                "Farm verified",
                "Your farm has been verified. Your paused listings are now live.".to_string(),
            )
        } else {
            (
                NotificationKind::VerificationRejected,
                "Verification not approved",
                match notes {
                    Some(notes) => format!("Your verification was not approved: {}", notes),
                    None => "Your verification was not approved. You may resubmit.".to_string(),
                },
            )
        };
        Self::build(
            farmer_id,
            kind,
            title.to_string(),
            body,
            json!({ "verificationId": verification_id }),
        )
    }

    pub fn withdrawal_updated(withdrawal: &Withdrawal) -> NewNotification {
        let (kind, title, body) = match withdrawal.status {
            WithdrawalStatus::Approved => (
                NotificationKind::WithdrawalApproved,
                "Withdrawal approved",
                format!("Your withdrawal of NGN {} is being transferred.", withdrawal.amount),
            ),
            WithdrawalStatus::Paid => (
                NotificationKind::WithdrawalPaid,
                "Withdrawal paid",
                format!("NGN {} has been sent to your bank account.", withdrawal.amount),
            ),
            WithdrawalStatus::Rejected => (
                NotificationKind::WithdrawalRejected,
                "Withdrawal rejected",
                format!(
                    "Your withdrawal of NGN {} was rejected and the amount returned to your wallet.",
                    withdrawal.amount
                ),
            ),
            WithdrawalStatus::Failed => (
                NotificationKind::WithdrawalFailed,
                "Withdrawal failed",
                format!(
                    "The transfer of NGN {} failed and the amount was returned to your wallet.",
                    withdrawal.amount
                ),
            ),
            WithdrawalStatus::Pending => (
                NotificationKind::System,
                "Withdrawal requested",
                format!("Your withdrawal of NGN {} is awaiting review.", withdrawal.amount),
            ),
        };
        Self::build(
            withdrawal.user_id,
            kind,
            title.to_string(),
            body,
            json!({
                "withdrawalId": withdrawal.id,
                "amount": withdrawal.amount,
                "status": withdrawal.status,
                "note": withdrawal.review_note,
            }),
        )
    }

    pub fn new_review(farmer_id: Uuid, order_no: &str, rating: i16) -> NewNotification {
        Self::build(
            farmer_id,
            NotificationKind::NewReview,
            "New review".to_string(),
            format!("Order {} received a {}-star review.", order_no, rating),
            json!({ "orderNo": order_no, "rating": rating }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_order;
    use chrono::Utc;

    #[test]
    fn test_order_placed_targets_farmer() {
        let order = sample_order(Uuid::new_v4(), Uuid::new_v4(), OrderStatus::Pending);
        let n = NotificationBuilder::order_placed(&order, "White Maize");
        assert_eq!(n.user_id, order.farmer_id);
        assert_eq!(n.kind, NotificationKind::OrderPlaced);
        assert!(n.body.contains("White Maize"));
        assert_eq!(n.data["orderNo"], order.order_no.as_str());
    }

    #[test]
    fn test_status_change_kind_follows_order() {
        let mut order = sample_order(Uuid::new_v4(), Uuid::new_v4(), OrderStatus::Cancelled);
        order.cancel_reason = Some("changed my mind".to_string());
        let n = NotificationBuilder::order_status_changed(&order, order.farmer_id);
        assert_eq!(n.kind, NotificationKind::OrderCancelled);
        assert!(n.body.contains("changed my mind"));
        assert_eq!(n.title, "Order cancelled");
    }

    #[test]
    fn test_withdrawal_kinds() {
        let now = Utc::now();
        let mut withdrawal = Withdrawal {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount: Decimal::from(5000),
            bank_code: "058".to_string(),
            account_number: "enc".to_string(),
            account_name: "Ada Obi".to_string(),
            status: WithdrawalStatus::Rejected,
            reviewed_by: None,
            review_note: Some("name mismatch".to_string()),
            transfer_reference: None,
            created_at: now,
            updated_at: now,
        };
        let n = NotificationBuilder::withdrawal_updated(&withdrawal);
        assert_eq!(n.kind, NotificationKind::WithdrawalRejected);
        assert_eq!(n.data["note"], "name mismatch");

        withdrawal.status = WithdrawalStatus::Paid;
        assert_eq!(
            NotificationBuilder::withdrawal_updated(&withdrawal).kind,
            NotificationKind::WithdrawalPaid
        );
    }

    #[test]
    fn test_verification_decision() {
        let farmer = Uuid::new_v4();
        let n = NotificationBuilder::verification_decided(farmer, Uuid::new_v4(), false, Some("blurry documents"));
        assert_eq!(n.kind, NotificationKind::VerificationRejected);
        assert!(n.body.contains("blurry documents"));
        assert!(n.kind.sends_email());
    }

    #[test]
    fn test_delivery_report_counts() {
        let report = DeliveryReport {
            notification_id: Uuid::new_v4(),
            channel_results: vec![
                ChannelResult::success(ChannelType::Realtime, None, 1),
                ChannelResult::skipped(ChannelType::Email, "not configured"),
            ],
            duration_ms: 1,
        };
        assert_eq!(report.count(SendStatus::Success), 1);
        assert_eq!(report.count(SendStatus::Skipped), 1);
        assert!(!report.has_failures());
    }
}
