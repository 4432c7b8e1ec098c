//! 托管资金计算
//!
//! 平台服务费、kobo 换算、结算状态推导与钱包流水的幂等参考号。

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::error::{MarketError, Result};
use crate::models::{OrderStatus, PaymentStatus};
use crate::pricing::round_money;

const BPS_DENOMINATOR: i64 = 10_000;

/// 平台服务费 = 金额 × bps / 10000，保留两位小数
pub fn platform_fee(amount: Decimal, fee_bps: u32) -> Decimal {
    round_money(amount * Decimal::from(fee_bps) / Decimal::from(BPS_DENOMINATOR))
}

/// 放款金额与服务费
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub gross: Decimal,
    pub fee: Decimal,
    pub payout: Decimal,
}

pub fn settle(amount: Decimal, fee_bps: u32) -> Settlement {
    let fee = platform_fee(amount, fee_bps);
    Settlement {
        gross: amount,
        fee,
        payout: amount - fee,
    }
}

/// 奈拉转 kobo
pub fn to_kobo(amount: Decimal) -> Result<i64> {
    (round_money(amount) * Decimal::from(100))
        .to_i64()
        .ok_or_else(|| MarketError::Validation(format!("金额超出范围: {}", amount)))
}

pub fn from_kobo(kobo: i64) -> Decimal {
    Decimal::new(kobo, 2)
}

/// 根据同一笔支付下所有订单的状态推导支付状态
///
/// 仍有未结订单时保持托管；全部结清后，只要有一笔完成即视为已放款，否则为已退款
pub fn settlement_status(order_statuses: &[OrderStatus]) -> PaymentStatus {
    if order_statuses.iter().any(|s| !s.is_terminal()) {
        return PaymentStatus::Held;
    }
    if order_statuses.contains(&OrderStatus::Completed) {
        PaymentStatus::Released
    } else {
        PaymentStatus::Refunded
    }
}

pub fn escrow_reference(order_no: &str) -> String {
    format!("escrow:{}", order_no)
}

pub fn refund_reference(order_no: &str) -> String {
    format!("refund:{}", order_no)
}

/// 过期支付的迟到款项整笔退回
pub fn late_payment_reference(payment_reference: &str) -> String {
    format!("refund:payment:{}", payment_reference)
}

pub fn withdrawal_reference(withdrawal_id: Uuid) -> String {
    format!("withdrawal:{}", withdrawal_id)
}

pub fn withdrawal_reversal_reference(withdrawal_id: Uuid) -> String {
    format!("withdrawal_reversal:{}", withdrawal_id)
}

/// 支付参考号，同时作为 Paystack 交易 reference
pub fn new_payment_reference() -> String {
    format!("AGR-{}", Uuid::now_v7().simple())
}

/// 提现转账参考号
pub fn new_transfer_reference(withdrawal_id: Uuid) -> String {
    format!("AGR-WD-{}", withdrawal_id.simple())
}

/// 订单号：AGR-YYYYMMDD-XXXXXX
pub fn new_order_no(now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("AGR-{}-{}", now.format("%Y%m%d"), suffix.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_platform_fee_default_rate() {
        assert_eq!(platform_fee(d("1000.00"), 250), d("25.00"));
        // 333.33 * 2.5% = 8.33325 -> 8.33
        assert_eq!(platform_fee(d("333.33"), 250), d("8.33"));
        // 0.2 * 2.5% = 0.005 -> 0.01
        assert_eq!(platform_fee(d("0.20"), 250), d("0.01"));
        assert_eq!(platform_fee(d("1000"), 0), Decimal::ZERO);
    }

    #[test]
    fn test_settle_sums_to_gross() {
        let s = settle(d("1234.57"), 250);
        assert_eq!(s.fee + s.payout, s.gross);
        assert_eq!(s.fee, d("30.86"));
    }

    #[test]
    fn test_kobo_conversion() {
        assert_eq!(to_kobo(d("1500.50")).unwrap(), 150_050);
        assert_eq!(to_kobo(d("0.015")).unwrap(), 2);
        assert_eq!(from_kobo(150_050), d("1500.50"));
    }

    #[test]
    fn test_settlement_status() {
        use OrderStatus::*;
        assert_eq!(settlement_status(&[Completed, Accepted]), PaymentStatus::Held);
        assert_eq!(settlement_status(&[Completed, Cancelled]), PaymentStatus::Released);
        assert_eq!(settlement_status(&[Rejected, Cancelled]), PaymentStatus::Refunded);
        assert_eq!(settlement_status(&[Delivered]), PaymentStatus::Held);
    }

    #[test]
    fn test_references() {
        assert_eq!(escrow_reference("AGR-1"), "escrow:AGR-1");
        assert_eq!(refund_reference("AGR-1"), "refund:AGR-1");
        let id = Uuid::new_v4();
        assert_ne!(withdrawal_reference(id), withdrawal_reversal_reference(id));
        assert_ne!(new_payment_reference(), new_payment_reference());
    }

    #[test]
    fn test_order_no_format() {
        let now = "2024-06-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let no = new_order_no(now);
        assert!(no.starts_with("AGR-20240601-"));
        assert_eq!(no.len(), "AGR-20240601-".len() + 6);
        assert!(no[13..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
