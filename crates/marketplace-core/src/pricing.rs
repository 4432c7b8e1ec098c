//! 批量阶梯定价
//!
//! 每个商品最多 5 档阶梯价。按起订量降序取第一个满足
//! `quantity >= min_quantity` 且未超过 `max_quantity` 的档位，无匹配时使用基础单价。
//! 金额统一保留 2 位小数，四舍五入（中点远离零）。

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};
use crate::models::PricingTier;

pub const MAX_TIERS: usize = 5;

/// 阶梯价的定价参数（不含 id，便于校验新提交的数据）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSpec {
    pub min_quantity: Decimal,
    pub max_quantity: Option<Decimal>,
    pub price_per_unit: Decimal,
}

impl TierSpec {
    fn covers(&self, quantity: Decimal) -> bool {
        quantity >= self.min_quantity && self.max_quantity.is_none_or(|max| quantity <= max)
    }
}

impl From<&PricingTier> for TierSpec {
    fn from(tier: &PricingTier) -> Self {
        Self {
            min_quantity: tier.min_quantity,
            max_quantity: tier.max_quantity,
            price_per_unit: tier.price_per_unit,
        }
    }
}

/// 报价结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    /// 命中的档位，None 表示基础单价
    pub applied_tier: Option<TierSpec>,
    /// 相对基础单价节省的金额
    pub savings: Decimal,
}

/// 金额取两位小数
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// 校验阶梯价配置
///
/// - 最多 5 档
/// - 起订量与单价为正
/// - 上限不小于起订量
/// - 按起订量排序后区间不重叠，且只有最后一档可以无上限
pub fn validate_tiers(tiers: &[TierSpec]) -> Result<()> {
    if tiers.len() > MAX_TIERS {
        return Err(MarketError::InvalidPricingTiers(format!(
            "最多 {} 档，实际 {} 档",
            MAX_TIERS,
            tiers.len()
        )));
    }

    for tier in tiers {
        if tier.min_quantity <= Decimal::ZERO {
            return Err(MarketError::InvalidPricingTiers(
                "起订量必须大于 0".to_string(),
            ));
        }
        if tier.price_per_unit <= Decimal::ZERO {
            return Err(MarketError::InvalidPricingTiers(
                "单价必须大于 0".to_string(),
            ));
        }
        if let Some(max) = tier.max_quantity
            && max < tier.min_quantity
        {
            return Err(MarketError::InvalidPricingTiers(format!(
                "上限 {} 小于起订量 {}",
                max, tier.min_quantity
            )));
        }
    }

    let mut sorted: Vec<&TierSpec> = tiers.iter().collect();
    sorted.sort_by(|a, b| a.min_quantity.cmp(&b.min_quantity));

    for pair in sorted.windows(2) {
        let (lower, upper) = (pair[0], pair[1]);
        match lower.max_quantity {
            None => {
                return Err(MarketError::InvalidPricingTiers(format!(
                    "起订量 {} 的档位无上限，但其后还有档位",
                    lower.min_quantity
                )));
            }
            Some(max) if max >= upper.min_quantity => {
                return Err(MarketError::InvalidPricingTiers(format!(
                    "档位区间重叠: {}..={} 与 {}..",
                    lower.min_quantity, max, upper.min_quantity
                )));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// 选取适用的档位
pub fn select_tier(tiers: &[TierSpec], quantity: Decimal) -> Option<&TierSpec> {
    let mut candidates: Vec<&TierSpec> = tiers.iter().collect();
    candidates.sort_by(|a, b| b.min_quantity.cmp(&a.min_quantity));
    candidates.into_iter().find(|t| t.covers(quantity))
}

/// 计算单价
pub fn unit_price_for(base_price: Decimal, tiers: &[TierSpec], quantity: Decimal) -> Decimal {
    select_tier(tiers, quantity)
        .map(|t| t.price_per_unit)
        .unwrap_or(base_price)
}

/// 计算报价
pub fn quote(base_price: Decimal, tiers: &[TierSpec], quantity: Decimal) -> Result<PriceQuote> {
    if quantity <= Decimal::ZERO {
        return Err(MarketError::Validation("数量必须大于 0".to_string()));
    }

    let applied = select_tier(tiers, quantity).cloned();
    let unit_price = applied
        .as_ref()
        .map(|t| t.price_per_unit)
        .unwrap_or(base_price);
    let subtotal = round_money(unit_price * quantity);
    let savings = round_money((base_price - unit_price) * quantity).max(Decimal::ZERO);

    Ok(PriceQuote {
        quantity,
        unit_price,
        subtotal,
        applied_tier: applied,
        savings,
    })
}
