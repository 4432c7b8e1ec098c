//! 订单状态机
//!
//! 状态图本身定义在 [`OrderStatus::can_transition_to`]，这里补充操作者规则与每次迁移的副作用。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MarketError, Result};
use crate::models::{NotificationKind, Order, OrderStatus, UserRole};

/// 订单操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Accept,
    Reject,
    Deliver,
    /// 买家确认收货
    Confirm,
    Cancel,
    /// 超时未确认，系统自动放款
    AutoComplete,
    /// 超时未付款，系统取消
    Expire,
}

impl OrderAction {
    pub fn target(&self) -> OrderStatus {
        match self {
            Self::Accept => OrderStatus::Accepted,
            Self::Reject => OrderStatus::Rejected,
            Self::Deliver => OrderStatus::Delivered,
            Self::Confirm | Self::AutoComplete => OrderStatus::Completed,
            Self::Cancel | Self::Expire => OrderStatus::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Deliver => "deliver",
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
            Self::AutoComplete => "auto_complete",
            Self::Expire => "expire",
        }
    }
}

/// 执行操作的主体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    User { id: Uuid, role: UserRole },
    /// 后台任务
    System,
}

impl Actor {
    pub fn user(id: Uuid, role: UserRole) -> Self {
        Self::User { id, role }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User { id, .. } => Some(*id),
            Self::System => None,
        }
    }
}

/// 迁移的副作用
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionEffects {
    /// 归还商品库存
    pub restore_stock: bool,
    /// 资金已托管时退回买家钱包
    pub refund_buyer: bool,
    /// 放款给农户
    pub release_to_farmer: bool,
}

/// 校验操作者与状态，返回目标状态
pub fn authorize(order: &Order, action: OrderAction, actor: Actor) -> Result<OrderStatus> {
    let allowed = match (action, actor) {
        (OrderAction::Accept | OrderAction::Reject | OrderAction::Deliver, Actor::User { id, .. }) => {
            id == order.farmer_id
        }
        (OrderAction::Confirm, Actor::User { id, .. }) => id == order.buyer_id,
        (OrderAction::Cancel, Actor::User { id, role }) => {
            role == UserRole::Admin || id == order.buyer_id
        }
        (OrderAction::AutoComplete | OrderAction::Expire, Actor::System) => true,
        _ => false,
    };

    if !allowed {
        return Err(MarketError::Forbidden(format!(
            "无权对订单 {} 执行 {}",
            order.order_no,
            action.as_str()
        )));
    }

    let target = action.target();
    if !order.status.can_transition_to(target) {
        return Err(MarketError::InvalidOrderTransition {
            from: order.status,
            to: target,
        });
    }

    // 超时过期只针对仍在等待付款的订单
    if action == OrderAction::Expire && order.status != OrderStatus::Pending {
        return Err(MarketError::InvalidOrderTransition {
            from: order.status,
            to: target,
        });
    }

    Ok(target)
}

/// 计算迁移副作用
pub fn effects_of(target: OrderStatus) -> TransitionEffects {
    match target {
        OrderStatus::Rejected | OrderStatus::Cancelled => TransitionEffects {
            restore_stock: true,
            refund_buyer: true,
            release_to_farmer: false,
        },
        OrderStatus::Completed => TransitionEffects {
            release_to_farmer: true,
            ..Default::default()
        },
        _ => TransitionEffects::default(),
    }
}

/// 迁移后应通知的用户
///
/// 由用户发起时通知对方；系统发起时通知双方
pub fn notify_targets(order: &Order, actor: Actor) -> Vec<Uuid> {
    match actor.user_id() {
        Some(id) if order.is_party(id) => vec![order.counterparty(id)],
        _ => vec![order.buyer_id, order.farmer_id],
    }
}

pub fn notification_kind(target: OrderStatus) -> NotificationKind {
    match target {
        OrderStatus::Pending => NotificationKind::OrderPlaced,
        OrderStatus::Accepted => NotificationKind::OrderAccepted,
        OrderStatus::Rejected => NotificationKind::OrderRejected,
        OrderStatus::Delivered => NotificationKind::OrderDelivered,
        OrderStatus::Completed => NotificationKind::OrderCompleted,
        OrderStatus::Cancelled => NotificationKind::OrderCancelled,
    }
}
