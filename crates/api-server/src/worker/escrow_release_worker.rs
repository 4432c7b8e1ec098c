//! 托管自动放款 Worker
//!
//! 买家在发货后超过 `auto_release_days` 仍未确认收货时，订单自动完成，
//! 托管资金扣除平台抽成后记入农户钱包。
//!
//! 订单逐个在独立事务中处理，`FOR UPDATE SKIP LOCKED` 保证多实例部署时不会重复放款。

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use agri_marketplace::OrderService;
use agri_shared::config::MarketplaceConfig;

pub struct EscrowReleaseWorker {
    orders: OrderService,
    /// 轮询间隔
    poll_interval: Duration,
}

impl EscrowReleaseWorker {
    pub fn new(orders: OrderService, poll_interval_secs: u64) -> Self {
        Self {
            orders,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
        }
    }

    /// 按交易市场配置的扫描间隔创建
    pub fn with_defaults(orders: OrderService, config: &MarketplaceConfig) -> Self {
        Self::new(orders, config.worker_interval_seconds)
    }

    /// 主循环：持续处理到期订单直到进程退出
    pub async fn run(&self) {
        info!(poll_interval = ?self.poll_interval, "EscrowReleaseWorker 已启动");

        loop {
            self.tick().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 执行一轮扫描，返回本轮放款的订单数
    pub async fn tick(&self) -> usize {
        match self.orders.auto_release_due(Utc::now()).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "自动放款扫描出错");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::test_support::lazy_order_service;

    #[tokio::test]
    async fn test_worker_uses_configured_interval() {
        let config = MarketplaceConfig {
            worker_interval_seconds: 30,
            ..Default::default()
        };
        let worker = EscrowReleaseWorker::with_defaults(lazy_order_service(), &config);
        assert_eq!(worker.poll_interval.as_secs(), 30);
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let worker = EscrowReleaseWorker::new(lazy_order_service(), 0);
        assert_eq!(worker.poll_interval.as_secs(), 1);
    }
}
