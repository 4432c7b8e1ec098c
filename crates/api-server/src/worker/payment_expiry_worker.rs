//! 未付款订单过期 Worker
//!
//! 支付发起后超过 `payment_timeout_minutes` 仍未到账时，
//! 取消其下所有待付款订单、归还库存，并将支付标记为失败。

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use agri_marketplace::OrderService;
use agri_shared::config::MarketplaceConfig;

pub struct PaymentExpiryWorker {
    orders: OrderService,
    poll_interval: Duration,
}

impl PaymentExpiryWorker {
    pub fn new(orders: OrderService, poll_interval_secs: u64) -> Self {
        Self {
            orders,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
        }
    }

    pub fn with_defaults(orders: OrderService, config: &MarketplaceConfig) -> Self {
        Self::new(orders, config.worker_interval_seconds)
    }

    pub async fn run(&self) {
        info!(poll_interval = ?self.poll_interval, "PaymentExpiryWorker 已启动");

        loop {
            self.tick().await;
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// 执行一轮扫描，返回本轮过期的支付数
    pub async fn tick(&self) -> usize {
        match self.orders.expire_unpaid(Utc::now()).await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "未付款订单过期扫描出错");
                0
            }
        }
    }
}
