//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标服务器任务句柄
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 安装 recorder 并在 `port` 上暴露 `/metrics`
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    describe_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    metrics::describe_counter!("orders_created_total", "Orders created at checkout");
    metrics::describe_counter!(
        "order_transitions_total",
        "Order status transitions by target status"
    );
    metrics::describe_counter!("payments_total", "Payment outcomes by status");
    metrics::describe_counter!(
        "paystack_webhooks_total",
        "Paystack webhook deliveries by event and outcome"
    );
    metrics::describe_counter!("withdrawals_total", "Withdrawal requests by status");
    metrics::describe_counter!(
        "notifications_sent_total",
        "Notifications delivered by channel and outcome"
    );
    metrics::describe_gauge!("ws_connections", "Open realtime websocket connections");
    metrics::describe_counter!("worker_runs_total", "Background worker runs");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 业务指标记录
// ============================================================================

#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

#[inline]
pub fn record_orders_created(count: u64) {
    metrics::counter!("orders_created_total").increment(count);
}

#[inline]
pub fn record_order_transition(to_status: &str) {
    metrics::counter!("order_transitions_total", "to" => to_status.to_string()).increment(1);
}

#[inline]
pub fn record_payment(status: &str) {
    metrics::counter!("payments_total", "status" => status.to_string()).increment(1);
}

#[inline]
pub fn record_webhook(event: &str, outcome: &str) {
    metrics::counter!(
        "paystack_webhooks_total",
        "event" => event.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_withdrawal(status: &str) {
    metrics::counter!("withdrawals_total", "status" => status.to_string()).increment(1);
}

#[inline]
pub fn record_notification(channel: &str, success: bool) {
    metrics::counter!(
        "notifications_sent_total",
        "channel" => channel.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

#[inline]
pub fn set_ws_connections(count: usize) {
    metrics::gauge!("ws_connections").set(count as f64);
}

#[inline]
pub fn record_worker_run(worker: &str, processed: u64) {
    metrics::counter!("worker_runs_total", "worker" => worker.to_string()).increment(1);
    metrics::counter!("worker_processed_total", "worker" => worker.to_string())
        .increment(processed);
}
