//! AgriCompass 交易市场 API 服务
//!
//! 提供 REST API、WebSocket 推送、Paystack 回调与后台定时任务。

use std::sync::Arc;

use agri_api_server::{
    routes,
    state::AppState,
    worker::{EscrowReleaseWorker, PaymentExpiryWorker},
};
use agri_shared::{cache::Cache, config::AppConfig, database::Database, observability};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 配置自检失败（如生产环境使用默认 JWT 密钥）时拒绝启动
    let config = AppConfig::load("agricompass-api")?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        environment = %config.environment,
        "Starting agricompass-api on {}",
        config.server_addr()
    );

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }
    let cache = Arc::new(Cache::new(&config.redis)?);

    let config = Arc::new(config);
    let state = AppState::build(db.pool().clone(), cache, config.clone())?;

    let escrow_worker = EscrowReleaseWorker::with_defaults(state.orders.clone(), &config.marketplace);
    tokio::spawn(async move {
        escrow_worker.run().await;
    });

    let expiry_worker = PaymentExpiryWorker::with_defaults(state.orders.clone(), &config.marketplace);
    tokio::spawn(async move {
        expiry_worker.run().await;
    });

    let app = routes::app(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 收到 SIGTERM 或 Ctrl+C 后停止接收新连接，等待已有请求处理完毕
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
