//! 健康检查

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use agri_shared::database::Database;

use crate::state::AppState;

/// 存活探针
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.config.service_name,
    }))
}

/// 就绪探针：检查数据库和 Redis 连接
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = Database::from_pool(state.pool.clone())
        .health_check()
        .await
        .is_ok();
    let cache_ok = state.cache.health_check().await.is_ok();
    let all_ok = db_ok && cache_ok;

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if all_ok { "ok" } else { "degraded" },
            "service": state.config.service_name,
            "checks": {
                "database": if db_ok { "ok" } else { "fail" },
                "redis": if cache_ok { "ok" } else { "fail" },
                "paystack": if state.payments_enabled() { "configured" } else { "disabled" },
                "cloudinary": if state.uploads.is_some() { "configured" } else { "disabled" }
            }
        })),
    )
}
