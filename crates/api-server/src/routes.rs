//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射与中间件顺序

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware::{self, from_fn, from_fn_with_state},
    routing::{MethodRouter, delete, get, patch, post, put},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use agri_marketplace::models::UserRole;
use agri_shared::config::CorsConfig;
use agri_shared::observability::middleware as obs_middleware;

use crate::{
    handlers,
    middleware::{
        CSRF_HEADER, audit_middleware, auth_middleware, csrf_middleware, rate_limit_middleware,
        require_role,
        role::{ADMIN, BUYER, FARMER, FIELD_OFFICER, REVIEWERS, TRADERS},
        security_headers,
    },
    realtime,
    state::AppState,
};

/// 仅允许指定角色访问的方法路由
fn only(roles: &'static [UserRole], route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    route.route_layer(from_fn(require_role(roles)))
}

fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/csrf", get(handlers::auth::csrf))
        .route(
            "/auth/change-password",
            post(handlers::auth::change_password),
        )
        .route("/users/me", patch(handlers::users::update_profile))
        .route("/users/{id}", get(handlers::users::get_user_summary))
}

/// 商品、报价与评价（读公开，写限农户）
fn listing_routes() -> Router<AppState> {
    Router::new()
        .route("/listings", get(handlers::listings::search_listings))
        .route(
            "/listings",
            only(FARMER, post(handlers::listings::create_listing)),
        )
        .route("/listings/{id}", get(handlers::listings::get_listing))
        .route(
            "/listings/{id}",
            only(FARMER, patch(handlers::listings::update_listing)),
        )
        .route(
            "/listings/{id}/status",
            only(FARMER, patch(handlers::listings::set_listing_status)),
        )
        .route(
            "/listings/{id}/tiers",
            only(FARMER, put(handlers::listings::replace_tiers)),
        )
        .route("/listings/{id}/quote", get(handlers::listings::quote_listing))
        .route(
            "/listings/{id}/reviews",
            get(handlers::reviews::listing_reviews),
        )
        .route(
            "/farmers/{id}/rating",
            get(handlers::reviews::farmer_rating),
        )
        .route(
            "/farmer/listings",
            only(FARMER, get(handlers::listings::my_listings)),
        )
        .route(
            "/reviews",
            only(BUYER, post(handlers::reviews::create_review)),
        )
}

/// 购物车与结算，仅买家
fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(handlers::cart::view_cart))
        .route("/cart", delete(handlers::cart::clear_cart))
        .route("/cart/items", post(handlers::cart::add_item))
        .route("/cart/items/{id}", patch(handlers::cart::update_item))
        .route("/cart/items/{id}", delete(handlers::cart::remove_item))
        .route("/checkout", post(handlers::cart::checkout))
        .route_layer(from_fn(require_role(BUYER)))
}

/// 订单状态的角色约束由状态机校验
fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/{id}", get(handlers::orders::get_order))
        .route(
            "/orders/{id}/{action}",
            post(handlers::orders::transition_order),
        )
}

fn payment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/payments/paystack/webhook",
            post(handlers::payments::paystack_webhook),
        )
        .route("/payments/{reference}", get(handlers::payments::get_payment))
        .route(
            "/payments/verify/{reference}",
            only(BUYER, get(handlers::payments::verify_payment)),
        )
        .route(
            "/payments/{reference}/pay",
            only(BUYER, post(handlers::payments::payment_link)),
        )
}

/// 钱包与提现（农户收款、买家退款）
fn wallet_routes() -> Router<AppState> {
    Router::new()
        .route("/wallet", get(handlers::wallet::get_wallet))
        .route(
            "/wallet/transactions",
            get(handlers::wallet::list_transactions),
        )
        .route(
            "/wallet/withdrawals",
            post(handlers::wallet::request_withdrawal),
        )
        .route("/wallet/withdrawals", get(handlers::wallet::my_withdrawals))
        .route(
            "/wallet/withdrawals/{id}",
            get(handlers::wallet::get_withdrawal),
        )
        .route_layer(from_fn(require_role(TRADERS)))
}

fn verification_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/verifications",
            only(FARMER, post(handlers::verification::submit)),
        )
        .route(
            "/verifications",
            only(REVIEWERS, get(handlers::verification::queue)),
        )
        .route(
            "/verifications/me",
            only(FARMER, get(handlers::verification::my_latest)),
        )
        .route(
            "/verifications/{id}",
            only(REVIEWERS, get(handlers::verification::detail)),
        )
        .route(
            "/verifications/{id}/claim",
            only(FIELD_OFFICER, post(handlers::verification::claim)),
        )
        .route(
            "/verifications/{id}/decision",
            only(REVIEWERS, post(handlers::verification::decide)),
        )
}

/// 私信、通知与仪表盘（所有已登录用户）
fn social_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations",
            get(handlers::messages::list_conversations),
        )
        .route(
            "/conversations",
            post(handlers::messages::start_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(handlers::messages::list_messages),
        )
        .route(
            "/conversations/{id}/messages",
            post(handlers::messages::send_message),
        )
        .route(
            "/conversations/{id}/read",
            post(handlers::messages::mark_read),
        )
        .route(
            "/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/notifications/unread-count",
            get(handlers::notifications::unread_count),
        )
        .route(
            "/notifications/read-all",
            post(handlers::notifications::mark_all_read),
        )
        .route(
            "/notifications/{id}/read",
            post(handlers::notifications::mark_read),
        )
        .route("/dashboard", get(handlers::dashboard::dashboard))
        .route(
            "/uploads/signature",
            post(handlers::uploads::upload_signature),
        )
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(handlers::admin::list_users))
        .route("/admin/users", post(handlers::admin::create_staff))
        .route(
            "/admin/users/{id}/status",
            patch(handlers::admin::set_user_status),
        )
        .route(
            "/admin/withdrawals",
            get(handlers::wallet::admin_list_withdrawals),
        )
        .route(
            "/admin/withdrawals/{id}/review",
            post(handlers::wallet::review_withdrawal),
        )
        .route(
            "/admin/withdrawals/{id}/reconcile",
            post(handlers::wallet::reconcile_withdrawal),
        )
        .route("/admin/audit-logs", get(handlers::admin::list_audit_logs))
        .route_layer(from_fn(require_role(ADMIN)))
}

/// 挂载在 `/api` 下的全部业务路由
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(auth_routes())
        .merge(listing_routes())
        .merge(cart_routes())
        .merge(order_routes())
        .merge(payment_routes())
        .merge(wallet_routes())
        .merge(verification_routes())
        .merge(social_routes())
        .merge(admin_routes())
}

/// 完整应用
///
/// 中间件由外到内：request_id、http_tracing、CORS、安全头、认证、限流、CSRF、审计。
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors, state.config.is_production());

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/ws", get(realtime::ws_handler))
        .nest("/api", api_routes())
        .layer(from_fn_with_state(state.clone(), audit_middleware))
        .layer(from_fn(csrf_middleware))
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .layer(from_fn(obs_middleware::http_tracing))
        .layer(from_fn(obs_middleware::request_id))
        .with_state(state)
}

/// 会话走 Cookie，跨域时必须携带凭证，因此通配符只用于本地调试
fn cors_layer(config: &CorsConfig, production: bool) -> CorsLayer {
    if config.allowed_origins.iter().any(|o| o == "*") {
        if production {
            warn!("CORS 允许任意来源在生产环境中不安全，请配置具体域名");
        }
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CSRF_HEADER),
            HeaderName::from_static(obs_middleware::REQUEST_ID_HEADER),
        ])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_construction() {
        let _auth = auth_routes();
        let _listing = listing_routes();
        let _cart = cart_routes();
        let _order = order_routes();
        let _payment = payment_routes();
        let _wallet = wallet_routes();
        let _verification = verification_routes();
        let _social = social_routes();
        let _admin = admin_routes();
        let _api = api_routes();
    }

    #[test]
    fn test_cors_layer_variants() {
        let _wildcard = cors_layer(
            &CorsConfig {
                allowed_origins: vec!["*".to_string()],
            },
            false,
        );
        let _explicit = cors_layer(
            &CorsConfig {
                allowed_origins: vec![
                    "https://agricompass.app".to_string(),
                    "bad\norigin".to_string(),
                ],
            },
            true,
        );
    }
}
