//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::{handlers, middleware::AppState};

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;

    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 服务器档案与远程命令
    let server_routes = Router::new()
        .route(
            "/api/v1/servers",
            get(handlers::server::list_servers).post(handlers::server::register_server),
        )
        .route(
            "/api/v1/servers/test-connection",
            post(handlers::server::test_connection),
        )
        .route("/api/v1/servers/{id}/probe", post(handlers::server::probe_server))
        .route(
            "/api/v1/servers/{id}/commands",
            post(handlers::server::execute_command),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes));

    Router::new()
        .merge(public_routes)
        .merge(server_routes)
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
