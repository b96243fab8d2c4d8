use axum::Router;
use crate::server::http::handlers;
use crate::server::http::server::AppState;

/// 定义路由
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/model/switch",
            axum::routing::post(handlers::models::switch_model),
        )
        .route(
            "/api/v1/model/stop",
            axum::routing::post(handlers::models::stop_model),
        )
        .route(
            "/api/v1/model/status",
            axum::routing::get(handlers::models::model_status),
        )
        .route(
            "/api/v1/benchmark",
            axum::routing::post(handlers::benchmark::start_benchmark),
        )
        .route(
            "/api/v1/benchmark/status",
            axum::routing::get(handlers::benchmark::benchmark_status),
        )
        .route("/health", axum::routing::get(handlers::health::health))
        .with_state(state)
}
