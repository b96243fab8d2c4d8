use crate::config::Config;
use crate::server::http::routes;
use crate::service::{BenchmarkService, ModelService};
use crate::Result;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// 各处理器共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub model_service: Arc<ModelService>,
    pub benchmark_service: Arc<BenchmarkService>,
}

/// 启动 HTTP 服务器
///
/// 绑定监听前先尝试恢复上次运行的模型；收到 SIGINT/SIGTERM 后
/// 依次停止所有模型、清理基准测试任务，再关闭监听器。
pub async fn serve(config: Config) -> Result<()> {
    let model_service = Arc::new(ModelService::new(config.clone()));
    let benchmark_service = Arc::new(BenchmarkService::new(config.clone()));

    tracing::info!(
        "Persistent config location: {}",
        model_service.persistent_path().display()
    );

    // 启动时恢复之前运行的模型
    if let Err(err) = model_service.restore_models().await {
        tracing::warn!("Failed to restore models: {}", err);
    }

    let state = AppState {
        model_service: Arc::clone(&model_service),
        benchmark_service: Arc::clone(&benchmark_service),
    };

    let app = routes::create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        crate::api::error::ApiError::Internal(format!("Failed to bind to {}: {}", addr, e))
    })?;

    tracing::info!("Server listening on http://{}", addr);
    log_routes();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown(model_service, benchmark_service))
        .await
        .map_err(|e| crate::api::error::ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Server shutdown completed");
    Ok(())
}

fn log_routes() {
    tracing::info!("Registered API endpoints:");
    tracing::info!("POST   /api/v1/model/switch");
    tracing::info!("POST   /api/v1/model/stop");
    tracing::info!("GET    /api/v1/model/status");
    tracing::info!("POST   /api/v1/benchmark");
    tracing::info!("GET    /api/v1/benchmark/status");
    tracing::info!("GET    /health");
}

/// 等待关闭信号并执行清理
async fn shutdown(model_service: Arc<ModelService>, benchmark_service: Arc<BenchmarkService>) {
    wait_for_signal().await;
    tracing::info!("Initiating graceful shutdown...");

    let (stopped, last_error) = model_service.stop_all().await;
    tracing::info!("Stopped {} models", stopped.len());
    if let Some(err) = last_error {
        tracing::error!("Error stopping model service: {}", err);
    }

    benchmark_service.cleanup().await;
}

/// 等待 SIGINT / SIGTERM
async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        },
    }
}
