use crate::api::error::{ApiError, LlamaHerdError};
use crate::api::response::ApiResponse;
use crate::models::types::{BenchmarkConfig, BenchmarkStatus};
use crate::models::validate::validate_bench_config;
use crate::server::http::server::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

/// 任务查询参数
#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub task_id: Option<String>,
}

/// 启动基准测试处理器
pub async fn start_benchmark(
    State(state): State<AppState>,
    Json(cfg): Json<BenchmarkConfig>,
) -> Result<Json<ApiResponse<serde_json::Value>>, LlamaHerdError> {
    validate_bench_config(&cfg)?;

    let task_id = state.benchmark_service.start_benchmark(&cfg).await?;

    Ok(Json(ApiResponse::ok(
        "Benchmark started successfully",
        serde_json::json!({ "task_id": task_id }),
    )))
}

/// 获取基准测试状态处理器
pub async fn benchmark_status(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<ApiResponse<BenchmarkStatus>>, LlamaHerdError> {
    let task_id = query
        .task_id
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::MissingParameter("task_id"))?;

    let status = state.benchmark_service.get_status(&task_id).await?;

    Ok(Json(ApiResponse::ok(
        "Benchmark status retrieved successfully",
        status,
    )))
}
