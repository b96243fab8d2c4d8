use crate::api::error::{ApiError, LlamaHerdError, ModelError};
use crate::api::response::ApiResponse;
use crate::models::types::{ModelConfig, ModelStatus};
use crate::models::validate::validate_model_config;
use crate::server::http::server::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::time::Duration;

/// 按名称过滤的查询参数
#[derive(Debug, Deserialize)]
pub struct ModelNameQuery {
    pub model_name: Option<String>,
}

/// 切换模型处理器
pub async fn switch_model(
    State(state): State<AppState>,
    Json(cfg): Json<ModelConfig>,
) -> Result<Json<ApiResponse<ModelStatus>>, LlamaHerdError> {
    if cfg.model_name.is_empty() {
        return Err(ModelError::NameRequired.into());
    }
    validate_model_config(&cfg)?;

    let current = state.model_service.get_status(None).await;
    tracing::info!("Current running models ({}):", current.len());
    for (i, m) in current.iter().enumerate() {
        tracing::info!(
            "  [{}] {} (PID: {}, VRAM: {}MB)",
            i + 1,
            m.model_name,
            m.process_id,
            m.vram_usage
        );
    }
    tracing::info!("Starting model switch: {} ({})", cfg.model_name, cfg.model_path);

    let status = state.model_service.start_model(&cfg).await.map_err(|err| {
        tracing::error!("Failed to start model {}: {}", cfg.model_name, err);
        err
    })?;

    tracing::info!(
        "Model {} started successfully (PID: {})",
        cfg.model_name,
        status.process_id
    );

    Ok(Json(ApiResponse::ok(
        format!("Model '{}' switched successfully", cfg.model_name),
        status,
    )))
}

/// 停止模型处理器
pub async fn stop_model(
    State(state): State<AppState>,
    Query(query): Query<ModelNameQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, LlamaHerdError> {
    let model_name = query
        .model_name
        .filter(|n| !n.is_empty())
        .ok_or(ApiError::MissingParameter("model_name"))?;

    // 未知名称在停止之前就报 404
    let known = state.model_service.get_status(Some(model_name.as_str())).await;
    if known.is_empty() {
        return Err(ModelError::NotFound(model_name).into());
    }

    tracing::info!("Stopping model: {}", model_name);
    let status = state.model_service.stop_model(&model_name).await?;

    // 给进程一点时间完全退出，再核验一次
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after = state.model_service.get_status(Some(model_name.as_str())).await;
    if after.first().map(|m| m.running).unwrap_or(false) {
        return Err(ApiError::Internal(format!(
            "Model '{}' is still running after stop request",
            model_name
        ))
        .into());
    }

    tracing::info!("Successfully stopped model: {}", model_name);

    let stop_time = status.stop_time.clone();
    let vram_freed = status.vram_usage;
    Ok(Json(ApiResponse::ok(
        format!("Model '{}' stopped successfully", model_name),
        serde_json::json!({
            "stopped_model": status,
            "stop_time": stop_time,
            "vram_freed": vram_freed,
        }),
    )))
}

/// 获取模型状态处理器
pub async fn model_status(
    State(state): State<AppState>,
    Query(query): Query<ModelNameQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, LlamaHerdError> {
    let name = query.model_name.filter(|n| !n.is_empty());
    let statuses = state.model_service.get_status(name.as_deref()).await;

    if statuses.is_empty() {
        if let Some(name) = name {
            return Err(ModelError::NotFound(name).into());
        }
        return Ok(Json(ApiResponse::ok_empty("No models running")));
    }

    // 指定名称时返回单个对象，否则返回列表
    let data = if name.is_some() {
        serde_json::to_value(&statuses[0])?
    } else {
        serde_json::to_value(&statuses)?
    };

    Ok(Json(ApiResponse::ok(
        "Model status retrieved successfully",
        data,
    )))
}
