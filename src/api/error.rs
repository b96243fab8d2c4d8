use thiserror::Error;

/// llamaherd 错误类型
#[derive(Debug, Error)]
pub enum LlamaHerdError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("VRAM error: {0}")]
    Vram(#[from] VramError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Benchmark error: {0}")]
    Benchmark(#[from] BenchmarkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

/// 模型生命周期错误
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model '{0}' not found")]
    NotFound(String),

    #[error("model with name '{0}' is already running")]
    AlreadyRunning(String),

    #[error("model name is required")]
    NameRequired,

    #[error("failed to get model file info: {0}")]
    FileInfo(String),
}

/// 配置校验错误
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

/// 显存准入错误
#[derive(Debug, Error)]
pub enum VramError {
    #[error("insufficient VRAM (required: {required}MB based on model size {model_size}MB, available: {available}MB). Use force_vram=true to force start")]
    Insufficient {
        required: u64,
        model_size: u64,
        available: u64,
    },

    #[error("could only free {freed}MB of {required}MB required VRAM after stopping models: {stopped}")]
    EvictionExhausted {
        freed: i64,
        required: u64,
        stopped: String,
    },

    #[error("no running models to free VRAM from")]
    NoRunningModels,

    #[error("failed to query GPU memory: {0}")]
    ProbeFailed(String),
}

/// 子进程错误
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start process: {0}")]
    SpawnFailed(String),

    #[error("failed to kill process {pid}: {reason}")]
    KillFailed { pid: u32, reason: String },

    #[error("process {0} not found")]
    NotFound(u32),
}

/// 持久化存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read persistent config: {0}")]
    ReadFailed(String),

    #[error("failed to write persistent config: {0}")]
    WriteFailed(String),

    #[error("failed to parse persistent config: {0}")]
    ParseFailed(String),

    #[error("unsupported config version: {0}")]
    VersionMismatch(String),
}

/// 基准测试错误
#[derive(Debug, Error)]
pub enum BenchmarkError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task is not running: {task_id} (current status: {status})")]
    TaskNotRunning { task_id: String, status: String },

    #[error("failed to parse benchmark output: {0}")]
    ParseFailed(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    LoadFailed(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// API 错误
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} parameter is required")]
    MissingParameter(&'static str),

    #[error("internal server error: {0}")]
    Internal(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, LlamaHerdError>;

// ========== 错误转换 ==========

impl From<std::io::Error> for LlamaHerdError {
    fn from(err: std::io::Error) -> Self {
        LlamaHerdError::Storage(StorageError::ReadFailed(err.to_string()))
    }
}

impl From<serde_json::Error> for LlamaHerdError {
    fn from(err: serde_json::Error) -> Self {
        LlamaHerdError::Storage(StorageError::ParseFailed(err.to_string()))
    }
}

// ========== HTTP 错误响应 ==========

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

impl LlamaHerdError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            LlamaHerdError::Model(e) => match e {
                ModelError::NotFound(_) => StatusCode::NOT_FOUND,
                ModelError::NameRequired => StatusCode::BAD_REQUEST,
                ModelError::AlreadyRunning(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ModelError::FileInfo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            LlamaHerdError::Validation(_) => StatusCode::BAD_REQUEST,
            LlamaHerdError::Vram(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LlamaHerdError::Process(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LlamaHerdError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LlamaHerdError::Benchmark(e) => match e {
                BenchmarkError::TaskNotFound(_) => StatusCode::NOT_FOUND,
                BenchmarkError::TaskNotRunning { .. } => StatusCode::BAD_REQUEST,
                BenchmarkError::ParseFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            LlamaHerdError::Config(e) => match e {
                ConfigError::LoadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ConfigError::Invalid(_) => StatusCode::BAD_REQUEST,
            },
            LlamaHerdError::Api(e) => match e {
                ApiError::MissingParameter(_) => StatusCode::BAD_REQUEST,
                ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for LlamaHerdError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        // 所有错误响应共用统一的 ApiResponse 信封
        let body = Json(crate::api::response::ApiResponse::<()>::error(message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code() {
        let err = LlamaHerdError::Model(ModelError::NotFound("test".to_string()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = LlamaHerdError::Validation(ValidationError("invalid port".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = LlamaHerdError::Vram(VramError::Insufficient {
            required: 8000,
            model_size: 9000,
            available: 3000,
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_insufficient_vram_message() {
        let err = VramError::Insufficient {
            required: 8000,
            model_size: 9000,
            available: 3000,
        };
        let msg = err.to_string();
        assert!(msg.contains("required: 8000MB"));
        assert!(msg.contains("available: 3000MB"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let herd_err: LlamaHerdError = io_err.into();
        assert!(matches!(herd_err, LlamaHerdError::Storage(_)));
    }

    #[test]
    fn test_error_response() {
        let err = LlamaHerdError::Api(ApiError::MissingParameter("model_name"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
