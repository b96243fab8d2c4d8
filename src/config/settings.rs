use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::defaults;

/// 主配置结构
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// llama.cpp 二进制文件路径
    pub llama_path: LlamaPathConfig,
    /// 模型文件目录
    pub models_dir: PathBuf,
    /// API 服务器配置
    pub server: ServerConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 启动时是否恢复上次运行的模型
    #[serde(default = "default_auto_restore")]
    pub auto_restore: bool,
}

/// llama.cpp 二进制路径
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlamaPathConfig {
    /// llama-server 路径
    pub server: PathBuf,
    /// llama-bench 路径
    pub bench: PathBuf,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: Vec<String>,
}

fn default_auto_restore() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llama_path: LlamaPathConfig {
                server: PathBuf::from(defaults::DEFAULT_SERVER_BIN),
                bench: PathBuf::from(defaults::DEFAULT_BENCH_BIN),
            },
            models_dir: PathBuf::from(defaults::DEFAULT_MODELS_DIR),
            server: ServerConfig {
                host: defaults::DEFAULT_HOST.to_string(),
                port: defaults::DEFAULT_PORT,
            },
            logging: LoggingConfig::default(),
            auto_restore: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::DEFAULT_LOG_LEVEL.to_string(),
            format: defaults::DEFAULT_LOG_FORMAT.to_string(),
            output: vec!["stdout".to_string()],
        }
    }
}

impl Config {
    /// 从文件加载配置（环境变量 LLAMAHERD_* 可覆盖文件值）
    pub fn from_file(path: &str) -> crate::Result<Self> {
        crate::config::loader::load_from_file(path)
    }

    /// 持久化配置目录：`<parent(models_dir)>/config`
    pub fn persistent_dir(&self) -> PathBuf {
        self.models_dir
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config")
    }
}
