//! 日志系统
//!
//! 提供基于 tracing 的日志系统，支持：
//! - 可配置的日志级别
//! - 多种日志格式（JSON、Pretty、Compact）
//! - 多种输出方式（stdout、stderr、文件）

use crate::config::settings::LoggingConfig;
use crate::Result;
use std::path::PathBuf;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt, EnvFilter, Layer,
};

/// 初始化日志系统
///
/// 优先使用环境变量 RUST_LOG，没有时退回配置文件中的级别。
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| {
            // 这里不能用 tracing::warn!，日志系统还没初始化
            eprintln!(
                "Warning: Invalid log level '{}', using 'info' as default",
                config.level
            );
            EnvFilter::new("info")
        })
    });

    // 只使用第一个输出目标
    let primary_output = config
        .output
        .first()
        .map(|s| s.as_str())
        .unwrap_or("stdout");
    if config.output.len() > 1 {
        eprintln!(
            "Warning: Multiple log outputs specified, but only the first one ({}) will be used.",
            primary_output
        );
    }

    match primary_output {
        "stdout" => init_subscriber(&config.format, filter, std::io::stdout)?,
        "stderr" => init_subscriber(&config.format, filter, std::io::stderr)?,
        file_path => {
            let path = PathBuf::from(file_path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    crate::api::error::ConfigError::Invalid(format!(
                        "Failed to create log directory: {}",
                        e
                    ))
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    crate::api::error::ConfigError::Invalid(format!(
                        "Failed to open log file {}: {}",
                        file_path, e
                    ))
                })?;
            init_subscriber(&config.format, filter, file)?;
        }
    }

    tracing::info!(
        "Logging initialized: level={}, format={}, output={}",
        config.level,
        config.format,
        primary_output
    );

    Ok(())
}

/// 创建并初始化 subscriber（内部函数）
fn init_subscriber<W>(format: &str, filter: EnvFilter, writer: W) -> Result<()>
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let registry = Registry::default().with(filter);

    let layer = match format.to_lowercase().as_str() {
        "json" => fmt::layer()
            .with_writer(writer)
            .json()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        "pretty" | "human" => fmt::layer()
            .with_writer(writer)
            .pretty()
            .with_target(true)
            .with_level(true)
            .boxed(),
        _ => fmt::layer()
            .with_writer(writer)
            .compact()
            .with_target(true)
            .with_level(true)
            .boxed(),
    };

    registry.with(layer).try_init().map_err(|e| {
        crate::api::error::ConfigError::Invalid(format!("Failed to initialize logging: {}", e))
    })?;

    Ok(())
}

/// 使用默认配置初始化日志系统
pub fn init_default_logging() -> Result<()> {
    init_logging(&LoggingConfig::default())
}

/// 从环境变量初始化日志系统
///
/// 支持以下环境变量：
/// - `RUST_LOG`: 日志级别
/// - `RUST_LOG_FORMAT`: 日志格式，可选值：`json`, `pretty`, `compact`
/// - `RUST_LOG_OUTPUT`: 输出目标，如 `stdout` 或日志文件路径
pub fn init_logging_from_env() -> Result<()> {
    let format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let output = std::env::var("RUST_LOG_OUTPUT")
        .map(|s| {
            s.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| vec!["stdout".to_string()]);

    init_logging(&LoggingConfig {
        level: "info".to_string(),
        format,
        output,
    })
}
