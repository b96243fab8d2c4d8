//! llamaherd - llama.cpp 推理服务监管器
//!
//! llamaherd 在单台 GPU 工作站上托管、切换和监控多个 llama-server
//! 子进程，并按需运行 llama-bench 性能测试。客户端通过一组小型
//! JSON/HTTP 接口驱动监管器；推理流量直接走子进程端口，不经过本服务。

#![warn(clippy::all)]

pub mod api;
pub mod cli;
pub mod config;
pub mod models;
pub mod server;
pub mod service;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use crate::api::error::{LlamaHerdError, Result};
pub use crate::config::Config;

/// llamaherd 版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
