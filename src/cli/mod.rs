pub mod commands;

use clap::{Parser, Subcommand};

/// llamaherd CLI
#[derive(Parser)]
#[command(name = "llamaherd")]
#[command(about = "Local inference-server supervisor for llama.cpp")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI 命令
#[derive(Subcommand)]
pub enum Command {
    /// 启动监管器服务
    Serve {
        /// 配置文件路径
        #[arg(short, long)]
        config: Option<String>,
    },
    /// 列出模型目录中的 GGUF 文件
    List,
}
