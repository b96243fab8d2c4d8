use clap::Parser;
use llamaherd::cli::Cli;
use llamaherd::config::Config;
use llamaherd::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // 先解析命令行，才能拿到配置文件里的日志设置
    let cli = Cli::parse();

    let config = if let Some(path) = &cli.config {
        Some(Config::from_file(path)?)
    } else {
        None
    };

    // 初始化日志系统
    if let Some(ref cfg) = config {
        llamaherd::utils::logging::init_logging(&cfg.logging)?;
    } else {
        llamaherd::utils::logging::init_logging_from_env()
            .or_else(|_| llamaherd::utils::logging::init_default_logging())?;
    }

    // 未指定命令时默认启动服务器
    match cli.command {
        None => {
            let config = config.unwrap_or_default();
            llamaherd::cli::commands::serve(config).await?;
        }
        Some(llamaherd::cli::Command::Serve { config: serve_config }) => {
            let config = if let Some(path) = serve_config {
                Config::from_file(&path)?
            } else {
                config.unwrap_or_default()
            };
            llamaherd::cli::commands::serve(config).await?;
        }
        Some(llamaherd::cli::Command::List) => {
            let config = config.unwrap_or_default();
            llamaherd::cli::commands::list(config).await?;
        }
    }

    Ok(())
}
