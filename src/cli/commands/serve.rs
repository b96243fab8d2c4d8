use crate::config::Config;
use crate::Result;

/// 启动服务器
pub async fn serve(config: Config) -> Result<()> {
    tracing::info!(
        "Starting llamaherd server on {}:{}",
        config.server.host,
        config.server.port
    );
    crate::server::serve(config).await
}
