pub mod http;

use crate::Result;
use crate::config::Config;

/// 启动监管器服务
pub async fn serve(config: Config) -> Result<()> {
    http::server::serve(config).await
}
