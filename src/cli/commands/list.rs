use crate::config::Config;
use crate::service::ModelService;
use crate::Result;

/// 列出模型目录中的 GGUF 文件
pub async fn list(config: Config) -> Result<()> {
    let service = ModelService::new(config);
    let models = service.list_models().await?;

    if models.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    for model in models {
        println!("{:<50} {:>10} MB", model.name, model.size / (1024 * 1024));
    }
    Ok(())
}
