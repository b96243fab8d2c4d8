//! 持久化期望状态存储
//!
//! 单个带版本号的 JSON 文档，记录每个模型最后一次的配置与状态，
//! 监管器重启后据此恢复。写入走"改名为备份、再写新文件"的两步，
//! 崩溃后至少留下一份可读副本。

use crate::api::error::StorageError;
use crate::models::types::{ModelConfig, ModelStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// 文档版本号，加载时要求精确匹配
pub const STORE_VERSION: &str = "1.0.0";

/// 持久化文件名
pub const STORE_FILE_NAME: &str = "model_persistent.json";

/// 备份文件后缀
pub const BACKUP_SUFFIX: &str = ".backup";

/// 持久化文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentDocument {
    /// 配置版本号
    pub version: String,
    /// 最后更新时间（RFC3339）
    pub update_time: String,
    /// 模型配置映射
    pub models: HashMap<String, PersistedModel>,
}

/// 一个模型的持久化条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    /// 完整的模型配置
    pub model_config: ModelConfig,
    /// 最后运行状态
    pub last_status: ModelStatus,
}

impl PersistentDocument {
    /// 空文档（当前版本）
    pub fn empty() -> Self {
        Self {
            version: STORE_VERSION.to_string(),
            update_time: chrono::Utc::now().to_rfc3339(),
            models: HashMap::new(),
        }
    }
}

/// 持久化管理器
///
/// 所有写操作串行通过一把写锁，读操作可以并发。
pub struct PersistentStore {
    config_dir: PathBuf,
    lock: RwLock<()>,
}

impl PersistentStore {
    /// 创建持久化管理器，文档位于 `config_dir/model_persistent.json`
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    /// 持久化文档路径
    pub fn document_path(&self) -> PathBuf {
        self.config_dir.join(STORE_FILE_NAME)
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = STORE_FILE_NAME.to_string();
        name.push_str(BACKUP_SUFFIX);
        self.config_dir.join(name)
    }

    /// 加载持久化文档
    ///
    /// 文件不存在返回当前版本的空文档；主文件读取或解析失败时回退到
    /// 备份；版本号不匹配直接报错，存储层不做静默迁移。
    pub async fn load(&self) -> Result<PersistentDocument, StorageError> {
        let _guard = self.lock.read().await;
        self.load_locked().await
    }

    async fn load_locked(&self) -> Result<PersistentDocument, StorageError> {
        let path = self.document_path();
        if !path.exists() {
            return Ok(PersistentDocument::empty());
        }

        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(err) => {
                // 尝试从备份恢复
                match tokio::fs::read_to_string(self.backup_path()).await {
                    Ok(backup) => backup,
                    Err(_) => {
                        return Err(StorageError::ReadFailed(format!(
                            "failed to read config file and backup: {}",
                            err
                        )))
                    }
                }
            }
        };

        let doc: PersistentDocument = match serde_json::from_str(&data) {
            Ok(doc) => doc,
            Err(err) => {
                // 主文件损坏时再给备份一次机会
                let backup = tokio::fs::read_to_string(self.backup_path())
                    .await
                    .map_err(|_| StorageError::ParseFailed(err.to_string()))?;
                serde_json::from_str(&backup)
                    .map_err(|e| StorageError::ParseFailed(e.to_string()))?
            }
        };

        if doc.version != STORE_VERSION {
            return Err(StorageError::VersionMismatch(doc.version));
        }

        Ok(doc)
    }

    /// 保存持久化文档
    ///
    /// 先把旧文档改名为备份（覆盖上一个备份），再写入新文档，
    /// 两个文件不会同时被截断。
    pub async fn save(&self, doc: &mut PersistentDocument) -> Result<(), StorageError> {
        let _guard = self.lock.write().await;
        self.save_locked(doc).await
    }

    async fn save_locked(&self, doc: &mut PersistentDocument) -> Result<(), StorageError> {
        doc.update_time = chrono::Utc::now().to_rfc3339();

        let data = serde_json::to_string_pretty(doc)
            .map_err(|e| StorageError::WriteFailed(format!("failed to serialize config: {}", e)))?;

        tokio::fs::create_dir_all(&self.config_dir)
            .await
            .map_err(|e| {
                StorageError::WriteFailed(format!("failed to create config directory: {}", e))
            })?;

        // 目录 0755，不受进程 umask 影响
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.config_dir, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| {
                    StorageError::WriteFailed(format!(
                        "failed to set config directory permissions: {}",
                        e
                    ))
                })?;
        }

        let path = self.document_path();
        if path.exists() {
            tokio::fs::rename(&path, self.backup_path())
                .await
                .map_err(|e| {
                    StorageError::WriteFailed(format!("failed to backup old config: {}", e))
                })?;
        }

        tokio::fs::write(&path, data).await.map_err(|e| {
            StorageError::WriteFailed(format!("failed to write config file: {}", e))
        })?;

        // 文件 0644
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
                .await
                .map_err(|e| {
                    StorageError::WriteFailed(format!(
                        "failed to set config file permissions: {}",
                        e
                    ))
                })?;
        }

        Ok(())
    }

    /// 更新一个模型的配置与状态
    pub async fn update_model(
        &self,
        model_name: &str,
        config: &ModelConfig,
        status: &ModelStatus,
    ) -> Result<(), StorageError> {
        let _guard = self.lock.write().await;

        let mut doc = self.load_locked().await?;
        doc.models.insert(
            model_name.to_string(),
            PersistedModel {
                model_config: config.clone(),
                last_status: status.clone(),
            },
        );
        self.save_locked(&mut doc).await
    }

    /// 移除一个模型的持久化条目
    pub async fn remove_model(&self, model_name: &str) -> Result<(), StorageError> {
        let _guard = self.lock.write().await;

        let mut doc = self.load_locked().await?;
        doc.models.remove(model_name);
        self.save_locked(&mut doc).await
    }

    /// 获取所有模型条目
    pub async fn get_all(&self) -> Result<HashMap<String, PersistedModel>, StorageError> {
        Ok(self.load().await?.models)
    }
}
