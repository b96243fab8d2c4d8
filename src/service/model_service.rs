//! 模型服务
//!
//! 编排 Start / Stop / StopAll / Status / Restore：组合配置校验、
//! 显存准入、参数构建、子进程管理和持久化存储。一次 Start 的
//! 构参/spawn/登记/持久化序列在服务写锁内完成；状态读取同样
//! 取锁，因为读取会触发注册表校正。

use crate::api::error::{LlamaHerdError, ModelError, StorageError, VramError};
use crate::config::Config;
use crate::models::args::build_server_args;
use crate::models::types::{ModelConfig, ModelFile, ModelStatus};
use crate::models::validate::validate_model_config;
use crate::service::gpu::{NvidiaSmi, VramProbe};
use crate::service::process::{self, is_pid_alive, ProcessRunner, STOP_GRACE};
use crate::storage::persistent::PersistentStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// 显存估算：基础开销（MB）
const BASE_VRAM_MB: u64 = 500;

/// 显存估算：每个 GPU 层的开销（MB）
const VRAM_PER_LAYER_MB: u64 = 200;

/// 驱逐一个模型后等待驱动释放显存的时间
const VRAM_SETTLE: Duration = Duration::from_secs(1);

/// 模型服务管理器
pub struct ModelService {
    config: Config,
    runner: Arc<ProcessRunner>,
    store: Arc<PersistentStore>,
    probe: Arc<dyn VramProbe>,
    lock: Mutex<()>,
    auto_restore: bool,
}

impl ModelService {
    /// 创建新的模型服务管理器
    pub fn new(config: Config) -> Self {
        Self::with_probe(config, Arc::new(NvidiaSmi))
    }

    /// 用指定的显存探测实现创建（测试注入用）
    pub fn with_probe(config: Config, probe: Arc<dyn VramProbe>) -> Self {
        let store = Arc::new(PersistentStore::new(config.persistent_dir()));
        let auto_restore = config.auto_restore;
        Self {
            config,
            runner: Arc::new(ProcessRunner::new()),
            store,
            probe,
            lock: Mutex::new(()),
            auto_restore,
        }
    }

    /// 持久化文档路径（启动日志用）
    pub fn persistent_path(&self) -> PathBuf {
        self.store.document_path()
    }

    /// 解析模型路径（相对路径按模型目录解析）
    fn resolve_model_path(&self, path: &str) -> PathBuf {
        let p = std::path::Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.config.models_dir.join(p)
        }
    }

    /// 估算模型所需显存（MB），上限为模型文件大小
    fn estimate_vram_mb(cfg: &ModelConfig, model_size_mb: u64) -> u64 {
        let estimate = BASE_VRAM_MB + VRAM_PER_LAYER_MB * cfg.config.n_gpu_layers.max(0) as u64;
        estimate.min(model_size_mb)
    }

    /// 启动模型服务并返回状态
    pub async fn start_model(&self, cfg: &ModelConfig) -> Result<ModelStatus, LlamaHerdError> {
        if cfg.model_name.is_empty() {
            return Err(ModelError::NameRequired.into());
        }

        // 同名检查：运行中直接拒绝，已停止的旧条目先清除
        if let Some(existing) = self.runner.find(&cfg.model_name) {
            if is_pid_alive(existing.process_id) {
                return Err(ModelError::AlreadyRunning(cfg.model_name.clone()).into());
            }
            self.runner.untrack(existing.process_id);
        }

        // 解析模型路径并读取文件大小
        let model_path = self.resolve_model_path(&cfg.model_path);
        let metadata = tokio::fs::metadata(&model_path)
            .await
            .map_err(|e| ModelError::FileInfo(e.to_string()))?;
        let model_size_mb = metadata.len() / (1024 * 1024);

        let required_vram = Self::estimate_vram_mb(cfg, model_size_mb);
        tracing::info!(
            "Model VRAM estimation - FileSize: {}MB, EstimatedVRAM: {}MB",
            model_size_mb,
            required_vram
        );

        // 显存准入（只在请求 GPU 时）
        if cfg.force_vram || cfg.config.n_gpu_layers > 0 {
            let available = self.probe.total_free_vram().await?;
            tracing::info!("Available VRAM: {}MB", available);

            if available < required_vram {
                if cfg.force_vram {
                    tracing::info!(
                        "Insufficient VRAM (required: {}MB based on model size {}MB, available: {}MB), freeing VRAM",
                        required_vram,
                        model_size_mb,
                        available
                    );
                    self.evict_vram(required_vram - available).await?;
                } else {
                    return Err(VramError::Insufficient {
                        required: required_vram,
                        model_size: model_size_mb,
                        available,
                    }
                    .into());
                }
            }
        }

        let _guard = self.lock.lock().await;

        let model_path_str = model_path.to_string_lossy().to_string();
        let args = build_server_args(cfg, &model_path_str);
        tracing::info!(
            "Starting model service with command:\n{} {}",
            self.config.llama_path.server.display(),
            args.join(" ")
        );

        let pid = self
            .runner
            .spawn_supervised(&self.config.llama_path.server, &args)?;

        let status = ModelStatus {
            running: true,
            model_name: cfg.model_name.clone(),
            model_path: model_path_str,
            port: cfg.config.port,
            start_time: chrono::Utc::now().to_rfc3339(),
            stop_time: String::new(),
            process_id: pid,
            vram_usage: required_vram,
        };
        self.runner.track(pid, status.clone());

        if let Err(err) = self.store.update_model(&cfg.model_name, cfg, &status).await {
            tracing::warn!("Failed to save model config: {}", err);
        }

        // Windows 上进程可能悄悄启动失败，延迟核验一次
        #[cfg(windows)]
        {
            let runner = Arc::clone(&self.runner);
            let store = Arc::clone(&self.store);
            let model_name = cfg.model_name.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                if !is_pid_alive(pid) {
                    tracing::warn!(
                        "Process {} (model: {}) failed to start",
                        pid,
                        model_name
                    );
                    runner.untrack(pid);
                    if let Err(err) = store.remove_model(&model_name).await {
                        tracing::warn!("Failed to remove model config: {}", err);
                    }
                }
            });
        }

        Ok(status)
    }

    /// 释放足够显存（优先驱逐大显存模型）
    ///
    /// 每停一个受害者，等待驱动释放显存后重新探测；一旦满足需求
    /// 立即停止。名单用尽仍不满足时报错，列出已停模型和缺口。
    async fn evict_vram(&self, needed_mb: u64) -> Result<(), LlamaHerdError> {
        let victims = self.runner.models_by_vram_desc();
        if victims.is_empty() {
            return Err(VramError::NoRunningModels.into());
        }

        let initial_free = self.probe.total_free_vram().await?;
        let mut current_free = initial_free;
        let mut stopped = Vec::new();

        for victim in victims {
            let before_stop = current_free;

            if let Err(err) = process::terminate_pid(victim.process_id, STOP_GRACE).await {
                tracing::warn!(
                    "Failed to stop model {} (PID: {}): {}",
                    victim.model_name,
                    victim.process_id,
                    err
                );
                continue;
            }

            // 等待驱动回收显存
            tokio::time::sleep(VRAM_SETTLE).await;

            let after_stop = match self.probe.total_free_vram().await {
                Ok(free) => free,
                Err(err) => {
                    tracing::warn!(
                        "Failed to get VRAM after stopping model {}: {}",
                        victim.model_name,
                        err
                    );
                    continue;
                }
            };

            current_free = after_stop;
            self.runner.untrack(victim.process_id);
            self.mark_stopped(&victim.model_name).await;
            stopped.push(victim.model_name.clone());

            tracing::info!(
                "Stopped model {}, freed {}MB VRAM",
                victim.model_name,
                after_stop as i64 - before_stop as i64
            );

            let total_freed = current_free as i64 - initial_free as i64;
            if total_freed >= needed_mb as i64 {
                tracing::info!(
                    "Successfully freed {}MB VRAM by stopping models: {}",
                    total_freed,
                    stopped.join(", ")
                );
                return Ok(());
            }
        }

        Err(VramError::EvictionExhausted {
            freed: current_free as i64 - initial_free as i64,
            required: needed_mb,
            stopped: stopped.join(", "),
        }
        .into())
    }

    /// 更新持久化条目为已停止
    async fn mark_stopped(&self, model_name: &str) {
        let configs = match self.store.get_all().await {
            Ok(configs) => configs,
            Err(err) => {
                tracing::warn!("Failed to load model configs: {}", err);
                return;
            }
        };

        if let Some(item) = configs.get(model_name) {
            let mut status = item.last_status.clone();
            status.running = false;
            status.stop_time = chrono::Utc::now().to_rfc3339();
            if let Err(err) = self
                .store
                .update_model(model_name, &item.model_config, &status)
                .await
            {
                tracing::warn!("Failed to update model config: {}", err);
            }
        }
    }

    /// 停止指定模型，返回最后状态
    pub async fn stop_model(&self, model_name: &str) -> Result<ModelStatus, LlamaHerdError> {
        if model_name.is_empty() {
            return Err(ModelError::NameRequired.into());
        }

        let _guard = self.lock.lock().await;
        self.stop_model_locked(model_name).await
    }

    async fn stop_model_locked(&self, model_name: &str) -> Result<ModelStatus, LlamaHerdError> {
        let mut status = self.runner.stop_model(model_name).await.map_err(|err| {
            use crate::api::error::ProcessError;
            match err {
                // 名称不在注册表里
                ProcessError::NotFound(_) => {
                    LlamaHerdError::from(ModelError::NotFound(model_name.to_string()))
                }
                // 终止失败按进程错误上报
                other => LlamaHerdError::from(other),
            }
        })?;

        status.running = false;
        status.stop_time = chrono::Utc::now().to_rfc3339();

        // 更新持久化配置中的状态
        match self.store.get_all().await {
            Ok(configs) => {
                if let Some(item) = configs.get(model_name) {
                    if let Err(err) = self
                        .store
                        .update_model(model_name, &item.model_config, &status)
                        .await
                    {
                        tracing::warn!("Failed to update model config: {}", err);
                    }
                }
            }
            Err(err) => tracing::warn!("Failed to load model configs: {}", err),
        }

        Ok(status)
    }

    /// 停止所有运行中的模型
    ///
    /// 返回成功停止的状态列表和最后一个错误（如果有）。
    pub async fn stop_all(&self) -> (Vec<ModelStatus>, Option<LlamaHerdError>) {
        let _guard = self.lock.lock().await;

        let running = self.runner.running_models();
        let mut stopped = Vec::with_capacity(running.len());
        let mut last_error = None;

        for model in running {
            match self.stop_model_locked(&model.model_name).await {
                Ok(status) => stopped.push(status),
                Err(err) => {
                    tracing::error!("Failed to stop model '{}': {}", model.model_name, err);
                    last_error = Some(err);
                }
            }
        }

        (stopped, last_error)
    }

    /// 获取模型状态
    ///
    /// 运行中的模型取自校正后的注册表快照；只存在于持久化文档的
    /// 模型以 running=false 的形态并入，保留最后的起停时间。
    pub async fn get_status(&self, name: Option<&str>) -> Vec<ModelStatus> {
        let _guard = self.lock.lock().await;
        self.get_status_locked(name).await
    }

    async fn get_status_locked(&self, name: Option<&str>) -> Vec<ModelStatus> {
        let running = self.runner.running_models();

        let persistent = match self.store.get_all().await {
            Ok(configs) => configs,
            Err(err) => {
                tracing::warn!("Failed to load persistent configs: {}", err);
                Default::default()
            }
        };

        let mut all = running.clone();
        for (model_name, item) in persistent {
            if running.iter().any(|m| m.model_name == model_name) {
                continue;
            }
            all.push(ModelStatus {
                running: false,
                model_name: model_name.clone(),
                model_path: item.model_config.model_path.clone(),
                port: item.model_config.config.port,
                start_time: item.last_status.start_time.clone(),
                stop_time: item.last_status.stop_time.clone(),
                process_id: item.last_status.process_id,
                vram_usage: item.last_status.vram_usage,
            });
        }

        match name {
            Some(name) => all.into_iter().filter(|m| m.model_name == name).collect(),
            None => all,
        }
    }

    /// 从持久化配置恢复模型
    ///
    /// 逐个尝试，错误累积到最后统一返回；单个模型失败不影响其余。
    pub async fn restore_models(&self) -> Result<(), LlamaHerdError> {
        if !self.auto_restore {
            tracing::info!("Auto restore is disabled, skipping model restoration");
            return Ok(());
        }

        let configs = self.store.get_all().await?;
        if configs.is_empty() {
            tracing::info!("No models to restore");
            return Ok(());
        }

        let mut last_error: Option<LlamaHerdError> = None;
        let mut restored = 0usize;

        for (model_name, item) in configs {
            let last = &item.last_status;

            if last.running && last.process_id > 0 {
                if is_pid_alive(last.process_id) {
                    // 进程仍然存活，重新纳入注册表即可
                    tracing::info!(
                        "Model {} is already running (PID: {}), re-adopting",
                        model_name,
                        last.process_id
                    );
                    self.runner.track(last.process_id, last.clone());
                    continue;
                }

                // 进程已终止但状态未更新，先修正记录
                tracing::info!(
                    "Model {} process (PID: {}) not found, updating status",
                    model_name,
                    last.process_id
                );
                let mut corrected = last.clone();
                corrected.running = false;
                corrected.stop_time = chrono::Utc::now().to_rfc3339();
                if let Err(err) = self
                    .store
                    .update_model(&model_name, &item.model_config, &corrected)
                    .await
                {
                    tracing::warn!("Failed to update model status: {}", err);
                }
            }

            if let Err(err) = validate_model_config(&item.model_config) {
                tracing::warn!("Invalid config for model {}: {}", model_name, err);
                last_error = Some(err.into());
                continue;
            }

            tracing::info!("Restoring model: {}", model_name);
            match self.start_model(&item.model_config).await {
                Ok(_) => restored += 1,
                Err(err) => {
                    tracing::warn!("Failed to restore model {}: {}", model_name, err);
                    last_error = Some(err);
                }
            }
        }

        if restored > 0 {
            tracing::info!("Successfully restored {} models", restored);
        }

        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 列出模型目录中的 GGUF 文件
    pub async fn list_models(&self) -> Result<Vec<ModelFile>, LlamaHerdError> {
        let mut models = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.config.models_dir)
            .await
            .map_err(|e| {
                StorageError::ReadFailed(format!("failed to read models directory: {}", e))
            })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            StorageError::ReadFailed(format!("failed to read directory entry: {}", e))
        })? {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !name.to_lowercase().ends_with(".gguf") {
                continue;
            }

            let size = match entry.metadata().await {
                Ok(meta) => meta.len(),
                Err(err) => {
                    tracing::warn!("Failed to get info for {}: {}", name, err);
                    continue;
                }
            };

            models.push(ModelFile {
                name,
                path: path.to_string_lossy().to_string(),
                size,
            });
        }

        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }
}
