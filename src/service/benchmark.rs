//! 基准测试服务
//!
//! 每次请求生成一个 UUIDv4 任务句柄，spawn 一个有界生命周期的
//! llama-bench 子进程并捕获其全部输出。后台任务等待子进程结束，
//! 把表格报告解析为类型化结果。任务状态单调推进，终态不再改变。

use crate::api::error::{BenchmarkError, LlamaHerdError};
use crate::config::Config;
use crate::models::args::build_bench_args;
use crate::models::types::{BenchmarkConfig, BenchmarkResult, BenchmarkStatus, TaskState};
use crate::service::parser::{parse_benchmark_output, total_time_for, total_tokens_for};
use crate::service::process::{self, ProcessRunner, STOP_GRACE};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

/// 失败任务保留的 stderr 摘要长度
const STDERR_TAIL: usize = 2000;

/// 基准测试服务
pub struct BenchmarkService {
    config: Config,
    tasks: Arc<RwLock<HashMap<String, BenchmarkStatus>>>,
    /// 运行中任务的子进程 pid，用于取消；不对客户端暴露
    running_pids: Arc<Mutex<HashMap<String, u32>>>,
}

impl BenchmarkService {
    /// 创建新的基准测试服务
    pub fn new(config: Config) -> Self {
        Self {
            config,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            running_pids: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 解析模型路径（相对路径按模型目录解析）
    fn resolve_model_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.config.models_dir.join(p)
        }
    }

    /// 启动基准测试，返回任务 ID
    pub async fn start_benchmark(&self, cfg: &BenchmarkConfig) -> Result<String, LlamaHerdError> {
        let task_id = Uuid::new_v4().to_string();

        let model_path = self.resolve_model_path(&cfg.model_path);
        let args = build_bench_args(cfg, &model_path.to_string_lossy());

        tracing::info!(
            "Starting benchmark with command:\n{} {}",
            self.config.llama_path.bench.display(),
            args.join(" ")
        );

        // 先登记任务，spawn 失败再撤销
        let status = BenchmarkStatus {
            task_id: task_id.clone(),
            status: TaskState::Running,
            progress: 0.0,
            start_time: chrono::Utc::now().to_rfc3339(),
            end_time: String::new(),
            all_results: None,
            error: None,
        };
        self.tasks.write().await.insert(task_id.clone(), status);

        let child = match ProcessRunner::spawn_captured(&self.config.llama_path.bench, &args) {
            Ok(child) => child,
            Err(err) => {
                self.tasks.write().await.remove(&task_id);
                return Err(err.into());
            }
        };

        if let Some(pid) = child.id() {
            self.running_pids.lock().unwrap().insert(task_id.clone(), pid);
        }

        // 后台等待子进程并收集结果
        let tasks = Arc::clone(&self.tasks);
        let running_pids = Arc::clone(&self.running_pids);
        let worker_id = task_id.clone();
        tokio::spawn(async move {
            let output = child.wait_with_output().await;
            running_pids.lock().unwrap().remove(&worker_id);

            let mut tasks = tasks.write().await;
            let status = match tasks.get_mut(&worker_id) {
                Some(status) => status,
                None => return,
            };
            // 已取消等终态不再改写
            if status.status.is_terminal() {
                return;
            }

            let end_time = chrono::Utc::now().to_rfc3339();
            let output = match output {
                Ok(output) => output,
                Err(err) => {
                    status.status = TaskState::Failed;
                    status.error = Some(err.to_string());
                    status.end_time = end_time;
                    tracing::error!("Benchmark wait failed: {}", err);
                    return;
                }
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: String = stderr
                    .chars()
                    .skip(stderr.chars().count().saturating_sub(STDERR_TAIL))
                    .collect();
                status.status = TaskState::Failed;
                status.error = Some(tail.clone());
                status.end_time = end_time;
                tracing::error!("Benchmark failed: {}, stderr: {}", output.status, tail);
                return;
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            match parse_benchmark_output(&stdout) {
                Ok(parsed) => {
                    let results: Vec<BenchmarkResult> = parsed
                        .rows
                        .iter()
                        .map(|row| BenchmarkResult {
                            model: row.model.clone(),
                            size: row.size.clone(),
                            params: row.params.clone(),
                            backend: row.backend.clone(),
                            gpu_layers: row.gpu_layers,
                            mmap: row.mmap,
                            test_type: row.test_type.clone(),
                            tokens_per_second: row.tokens_per_second,
                            variation: row.variation,
                            total_tokens: total_tokens_for(&row.test_type),
                            total_time: total_time_for(&row.test_type, row.tokens_per_second),
                            memory_used: 0,
                        })
                        .collect();

                    tracing::info!(
                        "Benchmark task {} completed with {} results",
                        worker_id,
                        results.len()
                    );
                    status.all_results = Some(results);
                    status.status = TaskState::Completed;
                    status.progress = 100.0;
                }
                Err(err) => {
                    tracing::error!("Failed to parse benchmark output: {}", err);
                    status.status = TaskState::Failed;
                    status.error = Some(err.to_string());
                }
            }
            status.end_time = end_time;
        });

        Ok(task_id)
    }

    /// 获取基准测试任务状态
    pub async fn get_status(&self, task_id: &str) -> Result<BenchmarkStatus, BenchmarkError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| BenchmarkError::TaskNotFound(task_id.to_string()))
    }

    /// 取消指定任务
    ///
    /// 只有 running 状态的任务可以取消；取消立即生效，
    /// 子进程的终止在后台按标准协议执行。
    pub async fn stop_task(&self, task_id: &str) -> Result<(), BenchmarkError> {
        let mut tasks = self.tasks.write().await;
        let status = tasks
            .get_mut(task_id)
            .ok_or_else(|| BenchmarkError::TaskNotFound(task_id.to_string()))?;

        if status.status != TaskState::Running {
            return Err(BenchmarkError::TaskNotRunning {
                task_id: task_id.to_string(),
                status: status.status.to_string(),
            });
        }

        status.status = TaskState::Cancelled;
        status.end_time = chrono::Utc::now().to_rfc3339();
        tracing::info!("Benchmark task cancelled: {}", task_id);

        if let Some(pid) = self.running_pids.lock().unwrap().remove(task_id) {
            tokio::spawn(async move {
                if let Err(err) = process::terminate_pid(pid, STOP_GRACE).await {
                    tracing::warn!("Failed to terminate benchmark child {}: {}", pid, err);
                }
            });
        }

        Ok(())
    }

    /// 取消所有运行中的任务
    pub async fn stop_all_tasks(&self) {
        let running: Vec<String> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|s| s.status == TaskState::Running)
            .map(|s| s.task_id.clone())
            .collect();

        for task_id in running {
            if let Err(err) = self.stop_task(&task_id).await {
                tracing::warn!("Failed to cancel task {}: {}", task_id, err);
            }
        }
    }

    /// 关闭时清理所有任务资源
    pub async fn cleanup(&self) {
        tracing::info!("Cleaning up benchmark service...");
        self.stop_all_tasks().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::types::BenchSettings;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    const SAMPLE_OUTPUT: &str = r#"ggml_cuda_init: found 1 CUDA devices:
  Device 0: Tesla P40, compute capability 6.1, VMM: no
load_backend: loaded CUDA backend from ggml-cuda.dll
| model                          |       size |     params | backend    | ngl | mmap |            test |                  t/s |
| ------------------------------ | ---------: | ---------: | ---------- | --: | ---: | --------------: | -------------------: |
| qwen2 32B Q4_K - Medium        |  18.48 GiB |    32.76 B | CUDA,RPC   |  99 |    0 |           pp512 |        212.25 ± 0.47 |
| qwen2 32B Q4_K - Medium        |  18.48 GiB |    32.76 B | CUDA,RPC   |  99 |    0 |           tg128 |          9.48 ± 0.00 |

build: 1e333d5b (5293)"#;

    /// 写一个替身 bench 脚本并返回指向它的服务配置
    fn service_with_script(dir: &TempDir, script_body: &str) -> BenchmarkService {
        let script = dir.path().join("fake-bench.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", script_body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::default();
        config.llama_path.bench = script;
        config.models_dir = dir.path().to_path_buf();
        BenchmarkService::new(config)
    }

    fn bench_config() -> BenchmarkConfig {
        BenchmarkConfig {
            model_path: "test.gguf".to_string(),
            config: BenchSettings::default(),
        }
    }

    async fn wait_for_terminal(service: &BenchmarkService, task_id: &str) -> BenchmarkStatus {
        for _ in 0..100 {
            let status = service.get_status(task_id).await.unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("task never reached a terminal state");
    }

    #[tokio::test]
    async fn test_completed_benchmark_with_results() {
        let dir = TempDir::new().unwrap();
        // 脚本忽略参数，打印样例输出
        let service = service_with_script(&dir, &format!("cat <<'EOF'\n{}\nEOF", SAMPLE_OUTPUT));

        let task_id = service.start_benchmark(&bench_config()).await.unwrap();
        let status = wait_for_terminal(&service, &task_id).await;

        assert_eq!(status.status, TaskState::Completed);
        assert_eq!(status.progress, 100.0);
        assert!(!status.end_time.is_empty());

        let results = status.all_results.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].test_type, "pp512");
        assert_eq!(results[0].total_tokens, 512);
        assert_eq!(results[0].total_time, 512.0 / 212.25);
        assert_eq!(results[1].test_type, "tg128");
        assert_eq!(results[1].total_tokens, 128);
        assert_eq!(results[1].total_time, 128.0 / 9.48);
    }

    #[tokio::test]
    async fn test_nonzero_exit_marks_failed() {
        let dir = TempDir::new().unwrap();
        let service = service_with_script(&dir, "echo 'model load error' >&2; exit 1");

        let task_id = service.start_benchmark(&bench_config()).await.unwrap();
        let status = wait_for_terminal(&service, &task_id).await;

        assert_eq!(status.status, TaskState::Failed);
        assert!(status.error.unwrap().contains("model load error"));
    }

    #[tokio::test]
    async fn test_unparseable_output_marks_failed() {
        let dir = TempDir::new().unwrap();
        let service = service_with_script(&dir, "echo 'Device 0 gibberish without a table'");

        let task_id = service.start_benchmark(&bench_config()).await.unwrap();
        let status = wait_for_terminal(&service, &task_id).await;

        assert_eq!(status.status, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let dir = TempDir::new().unwrap();
        let service = service_with_script(&dir, "sleep 30");

        let task_id = service.start_benchmark(&bench_config()).await.unwrap();
        service.stop_task(&task_id).await.unwrap();

        let status = service.get_status(&task_id).await.unwrap();
        assert_eq!(status.status, TaskState::Cancelled);
        assert!(!status.end_time.is_empty());

        // 等待后台终止收尾：取消是终态，等待任务不得改写
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = service.get_status(&task_id).await.unwrap();
        assert_eq!(status.status, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_completed_task_is_rejected() {
        let dir = TempDir::new().unwrap();
        let service = service_with_script(&dir, "exit 1");

        let task_id = service.start_benchmark(&bench_config()).await.unwrap();
        wait_for_terminal(&service, &task_id).await;

        let err = service.stop_task(&task_id).await.unwrap_err();
        assert!(matches!(err, BenchmarkError::TaskNotRunning { .. }));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let dir = TempDir::new().unwrap();
        let service = service_with_script(&dir, "exit 0");
        assert!(matches!(
            service.get_status("nope").await.unwrap_err(),
            BenchmarkError::TaskNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_stop_all_tasks() {
        let dir = TempDir::new().unwrap();
        let service = service_with_script(&dir, "sleep 30");

        let t1 = service.start_benchmark(&bench_config()).await.unwrap();
        let t2 = service.start_benchmark(&bench_config()).await.unwrap();

        service.cleanup().await;

        assert_eq!(
            service.get_status(&t1).await.unwrap().status,
            TaskState::Cancelled
        );
        assert_eq!(
            service.get_status(&t2).await.unwrap().status,
            TaskState::Cancelled
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_removes_task() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.llama_path.bench = dir.path().join("does-not-exist");
        config.models_dir = dir.path().to_path_buf();
        let service = BenchmarkService::new(config);

        assert!(service.start_benchmark(&bench_config()).await.is_err());
        assert!(service.tasks.read().await.is_empty());
    }
}
