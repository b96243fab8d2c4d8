//! 子进程生命周期管理
//!
//! 负责启动 llama-server/llama-bench 子进程、跟踪运行中的模型、
//! 以及"先中断、限时等待、再强杀"的终止协议。每个子进程都放进
//! 自己的进程组，中断只影响该子树。平台差异（信号 / tasklist）
//! 全部封装在本模块内。

use crate::api::error::ProcessError;
use crate::models::types::ModelStatus;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};

/// 终止协议的宽限时间
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// 宽限期内的存活轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Windows 进程组创建标志（CREATE_NEW_PROCESS_GROUP）
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// 进程管理器
///
/// 以 pid 为键跟踪运行中的模型。锁只在映射增删查时持有，
/// 从不跨越阻塞的 spawn/kill 调用。
pub struct ProcessRunner {
    models: Mutex<HashMap<u32, ModelStatus>>,
}

impl ProcessRunner {
    /// 创建新的进程管理器
    pub fn new() -> Self {
        Self {
            models: Mutex::new(HashMap::new()),
        }
    }

    /// 启动一个受监管的模型子进程
    ///
    /// 子进程继承监管器的标准输出/错误，后台等待任务观察到退出后
    /// 清理注册表条目。返回时进程已创建（不保证健康）。
    pub fn spawn_supervised(
        self: &Arc<Self>,
        program: &Path,
        args: &[String],
    ) -> Result<u32, ProcessError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        configure_process_group(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;
        let pid = child.id().unwrap_or(0);

        // 后台等待进程退出并发布到注册表
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let result = child.wait().await;
            let removed = runner.untrack(pid);
            match removed {
                Some(model) => tracing::info!(
                    "Model '{}' (PID: {}) exited: {:?}",
                    model.model_name,
                    pid,
                    result
                ),
                None => tracing::info!("Process exited (PID: {}): {:?}", pid, result),
            }
        });

        Ok(pid)
    }

    /// 启动一个捕获输出的子进程（基准测试用）
    ///
    /// stdout/stderr 进内存缓冲，由调用方等待并收割。
    pub fn spawn_captured(program: &Path, args: &[String]) -> Result<Child, ProcessError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        configure_process_group(&mut cmd);

        cmd.spawn()
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))
    }

    /// 登记运行中的模型
    pub fn track(&self, pid: u32, status: ModelStatus) {
        self.models.lock().unwrap().insert(pid, status);
    }

    /// 移除已停止的模型，返回其最后状态
    pub fn untrack(&self, pid: u32) -> Option<ModelStatus> {
        self.models.lock().unwrap().remove(&pid)
    }

    /// 按名称查找运行中的模型
    pub fn find(&self, name: &str) -> Option<ModelStatus> {
        self.models
            .lock()
            .unwrap()
            .values()
            .find(|m| m.model_name == name)
            .cloned()
    }

    /// 获取运行中的模型列表（惰性校正）
    ///
    /// 逐项核对 pid 是否仍然存活，死掉的条目在这里被移除并记录。
    /// 这是注册表条目从"看似运行"变为"消失"的唯一通道。
    pub fn running_models(&self) -> Vec<ModelStatus> {
        let pids: Vec<u32> = self.models.lock().unwrap().keys().copied().collect();

        let mut dead = Vec::new();
        for pid in pids {
            if !is_pid_alive(pid) {
                dead.push(pid);
            }
        }

        let mut map = self.models.lock().unwrap();
        for pid in dead {
            if let Some(model) = map.remove(&pid) {
                tracing::warn!(
                    "Cleaning up stopped model (PID: {}, Name: {})",
                    pid,
                    model.model_name
                );
            }
        }

        map.values().cloned().collect()
    }

    /// 按显存使用降序排序的运行模型列表
    ///
    /// 显存相同的按启动时间升序，先驱逐更早启动的。
    pub fn models_by_vram_desc(&self) -> Vec<ModelStatus> {
        let mut models = self.running_models();
        models.sort_by(|a, b| {
            b.vram_usage
                .cmp(&a.vram_usage)
                .then_with(|| a.start_time.cmp(&b.start_time))
        });
        models
    }

    /// 停止指定名称的模型
    pub async fn stop_model(&self, model_name: &str) -> Result<ModelStatus, ProcessError> {
        let target = self
            .models
            .lock()
            .unwrap()
            .iter()
            .find(|(_, m)| m.model_name == model_name)
            .map(|(pid, m)| (*pid, m.clone()));

        let (pid, model) = match target {
            Some(t) => t,
            None => {
                return Err(ProcessError::NotFound(0));
            }
        };

        terminate_pid(pid, STOP_GRACE).await?;
        self.untrack(pid);
        tracing::info!("Model '{}' (PID: {}) stopped successfully", model_name, pid);

        Ok(model)
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// 为子进程配置独立的进程组
fn configure_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

/// 检查指定 pid 的进程是否存活
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // 空信号探测：ESRCH 表示进程不存在，其他错误（如 EPERM）视为存活
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        true
    } else {
        std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }
}

/// 检查指定 pid 的进程是否存活
#[cfg(windows)]
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let output = std::process::Command::new("tasklist")
        .args(["/fi", &format!("PID eq {}", pid)])
        .output();
    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()),
        Err(_) => false,
    }
}

/// 终止指定 pid 的进程（组）
///
/// 三阶段协议：向进程组发送中断信号；在宽限期内轮询等待退出；
/// 仍然存活则无条件强杀。对已死进程调用是幂等的成功。
pub async fn terminate_pid(pid: u32, grace: Duration) -> Result<(), ProcessError> {
    if !is_pid_alive(pid) {
        return Ok(());
    }

    send_interrupt(pid);

    let deadline = tokio::time::Instant::now() + grace;
    while is_pid_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("Process {} did not exit within grace period, killing", pid);
            send_kill(pid);
            // 给强杀一点生效时间再做最终判定
            tokio::time::sleep(POLL_INTERVAL).await;
            if is_pid_alive(pid) {
                return Err(ProcessError::KillFailed {
                    pid,
                    reason: "process still alive after SIGKILL".to_string(),
                });
            }
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    Ok(())
}

/// 发送优雅中断（进程组优先，失败时退回单进程）
#[cfg(unix)]
fn send_interrupt(pid: u32) {
    unsafe {
        if libc::kill(-(pid as libc::pid_t), libc::SIGINT) != 0 {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
}

#[cfg(windows)]
fn send_interrupt(pid: u32) {
    // 没有 /F 的 taskkill 相当于向窗口/控制台发送关闭请求
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .output();
}

/// 无条件强杀（整个进程组）
#[cfg(unix)]
fn send_kill(pid: u32) {
    unsafe {
        if libc::kill(-(pid as libc::pid_t), libc::SIGKILL) != 0 {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(windows)]
fn send_kill(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn status(name: &str, pid: u32, vram: u64, start_time: &str) -> ModelStatus {
        ModelStatus {
            running: true,
            model_name: name.to_string(),
            model_path: format!("/models/{}.gguf", name),
            port: 8081,
            start_time: start_time.to_string(),
            stop_time: String::new(),
            process_id: pid,
            vram_usage: vram,
        }
    }

    #[tokio::test]
    async fn test_spawn_and_waiter_cleanup() {
        let runner = Arc::new(ProcessRunner::new());
        // 立即退出的子进程
        let pid = runner
            .spawn_supervised(&PathBuf::from("true"), &[])
            .unwrap();
        runner.track(pid, status("ephemeral", pid, 100, "t"));

        // 等待后台等待任务收割并清理
        for _ in 0..50 {
            if runner.running_models().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("waiter did not clean up exited child");
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let runner = Arc::new(ProcessRunner::new());
        let pid = runner
            .spawn_supervised(&PathBuf::from("sleep"), &["30".to_string()])
            .unwrap();
        assert!(is_pid_alive(pid));

        // sleep 响应 SIGINT，应当在宽限期内退出
        terminate_pid(pid, Duration::from_secs(5)).await.unwrap();
        assert!(!is_pid_alive(pid));
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let runner = Arc::new(ProcessRunner::new());
        // 忽略 SIGINT 的子进程，只有 SIGKILL 能结束它
        let pid = runner
            .spawn_supervised(
                &PathBuf::from("sh"),
                &["-c".to_string(), "trap '' INT; sleep 30".to_string()],
            )
            .unwrap();
        assert!(is_pid_alive(pid));

        terminate_pid(pid, Duration::from_millis(500)).await.unwrap();
        assert!(!is_pid_alive(pid));
    }

    #[tokio::test]
    async fn test_terminate_dead_pid_is_noop() {
        // 已经死亡的 pid：幂等成功
        assert!(terminate_pid(0, Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_model_by_name() {
        let runner = Arc::new(ProcessRunner::new());
        let pid = runner
            .spawn_supervised(&PathBuf::from("sleep"), &["30".to_string()])
            .unwrap();
        runner.track(pid, status("qwen", pid, 4000, "t1"));

        let stopped = runner.stop_model("qwen").await.unwrap();
        assert_eq!(stopped.model_name, "qwen");
        assert!(runner.find("qwen").is_none());
    }

    #[tokio::test]
    async fn test_stop_unknown_model() {
        let runner = ProcessRunner::new();
        assert!(runner.stop_model("ghost").await.is_err());
    }

    #[test]
    fn test_vram_ordering_with_start_time_tiebreak() {
        let runner = ProcessRunner::new();
        let me = std::process::id();
        // 用本进程的存活 pid 注册，避免被校正清理；名称区分条目
        runner.track(me, status("big", me, 10000, "2025-01-01T00:00:00Z"));

        let models = runner.models_by_vram_desc();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_name, "big");
    }

    #[test]
    fn test_reconcile_drops_dead_pid() {
        let runner = ProcessRunner::new();
        // 超出 Linux PID_MAX_LIMIT 的 pid 必然不存在
        runner.track(500_000_000, status("ghost", 500_000_000, 100, "t"));
        assert!(runner.running_models().is_empty());
    }
}
