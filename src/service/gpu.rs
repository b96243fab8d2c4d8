//! GPU 显存探测
//!
//! 通过外部工具查询每块显卡的空闲显存。探测失败（工具不存在、非零退出、
//! 输出无法解析）一律返回错误，调用方不得把"探测失败"当作"显存充足"。

use crate::api::error::VramError;
use async_trait::async_trait;
use tokio::process::Command;

/// 显存探测接口
///
/// 准入控制只依赖这个接口，测试时可以注入脚本化的实现。
#[async_trait]
pub trait VramProbe: Send + Sync {
    /// 每块显卡的空闲显存（MB），一块一项
    async fn free_vram(&self) -> Result<Vec<u64>, VramError>;

    /// 所有显卡的空闲显存合计（MB）
    async fn total_free_vram(&self) -> Result<u64, VramError> {
        Ok(self.free_vram().await?.iter().sum())
    }
}

/// 基于 nvidia-smi 的探测实现
pub struct NvidiaSmi;

#[async_trait]
impl VramProbe for NvidiaSmi {
    async fn free_vram(&self) -> Result<Vec<u64>, VramError> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=memory.free", "--format=csv,noheader,nounits"])
            .output()
            .await
            .map_err(|e| VramError::ProbeFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(VramError::ProbeFailed(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        parse_free_vram(&String::from_utf8_lossy(&output.stdout))
    }
}

/// 解析 nvidia-smi 的输出：每行一个整数（MB）
fn parse_free_vram(output: &str) -> Result<Vec<u64>, VramError> {
    let mut free = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mb = line
            .parse::<u64>()
            .map_err(|e| VramError::ProbeFailed(format!("failed to parse GPU memory: {}", e)))?;
        free.push(mb);
    }

    if free.is_empty() {
        return Err(VramError::ProbeFailed(
            "no GPU memory information available".to_string(),
        ));
    }

    Ok(free)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_device() {
        assert_eq!(parse_free_vram("24000\n").unwrap(), vec![24000]);
    }

    #[test]
    fn test_parse_multiple_devices() {
        assert_eq!(
            parse_free_vram("10240\n 8192 \n4096\n").unwrap(),
            vec![10240, 8192, 4096]
        );
    }

    #[test]
    fn test_parse_empty_output_is_error() {
        assert!(parse_free_vram("").is_err());
        assert!(parse_free_vram("\n\n").is_err());
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_free_vram("N/A\n").is_err());
        assert!(parse_free_vram("10240 MiB\n").is_err());
    }

    #[tokio::test]
    async fn test_total_sums_all_devices() {
        struct Fixed;

        #[async_trait]
        impl VramProbe for Fixed {
            async fn free_vram(&self) -> Result<Vec<u64>, VramError> {
                Ok(vec![10000, 6000, 2000])
            }
        }

        assert_eq!(Fixed.total_free_vram().await.unwrap(), 18000);
    }
}
