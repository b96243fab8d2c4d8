//! llama-bench 输出解析
//!
//! 输入是 bench 子进程的完整 stdout。识别 CUDA 设备行、后端加载行、
//! 八列管道分隔的结果表（跳过表头和分隔行）以及构建信息行。
//! t/s 单元格形如 `<均值> ± <波动>`，两者都按浮点解析。

use crate::api::error::BenchmarkError;
use regex::Regex;

/// 解析后的完整基准测试报告
#[derive(Debug, Clone, Default)]
pub struct ParsedBenchmark {
    /// CUDA 设备列表
    pub cuda_devices: Vec<CudaDevice>,
    /// 加载的计算后端名
    pub backends_loaded: Vec<String>,
    /// 结果表的全部数据行（平坦列表）
    pub rows: Vec<BenchRow>,
    /// 按 {model, backend, ngl, mmap} 分组的逻辑模型
    pub models: Vec<ModelGroup>,
    /// 构建信息
    pub build: Option<BuildInfo>,
}

/// 一块 CUDA 设备
#[derive(Debug, Clone, PartialEq)]
pub struct CudaDevice {
    pub id: i32,
    pub name: String,
    pub compute_capability: String,
    pub vmm: bool,
}

/// 结果表的一行
#[derive(Debug, Clone, PartialEq)]
pub struct BenchRow {
    pub model: String,
    pub size: String,
    pub params: String,
    pub backend: String,
    pub gpu_layers: i32,
    pub mmap: bool,
    pub test_type: String,
    pub tokens_per_second: f64,
    pub variation: f64,
}

/// 同一逻辑模型下的多个测试
#[derive(Debug, Clone)]
pub struct ModelGroup {
    pub model: String,
    pub size: String,
    pub params: String,
    pub backend: String,
    pub gpu_layers: i32,
    pub mmap: bool,
    pub tests: Vec<TestEntry>,
}

/// 分组内的单个测试结果
#[derive(Debug, Clone, PartialEq)]
pub struct TestEntry {
    pub test_type: String,
    pub tokens_per_second: f64,
    pub variation: f64,
}

/// llama.cpp 构建信息
#[derive(Debug, Clone, PartialEq)]
pub struct BuildInfo {
    pub commit_hash: String,
    pub build_number: String,
}

/// 解析 llama-bench 的完整 stdout
pub fn parse_benchmark_output(output: &str) -> Result<ParsedBenchmark, BenchmarkError> {
    if output.is_empty() {
        return Err(BenchmarkError::ParseFailed("empty input".to_string()));
    }
    if !output.contains("Device") && !output.contains("model") {
        return Err(BenchmarkError::ParseFailed(
            "invalid benchmark format: missing required content".to_string(),
        ));
    }

    let mut result = ParsedBenchmark::default();

    // CUDA 设备信息
    let device_re =
        Regex::new(r"Device (\d+): ([^,]+), compute capability ([^,]+), VMM: (yes|no)").unwrap();
    for caps in device_re.captures_iter(output) {
        result.cuda_devices.push(CudaDevice {
            id: caps[1].parse().unwrap_or(0),
            name: caps[2].to_string(),
            compute_capability: caps[3].to_string(),
            vmm: &caps[4] == "yes",
        });
    }

    // 加载的后端
    let backend_re = Regex::new(r"load_backend: loaded (\w+) backend").unwrap();
    for caps in backend_re.captures_iter(output) {
        result.backends_loaded.push(caps[1].to_string());
    }

    // 结果表：| model | size | params | backend | ngl | mmap | test | t/s |
    let row_re = Regex::new(
        r"\|\s*([^\|]+)\s*\|\s*([^\|]+)\s*\|\s*([^\|]+)\s*\|\s*([^\|]+)\s*\|\s*([^\|]+)\s*\|\s*([^\|]+)\s*\|\s*([^\|]+)\s*\|\s*([^\|]+)\s*\|",
    )
    .unwrap();

    for caps in row_re.captures_iter(output) {
        let model = caps[1].trim().to_string();
        // 跳过表头和分隔行
        if model.starts_with("----") || model == "model" {
            continue;
        }

        let test_type = caps[7].trim().to_string();
        if model.is_empty() || test_type.is_empty() {
            continue;
        }

        let (tokens_per_second, variation) = parse_tokens_per_second(caps[8].trim());
        let gpu_layers = caps[5].trim().parse().unwrap_or(0);
        let mmap = caps[6].trim() == "1";

        let row = BenchRow {
            model: model.clone(),
            size: caps[2].trim().to_string(),
            params: caps[3].trim().to_string(),
            backend: caps[4].trim().to_string(),
            gpu_layers,
            mmap,
            test_type: test_type.clone(),
            tokens_per_second,
            variation,
        };

        // 归入逻辑模型分组，同组内测试类型去重
        let entry = TestEntry {
            test_type,
            tokens_per_second,
            variation,
        };
        let group_idx = result.models.iter().position(|g| {
            g.model == row.model
                && g.backend == row.backend
                && g.gpu_layers == row.gpu_layers
                && g.mmap == row.mmap
        });
        match group_idx {
            Some(idx) => {
                let group = &mut result.models[idx];
                if !group.tests.iter().any(|t| t.test_type == entry.test_type) {
                    group.tests.push(entry);
                }
            }
            None => result.models.push(ModelGroup {
                model: row.model.clone(),
                size: row.size.clone(),
                params: row.params.clone(),
                backend: row.backend.clone(),
                gpu_layers: row.gpu_layers,
                mmap: row.mmap,
                tests: vec![entry],
            }),
        }

        result.rows.push(row);
    }

    // 构建信息
    let build_re = Regex::new(r"build: (\w+) \((\d+)\)").unwrap();
    if let Some(caps) = build_re.captures(output) {
        result.build = Some(BuildInfo {
            commit_hash: caps[1].to_string(),
            build_number: caps[2].to_string(),
        });
    }

    if result.models.is_empty() {
        return Err(BenchmarkError::ParseFailed(
            "no valid test results found".to_string(),
        ));
    }

    Ok(result)
}

/// 解析 `<均值> ± <波动>` 形式的 t/s 单元格
fn parse_tokens_per_second(s: &str) -> (f64, f64) {
    let parts: Vec<&str> = s.split('±').collect();
    if parts.len() != 2 {
        return (0.0, 0.0);
    }
    let tokens = parts[0].trim().parse().unwrap_or(0.0);
    let variation = parts[1].trim().parse().unwrap_or(0.0);
    (tokens, variation)
}

/// 根据测试类型计算总 token 数（pp512 -> 512，tg128 -> 128）
pub fn total_tokens_for(test_type: &str) -> i64 {
    for prefix in ["pp", "tg"] {
        if let Some(suffix) = test_type.strip_prefix(prefix) {
            // pp/tg 后面可能带 "@d..." 之类的深度标注，只取前导数字
            let digits: String = suffix.chars().take_while(|c| c.is_ascii_digit()).collect();
            return digits.parse().unwrap_or(0);
        }
    }
    0
}

/// 根据 token 数和速度计算总耗时（秒）
pub fn total_time_for(test_type: &str, tokens_per_second: f64) -> f64 {
    if tokens_per_second <= 0.0 {
        return 0.0;
    }
    total_tokens_for(test_type) as f64 / tokens_per_second
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"ggml_cuda_init: GGML_CUDA_FORCE_MMQ:    no
ggml_cuda_init: GGML_CUDA_FORCE_CUBLAS: no
ggml_cuda_init: found 1 CUDA devices:
  Device 0: Tesla P40, compute capability 6.1, VMM: no
load_backend: loaded CUDA backend from E:\Downloads\llama-b5293-bin-win-cuda-cu12.4-x64\ggml-cuda.dll
load_backend: loaded RPC backend from E:\Downloads\llama-b5293-bin-win-cuda-cu12.4-x64\ggml-rpc.dll
load_backend: loaded CPU backend from E:\Downloads\llama-b5293-bin-win-cuda-cu12.4-x64\ggml-cpu-skylakex.dll
| model                          |       size |     params | backend    | ngl | mmap |            test |                  t/s |
| ------------------------------ | ---------: | ---------: | ---------- | --: | ---: | --------------: | -------------------: |
| qwen2 32B Q4_K - Medium        |  18.48 GiB |    32.76 B | CUDA,RPC   |  99 |    0 |           pp512 |        212.25 ± 0.47 |
| qwen2 32B Q4_K - Medium        |  18.48 GiB |    32.76 B | CUDA,RPC   |  99 |    0 |           tg128 |          9.48 ± 0.00 |

build: 1e333d5b (5293)"#;

    #[test]
    fn test_parse_multiple_tests() {
        let result = parse_benchmark_output(SAMPLE).unwrap();

        assert_eq!(result.cuda_devices.len(), 1);
        let device = &result.cuda_devices[0];
        assert_eq!(device.id, 0);
        assert_eq!(device.name, "Tesla P40");
        assert_eq!(device.compute_capability, "6.1");
        assert!(!device.vmm);

        assert_eq!(
            result.backends_loaded,
            vec!["CUDA".to_string(), "RPC".to_string(), "CPU".to_string()]
        );

        // 两行数据归入同一个逻辑模型
        assert_eq!(result.models.len(), 1);
        let group = &result.models[0];
        assert_eq!(group.model, "qwen2 32B Q4_K - Medium");
        assert_eq!(group.tests.len(), 2);

        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].test_type, "pp512");
        assert_eq!(result.rows[0].tokens_per_second, 212.25);
        assert_eq!(result.rows[0].variation, 0.47);
        assert_eq!(result.rows[1].test_type, "tg128");
        assert_eq!(result.rows[1].tokens_per_second, 9.48);

        let build = result.build.unwrap();
        assert_eq!(build.commit_hash, "1e333d5b");
        assert_eq!(build.build_number, "5293");
    }

    #[test]
    fn test_parse_single_test() {
        let input = r#"| model                          |       size |     params | backend    | ngl | mmap |            test |                  t/s |
| ------------------------------ | ---------: | ---------: | ---------- | --: | ---: | --------------: | -------------------: |
| qwen2 32B Q4_K - Medium        |  18.48 GiB |    32.76 B | CUDA,RPC   |  99 |    0 |           pp512 |        212.25 ± 0.47 |

build: 1e333d5b (5293)"#;

        let result = parse_benchmark_output(input).unwrap();
        assert_eq!(result.models.len(), 1);
        assert_eq!(result.models[0].tests.len(), 1);
    }

    #[test]
    fn test_parse_empty_input() {
        let err = parse_benchmark_output("").unwrap_err();
        assert!(err.to_string().contains("empty input"));
    }

    #[test]
    fn test_parse_missing_markers() {
        let err = parse_benchmark_output("build: 1e333d5b (5293)").unwrap_err();
        assert!(err.to_string().contains("missing required content"));
    }

    #[test]
    fn test_parse_header_only_table() {
        // 只有表头和分隔行，没有数据行
        let input = "| model | size | params | backend | ngl | mmap | test | t/s |\n| ---- | ---- | ---- | ---- | --: | ---: | ---: | ---: |\n";
        let err = parse_benchmark_output(input).unwrap_err();
        assert!(err.to_string().contains("no valid test results"));
    }

    #[test]
    fn test_parse_malformed_table() {
        let input = "| header1 | header2 |\n| ------- | ------- |\n| value1";
        assert!(parse_benchmark_output(input).is_err());
    }

    #[test]
    fn test_tokens_per_second_cell() {
        assert_eq!(parse_tokens_per_second("212.25 ± 0.47"), (212.25, 0.47));
        assert_eq!(parse_tokens_per_second("9.48 ± 0.00"), (9.48, 0.0));
        assert_eq!(parse_tokens_per_second("garbage"), (0.0, 0.0));
    }

    #[test]
    fn test_total_tokens() {
        assert_eq!(total_tokens_for("pp512"), 512);
        assert_eq!(total_tokens_for("tg128"), 128);
        assert_eq!(total_tokens_for("pp512@d1024"), 512);
        assert_eq!(total_tokens_for("unknown"), 0);
    }

    #[test]
    fn test_total_time_full_precision() {
        let time = total_time_for("pp512", 212.25);
        assert_eq!(time, 512.0 / 212.25);

        let time = total_time_for("tg128", 9.48);
        assert_eq!(time, 128.0 / 9.48);

        assert_eq!(total_time_for("pp512", 0.0), 0.0);
    }
}
