//! 领域类型
//!
//! 模型/基准测试的请求配置、运行状态以及基准测试结果。
//! `ServerSettings` 和 `BenchSettings` 是大而平坦的透传记录：
//! 每个字段一一对应下游二进制的一个命令行标志（见 `models::args`）。

use serde::{Deserialize, Serialize};

/// 模型服务配置（switch 请求体）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// 模型名称标识（唯一键）
    pub model_name: String,
    /// 模型文件路径（绝对路径或相对于模型目录）
    pub model_path: String,
    /// 是否允许通过驱逐其他模型来腾出显存
    #[serde(default)]
    pub force_vram: bool,
    /// llama-server 透传参数
    #[serde(default)]
    pub config: ServerSettings,
}

/// llama-server 透传参数
///
/// 字段分组与 llama-server --help 的参数分组一致。
/// 省略的字段取零值，构建 argv 时按"已设置且有意义"规则过滤。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    // 服务器配置
    pub host: String,
    pub port: i32,
    pub timeout: i32,

    // 系统资源配置
    pub threads: i32,
    pub threads_batch: i32,
    pub cpu_mask: String,
    pub cpu_range: String,
    pub cpu_strict: i32,
    pub priority: i32,
    pub poll: i32,

    // 模型参数
    pub ctx_size: i32,
    pub batch_size: i32,
    pub ubatch_size: i32,
    pub n_predict: i32,
    pub keep: i32,

    // GPU 相关配置
    pub n_gpu_layers: i32,
    pub split_mode: String,
    pub tensor_split: String,
    pub main_gpu: i32,
    pub device: String,

    // 内存管理
    pub mlock: bool,
    pub no_mmap: bool,
    pub numa: String,
    pub no_kv_offload: bool,

    // 缓存配置
    pub cache_type_k: String,
    pub cache_type_v: String,
    pub defrag_thold: f64,

    // 性能优化
    pub flash_attn: bool,
    #[serde(rename = "no_perf")]
    pub no_perf_timer: bool,

    // RoPE 配置
    pub rope_scaling: String,
    pub rope_scale: f64,
    pub rope_freq_base: f64,
    pub rope_freq_scale: f64,

    // YaRN 配置
    pub yarn_orig_ctx: i32,
    pub yarn_ext_factor: f64,
    pub yarn_attn_factor: f64,
    pub yarn_beta_slow: f64,
    pub yarn_beta_fast: f64,

    // 采样配置
    pub seed: i32,
    pub samplers: String,
    pub sampler_seq: String,
    pub ignore_eos: bool,
    pub temp: f64,
    pub top_k: i32,
    pub top_p: f64,
    pub min_p: f64,
    pub xtc_probability: f64,
    pub xtc_threshold: f64,
    pub typical: f64,
    pub repeat_last_n: i32,
    pub repeat_penalty: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub dry_multiplier: f64,
    pub dry_base: f64,
    pub dry_allowed_length: i32,
    pub dry_penalty_last_n: i32,
    pub dry_sequence_breaker: String,
    pub dynatemp_range: f64,
    pub dynatemp_exp: f64,
    pub mirostat: i32,
    pub mirostat_lr: f64,
    pub mirostat_ent: f64,

    // 语法约束
    pub grammar: String,
    pub grammar_file: String,
    pub json_schema: String,
    pub json_schema_file: String,

    // 服务器功能
    pub alias: String,
    pub parallel: i32,
    pub cont_batching: bool,
    pub no_cont_batching: bool,
    pub embedding: bool,
    pub reranking: bool,
    pub no_webui: bool,
    pub api_key: String,
    pub api_key_file: String,
    pub ssl_key: String,
    pub ssl_cert: String,
    pub threads_http: i32,
    pub cache_reuse: i32,
    pub metrics: bool,
    pub slots: bool,
    pub props: bool,
    pub no_slots: bool,
    pub slot_save_path: String,
    pub slot_prompt_similarity: f64,
    pub jinja: bool,
    pub reasoning_format: String,
    pub chat_template: String,
    pub chat_template_file: String,

    // 推测解码
    pub draft_max: i32,
    pub draft_min: i32,
    pub draft_p_min: f64,
    pub ctx_size_draft: i32,
    pub device_draft: String,
    pub n_gpu_layers_draft: i32,
    pub model_draft: String,

    // 适配器
    pub lora: String,
    pub lora_scaled: String,
    pub control_vector: String,
    pub control_vector_scaled: String,
    pub control_vector_layer_range: String,

    // 其他功能
    pub verbose: bool,
    pub log_file: String,
    pub static_path: String,
    pub no_context_shift: bool,
    pub no_warmup: bool,
    pub pooling: String,
}

/// 模型服务状态
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelStatus {
    /// 是否正在运行
    pub running: bool,
    /// 模型名称标识
    pub model_name: String,
    /// 当前运行的模型路径（解析后的绝对路径）
    pub model_path: String,
    /// 当前服务端口
    pub port: i32,
    /// 服务启动时间（RFC3339，未启动为空）
    #[serde(default)]
    pub start_time: String,
    /// 服务停止时间（RFC3339，未停止为空）
    #[serde(default)]
    pub stop_time: String,
    /// 进程 ID（无进程为 0）
    pub process_id: u32,
    /// 显存使用量（MB，准入时的声明值）
    pub vram_usage: u64,
}

/// 基准测试配置（benchmark 请求体）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// 模型文件路径
    pub model_path: String,
    /// llama-bench 透传参数
    #[serde(default)]
    pub config: BenchSettings,
}

/// llama-bench 透传参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchSettings {
    pub n_prompt: i32,
    pub n_gen: i32,
    /// 组合测试 "pp,tg"
    pub pg: String,
    pub n_depth: i32,
    pub batch_size: i32,
    pub ubatch_size: i32,
    pub cache_type_k: String,
    pub cache_type_v: String,
    pub threads: i32,
    pub cpu_mask: String,
    pub cpu_strict: i32,
    pub poll: i32,
    pub n_gpu_layers: i32,
    pub split_mode: String,
    pub main_gpu: i32,
    pub no_kv_offload: i32,
    pub flash_attn: i32,
    pub mmap: i32,
    pub numa: String,
    pub embeddings: i32,
    pub tensor_split: String,
    pub override_tensors: String,
    pub repetitions: i32,
    pub priority: i32,
    pub delay: i32,
    pub output: String,
    pub output_err: String,
    pub verbose: i32,
    pub progress: i32,
}

/// 基准测试任务状态机
///
/// pending → running → {completed | failed | cancelled}，终态不可再变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 基准测试任务状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkStatus {
    /// 任务 ID
    pub task_id: String,
    /// 任务状态
    pub status: TaskState,
    /// 进度（0-100）
    pub progress: f64,
    /// 开始时间
    pub start_time: String,
    /// 结束时间（未结束为空）
    #[serde(default)]
    pub end_time: String,
    /// 所有测试结果
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_results: Option<Vec<BenchmarkResult>>,
    /// 失败原因（stderr 摘要或解析错误）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 基准测试结果（对应输出表格的一行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub model: String,
    pub size: String,
    pub params: String,
    pub backend: String,
    pub gpu_layers: i32,
    pub mmap: bool,
    pub test_type: String,
    pub tokens_per_second: f64,
    /// 性能波动（± 后的数值）
    pub variation: f64,
    pub total_tokens: i64,
    /// 总耗时（秒）
    pub total_time: f64,
    /// 使用的内存（字节）
    pub memory_used: i64,
}

/// 模型目录中的一个 GGUF 文件
#[derive(Debug, Clone, Serialize)]
pub struct ModelFile {
    pub name: String,
    pub path: String,
    pub size: u64,
}
