//! 配置校验
//!
//! 在构建 argv 之前执行。数值范围、枚举集合与跨字段约束都在这里拒绝，
//! 校验失败不改变任何状态。不为畸形字段猜测默认值。

use crate::api::error::ValidationError;
use crate::models::types::{BenchmarkConfig, ModelConfig};
use std::path::Path;

/// K/V 缓存支持的量化类型
const VALID_CACHE_TYPES: &[&str] = &[
    "f32", "f16", "bf16", "q8_0", "q4_0", "q4_1", "iq4_nl", "q5_0", "q5_1",
];

/// llama-bench 支持的输出格式
const VALID_OUTPUT_FORMATS: &[&str] = &["csv", "json", "jsonl", "md", "sql"];

type ValidateResult = std::result::Result<(), ValidationError>;

fn fail(msg: String) -> ValidateResult {
    Err(ValidationError(msg))
}

/// 校验模型配置
pub fn validate_model_config(cfg: &ModelConfig) -> ValidateResult {
    if cfg.model_path.is_empty() {
        return fail("model path is required".into());
    }

    let c = &cfg.config;

    // 跨字段约束：强制显存要求必须至少卸载一层到 GPU
    if cfg.force_vram && c.n_gpu_layers <= 0 {
        return fail("force_vram requires n_gpu_layers > 0".into());
    }
    // SSL 密钥与证书必须成对出现
    if c.ssl_key.is_empty() != c.ssl_cert.is_empty() {
        return fail("ssl_key and ssl_cert must be provided together".into());
    }

    // 服务器配置
    if c.port < 0 || c.port > 65535 {
        return fail(format!("invalid port number: {}", c.port));
    }
    if c.timeout < 0 {
        return fail(format!("invalid timeout value: {}", c.timeout));
    }

    // 系统资源配置
    if c.threads < -1 {
        return fail(format!("invalid threads number: {}", c.threads));
    }
    if c.threads_batch < -1 {
        return fail(format!("invalid threads batch number: {}", c.threads_batch));
    }
    if c.priority < 0 || c.priority > 3 {
        return fail(format!(
            "invalid priority value: {} (should be between 0 and 3)",
            c.priority
        ));
    }
    if c.poll < 0 || c.poll > 100 {
        return fail(format!(
            "invalid poll value: {} (should be between 0 and 100)",
            c.poll
        ));
    }

    // 模型参数
    if c.ctx_size < 0 {
        return fail(format!("invalid context size: {}", c.ctx_size));
    }
    if c.batch_size < 0 {
        return fail(format!("invalid batch size: {}", c.batch_size));
    }
    if c.ubatch_size < 0 {
        return fail(format!("invalid micro batch size: {}", c.ubatch_size));
    }
    if c.n_predict < -1 {
        return fail(format!("invalid n-predict value: {}", c.n_predict));
    }

    // GPU 配置
    if c.n_gpu_layers < 0 {
        return fail(format!("invalid number of GPU layers: {}", c.n_gpu_layers));
    }
    if !c.split_mode.is_empty() && !matches!(c.split_mode.as_str(), "none" | "layer" | "row") {
        return fail(format!(
            "invalid split mode: {} (should be none, layer, or row)",
            c.split_mode
        ));
    }
    if c.main_gpu < 0 {
        return fail(format!("invalid main GPU index: {}", c.main_gpu));
    }

    // NUMA 策略
    if !c.numa.is_empty() && !matches!(c.numa.as_str(), "distribute" | "isolate" | "numactl") {
        return fail(format!(
            "invalid NUMA value: {} (should be distribute, isolate, or numactl)",
            c.numa
        ));
    }

    // 缓存配置
    if !c.cache_type_k.is_empty() && !VALID_CACHE_TYPES.contains(&c.cache_type_k.as_str()) {
        return fail(format!("invalid cache type K: {}", c.cache_type_k));
    }
    if !c.cache_type_v.is_empty() && !VALID_CACHE_TYPES.contains(&c.cache_type_v.as_str()) {
        return fail(format!("invalid cache type V: {}", c.cache_type_v));
    }
    if c.defrag_thold < 0.0 || c.defrag_thold > 1.0 {
        return fail(format!(
            "invalid defrag threshold: {:.2} (should be between 0 and 1)",
            c.defrag_thold
        ));
    }

    // RoPE 配置
    if !c.rope_scaling.is_empty() && !matches!(c.rope_scaling.as_str(), "none" | "linear" | "yarn")
    {
        return fail(format!(
            "invalid RoPE scaling: {} (should be none, linear, or yarn)",
            c.rope_scaling
        ));
    }
    if c.rope_scale < 0.0 {
        return fail(format!("invalid RoPE scale: {:.2}", c.rope_scale));
    }
    if c.rope_freq_base < 0.0 {
        return fail(format!("invalid RoPE frequency base: {:.2}", c.rope_freq_base));
    }
    if c.rope_freq_scale < 0.0 {
        return fail(format!(
            "invalid RoPE frequency scale: {:.2}",
            c.rope_freq_scale
        ));
    }

    // YaRN 配置
    if c.yarn_orig_ctx < 0 {
        return fail(format!(
            "invalid YaRN original context size: {}",
            c.yarn_orig_ctx
        ));
    }
    if c.yarn_ext_factor < -1.0 {
        return fail(format!(
            "invalid YaRN extrapolation factor: {:.2}",
            c.yarn_ext_factor
        ));
    }
    if c.yarn_attn_factor < 0.0 {
        return fail(format!(
            "invalid YaRN attention factor: {:.2}",
            c.yarn_attn_factor
        ));
    }
    if c.yarn_beta_slow < 0.0 {
        return fail(format!("invalid YaRN beta slow: {:.2}", c.yarn_beta_slow));
    }
    if c.yarn_beta_fast < 0.0 {
        return fail(format!("invalid YaRN beta fast: {:.2}", c.yarn_beta_fast));
    }

    // 采样配置
    if c.temp < 0.0 {
        return fail(format!("invalid temperature value: {:.2}", c.temp));
    }
    if c.top_k < 0 {
        return fail(format!("invalid top-k value: {}", c.top_k));
    }
    if c.top_p < 0.0 || c.top_p > 1.0 {
        return fail(format!(
            "invalid top-p value: {:.2} (should be between 0 and 1)",
            c.top_p
        ));
    }
    if c.min_p < 0.0 || c.min_p > 1.0 {
        return fail(format!(
            "invalid min-p value: {:.2} (should be between 0 and 1)",
            c.min_p
        ));
    }
    if c.xtc_probability < 0.0 || c.xtc_probability > 1.0 {
        return fail(format!(
            "invalid xtc probability: {:.2} (should be between 0 and 1)",
            c.xtc_probability
        ));
    }
    if c.xtc_threshold < 0.0 {
        return fail(format!("invalid xtc threshold: {:.2}", c.xtc_threshold));
    }
    if c.typical < 0.0 || c.typical > 1.0 {
        return fail(format!(
            "invalid typical value: {:.2} (should be between 0 and 1)",
            c.typical
        ));
    }
    if c.repeat_last_n < 0 {
        return fail(format!("invalid repeat last n value: {}", c.repeat_last_n));
    }
    if c.repeat_penalty < 0.0 {
        return fail(format!("invalid repeat penalty: {:.2}", c.repeat_penalty));
    }
    if c.presence_penalty < 0.0 {
        return fail(format!("invalid presence penalty: {:.2}", c.presence_penalty));
    }
    if c.frequency_penalty < 0.0 {
        return fail(format!(
            "invalid frequency penalty: {:.2}",
            c.frequency_penalty
        ));
    }
    if c.dry_multiplier < 0.0 {
        return fail(format!("invalid dry multiplier: {:.2}", c.dry_multiplier));
    }
    if c.dry_base < 0.0 {
        return fail(format!("invalid dry base: {:.2}", c.dry_base));
    }
    if c.dry_allowed_length < 0 {
        return fail(format!("invalid dry allowed length: {}", c.dry_allowed_length));
    }
    if c.dry_penalty_last_n < 0 {
        return fail(format!("invalid dry penalty last n: {}", c.dry_penalty_last_n));
    }
    if c.dynatemp_range < 0.0 {
        return fail(format!("invalid dynatemp range: {:.2}", c.dynatemp_range));
    }
    if c.dynatemp_exp < 0.0 {
        return fail(format!("invalid dynatemp exp: {:.2}", c.dynatemp_exp));
    }
    if c.mirostat < 0 || c.mirostat > 2 {
        return fail(format!(
            "invalid mirostat value: {} (should be 0, 1 or 2)",
            c.mirostat
        ));
    }
    if c.mirostat_lr < 0.0 {
        return fail(format!("invalid mirostat learning rate: {:.2}", c.mirostat_lr));
    }
    if c.mirostat_ent < 0.0 {
        return fail(format!("invalid mirostat entropy: {:.2}", c.mirostat_ent));
    }

    // 服务器功能
    if c.parallel < 0 {
        return fail(format!("invalid parallel value: {}", c.parallel));
    }
    if c.threads_http < 0 {
        return fail(format!("invalid http threads: {}", c.threads_http));
    }
    if c.cache_reuse < 0 {
        return fail(format!("invalid cache reuse value: {}", c.cache_reuse));
    }
    if c.slot_prompt_similarity < 0.0 || c.slot_prompt_similarity > 1.0 {
        return fail(format!(
            "invalid slot prompt similarity: {:.2} (should be between 0 and 1)",
            c.slot_prompt_similarity
        ));
    }

    // 推测解码
    if c.draft_max < 0 {
        return fail(format!("invalid draft max: {}", c.draft_max));
    }
    if c.draft_min < 0 {
        return fail(format!("invalid draft min: {}", c.draft_min));
    }
    if c.draft_p_min < 0.0 || c.draft_p_min > 1.0 {
        return fail(format!(
            "invalid draft p min: {:.2} (should be between 0 and 1)",
            c.draft_p_min
        ));
    }
    if c.ctx_size_draft < 0 {
        return fail(format!("invalid draft context size: {}", c.ctx_size_draft));
    }
    if c.n_gpu_layers_draft < 0 {
        return fail(format!("invalid draft GPU layers: {}", c.n_gpu_layers_draft));
    }

    // 文件路径参数必须是绝对路径
    check_abs_path("lora adapter", &c.lora)?;
    check_abs_path("scaled lora adapter", &c.lora_scaled)?;
    check_abs_path("control vector", &c.control_vector)?;
    check_abs_path("scaled control vector", &c.control_vector_scaled)?;
    check_abs_path("grammar file", &c.grammar_file)?;
    check_abs_path("JSON schema file", &c.json_schema_file)?;
    check_abs_path("API key file", &c.api_key_file)?;
    check_abs_path("slot save", &c.slot_save_path)?;
    check_abs_path("chat template file", &c.chat_template_file)?;
    check_abs_path("draft model", &c.model_draft)?;

    Ok(())
}

fn check_abs_path(what: &str, path: &str) -> ValidateResult {
    if !path.is_empty() && !Path::new(path).is_absolute() {
        return fail(format!("{} path must be absolute: {}", what, path));
    }
    Ok(())
}

/// 校验基准测试配置
pub fn validate_bench_config(cfg: &BenchmarkConfig) -> ValidateResult {
    if cfg.model_path.is_empty() {
        return fail("model path is required".into());
    }

    let c = &cfg.config;

    if c.threads < 0 {
        return fail(format!("invalid threads number: {}", c.threads));
    }
    if c.n_prompt < 0 {
        return fail(format!("invalid n-prompt value: {}", c.n_prompt));
    }
    if c.n_gen < 0 {
        return fail(format!("invalid n-gen value: {}", c.n_gen));
    }
    if c.n_depth < 0 {
        return fail(format!("invalid n-depth value: {}", c.n_depth));
    }
    if c.batch_size < 0 {
        return fail(format!("invalid batch-size value: {}", c.batch_size));
    }
    if c.ubatch_size < 0 {
        return fail(format!("invalid ubatch-size value: {}", c.ubatch_size));
    }
    if c.n_gpu_layers < 0 {
        return fail(format!("invalid number of GPU layers: {}", c.n_gpu_layers));
    }
    if c.main_gpu < 0 {
        return fail(format!("invalid main GPU index: {}", c.main_gpu));
    }
    if c.repetitions < 0 {
        return fail(format!("invalid repetitions value: {}", c.repetitions));
    }

    // 枚举值
    if !c.cache_type_k.is_empty() && !VALID_CACHE_TYPES.contains(&c.cache_type_k.as_str()) {
        return fail(format!("invalid cache-type-k value: {}", c.cache_type_k));
    }
    if !c.cache_type_v.is_empty() && !VALID_CACHE_TYPES.contains(&c.cache_type_v.as_str()) {
        return fail(format!("invalid cache-type-v value: {}", c.cache_type_v));
    }
    if !c.split_mode.is_empty() && !matches!(c.split_mode.as_str(), "none" | "layer" | "row") {
        return fail(format!("invalid split-mode value: {}", c.split_mode));
    }
    if !c.numa.is_empty() && !matches!(c.numa.as_str(), "distribute" | "isolate" | "numactl") {
        return fail(format!("invalid numa value: {}", c.numa));
    }

    // 范围值
    if c.poll < 0 || c.poll > 100 {
        return fail(format!(
            "invalid poll value: {} (should be between 0 and 100)",
            c.poll
        ));
    }
    if c.priority < 0 || c.priority > 3 {
        return fail(format!(
            "invalid priority value: {} (should be between 0 and 3)",
            c.priority
        ));
    }
    if c.delay < 0 {
        return fail(format!("invalid delay value: {} (should be >= 0)", c.delay));
    }

    // 二进制标志只接受 0/1
    check_binary_flag("cpu-strict", c.cpu_strict)?;
    check_binary_flag("no-kv-offload", c.no_kv_offload)?;
    check_binary_flag("flash-attn", c.flash_attn)?;
    check_binary_flag("mmap", c.mmap)?;
    check_binary_flag("embeddings", c.embeddings)?;

    // 组合测试格式 "pp,tg"
    if !c.pg.is_empty() {
        let parts: Vec<&str> = c.pg.split(',').collect();
        if parts.len() != 2 {
            return fail(format!("invalid pg format: {} (should be 'pp,tg')", c.pg));
        }
        for part in &parts {
            if part.trim().parse::<i64>().is_err() {
                return fail(format!("invalid pg value: {} (should be integers)", c.pg));
            }
        }
    }

    // 张量覆盖格式 "<pattern>=<buffer type>;..."
    if !c.override_tensors.is_empty() {
        for tensor in c.override_tensors.split(';') {
            if !tensor.contains('=') {
                return fail(format!(
                    "invalid override tensors format: {} (should be '<tensor name pattern>=<buffer type>;...')",
                    c.override_tensors
                ));
            }
        }
    }

    // 输出格式
    if !c.output.is_empty() && !VALID_OUTPUT_FORMATS.contains(&c.output.as_str()) {
        return fail(format!("invalid output format: {}", c.output));
    }
    if !c.output_err.is_empty()
        && c.output_err != "none"
        && !VALID_OUTPUT_FORMATS.contains(&c.output_err.as_str())
    {
        return fail(format!("invalid output-err format: {}", c.output_err));
    }

    Ok(())
}

fn check_binary_flag(name: &str, value: i32) -> ValidateResult {
    if value != 0 && value != 1 {
        return fail(format!(
            "invalid {} value: {} (should be 0 or 1)",
            name, value
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::types::{BenchSettings, ServerSettings};

    fn model_config() -> ModelConfig {
        ModelConfig {
            model_name: "test".to_string(),
            model_path: "test.gguf".to_string(),
            force_vram: false,
            config: ServerSettings::default(),
        }
    }

    fn bench_config() -> BenchmarkConfig {
        BenchmarkConfig {
            model_path: "test.gguf".to_string(),
            config: BenchSettings::default(),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_model_config(&model_config()).is_ok());
        assert!(validate_bench_config(&bench_config()).is_ok());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let cfg = model_config();
        assert!(validate_model_config(&cfg).is_ok());
        assert!(validate_model_config(&cfg).is_ok());

        let mut bad = model_config();
        bad.config.port = 70000;
        let first = validate_model_config(&bad).unwrap_err().to_string();
        let second = validate_model_config(&bad).unwrap_err().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_model_path_rejected() {
        let mut cfg = model_config();
        cfg.model_path = String::new();
        assert!(validate_model_config(&cfg).is_err());
    }

    #[test]
    fn test_force_vram_requires_gpu_layers() {
        let mut cfg = model_config();
        cfg.force_vram = true;
        cfg.config.n_gpu_layers = 0;
        assert!(validate_model_config(&cfg).is_err());

        cfg.config.n_gpu_layers = 20;
        assert!(validate_model_config(&cfg).is_ok());
    }

    #[test]
    fn test_ssl_key_and_cert_pairing() {
        let mut cfg = model_config();
        cfg.config.ssl_key = "/certs/key.pem".to_string();
        assert!(validate_model_config(&cfg).is_err());

        cfg.config.ssl_cert = "/certs/cert.pem".to_string();
        assert!(validate_model_config(&cfg).is_ok());
    }

    #[test]
    fn test_port_range() {
        let mut cfg = model_config();
        cfg.config.port = 65536;
        assert!(validate_model_config(&cfg).is_err());
        cfg.config.port = -1;
        assert!(validate_model_config(&cfg).is_err());
        cfg.config.port = 65535;
        assert!(validate_model_config(&cfg).is_ok());
    }

    #[test]
    fn test_enum_fields() {
        let mut cfg = model_config();
        cfg.config.split_mode = "diagonal".to_string();
        assert!(validate_model_config(&cfg).is_err());

        let mut cfg = model_config();
        cfg.config.numa = "spread".to_string();
        assert!(validate_model_config(&cfg).is_err());

        let mut cfg = model_config();
        cfg.config.cache_type_k = "q3_k".to_string();
        assert!(validate_model_config(&cfg).is_err());

        let mut cfg = model_config();
        cfg.config.rope_scaling = "quadratic".to_string();
        assert!(validate_model_config(&cfg).is_err());

        let mut cfg = model_config();
        cfg.config.cache_type_k = "q8_0".to_string();
        cfg.config.rope_scaling = "yarn".to_string();
        cfg.config.split_mode = "layer".to_string();
        cfg.config.numa = "isolate".to_string();
        assert!(validate_model_config(&cfg).is_ok());
    }

    #[test]
    fn test_probability_ranges() {
        let mut cfg = model_config();
        cfg.config.top_p = 1.5;
        assert!(validate_model_config(&cfg).is_err());

        let mut cfg = model_config();
        cfg.config.defrag_thold = -0.1;
        assert!(validate_model_config(&cfg).is_err());

        let mut cfg = model_config();
        cfg.config.mirostat = 3;
        assert!(validate_model_config(&cfg).is_err());
    }

    #[test]
    fn test_threads_allows_minus_one() {
        let mut cfg = model_config();
        cfg.config.threads = -1;
        assert!(validate_model_config(&cfg).is_ok());
        cfg.config.threads = -2;
        assert!(validate_model_config(&cfg).is_err());
    }

    #[test]
    fn test_relative_adapter_path_rejected() {
        let mut cfg = model_config();
        cfg.config.lora = "adapters/lora.bin".to_string();
        assert!(validate_model_config(&cfg).is_err());
        cfg.config.lora = "/adapters/lora.bin".to_string();
        assert!(validate_model_config(&cfg).is_ok());
    }

    #[test]
    fn test_bench_binary_flags() {
        let mut cfg = bench_config();
        cfg.config.flash_attn = 2;
        assert!(validate_bench_config(&cfg).is_err());
        cfg.config.flash_attn = 1;
        assert!(validate_bench_config(&cfg).is_ok());
    }

    #[test]
    fn test_bench_output_format() {
        let mut cfg = bench_config();
        cfg.config.output = "xml".to_string();
        assert!(validate_bench_config(&cfg).is_err());
        cfg.config.output = "jsonl".to_string();
        assert!(validate_bench_config(&cfg).is_ok());

        let mut cfg = bench_config();
        cfg.config.output_err = "none".to_string();
        assert!(validate_bench_config(&cfg).is_ok());
    }

    #[test]
    fn test_bench_pg_format() {
        let mut cfg = bench_config();
        cfg.config.pg = "512".to_string();
        assert!(validate_bench_config(&cfg).is_err());
        cfg.config.pg = "512,tg".to_string();
        assert!(validate_bench_config(&cfg).is_err());
        cfg.config.pg = "512,128".to_string();
        assert!(validate_bench_config(&cfg).is_ok());
    }

    #[test]
    fn test_bench_override_tensors() {
        let mut cfg = bench_config();
        cfg.config.override_tensors = "blk.*".to_string();
        assert!(validate_bench_config(&cfg).is_err());
        cfg.config.override_tensors = "blk.*=CUDA0;output=CPU".to_string();
        assert!(validate_bench_config(&cfg).is_ok());
    }
}
