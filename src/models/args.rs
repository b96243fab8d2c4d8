//! 命令行参数构建
//!
//! 两个纯函数，把校验后的配置记录变换为下游二进制的 argv。
//! 字段只有在"已设置且有意义"时才产生标志：非空字符串、严格为正的
//! 数量、可为零的索引取非负、为 true 的布尔、严格为正的浮点数。
//! 每个字段一行，由统一的 push 辅助函数驱动，浮点统一格式化为两位小数。

use crate::models::types::{BenchmarkConfig, ModelConfig};

/// 非空字符串 -> `--flag value`
fn push_str(args: &mut Vec<String>, flag: &str, value: &str) {
    if !value.is_empty() {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// 严格为正的整数 -> `--flag N`
fn push_pos(args: &mut Vec<String>, flag: &str, value: i32) {
    if value > 0 {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// 非负整数（零有意义的索引/级别） -> `--flag N`
fn push_nonneg(args: &mut Vec<String>, flag: &str, value: i32) {
    if value >= 0 {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// 非零整数（-1 等哨兵值有意义） -> `--flag N`
fn push_nonzero(args: &mut Vec<String>, flag: &str, value: i32) {
    if value != 0 {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

/// 为 true 的布尔 -> 裸 `--flag`
fn push_flag(args: &mut Vec<String>, flag: &str, value: bool) {
    if value {
        args.push(flag.to_string());
    }
}

/// 严格为正的浮点 -> `--flag N.NN`
fn push_posf(args: &mut Vec<String>, flag: &str, value: f64) {
    if value > 0.0 {
        args.push(flag.to_string());
        args.push(format!("{:.2}", value));
    }
}

/// 非负浮点 -> `--flag N.NN`
fn push_nonnegf(args: &mut Vec<String>, flag: &str, value: f64) {
    if value >= 0.0 {
        args.push(flag.to_string());
        args.push(format!("{:.2}", value));
    }
}

/// 构建 llama-server 的 argv
///
/// `model_path` 是已解析的绝对路径，永远作为第一个参数对出现。
pub fn build_server_args(cfg: &ModelConfig, model_path: &str) -> Vec<String> {
    let mut args = vec!["--model".to_string(), model_path.to_string()];
    let c = &cfg.config;

    // 服务器配置
    push_str(&mut args, "--host", &c.host);
    push_pos(&mut args, "--port", c.port);
    push_pos(&mut args, "--timeout", c.timeout);

    // 系统资源配置
    push_pos(&mut args, "--threads", c.threads);
    push_pos(&mut args, "--threads-batch", c.threads_batch);
    push_str(&mut args, "--cpu-mask", &c.cpu_mask);
    push_str(&mut args, "--cpu-range", &c.cpu_range);
    push_pos(&mut args, "--cpu-strict", c.cpu_strict);
    push_pos(&mut args, "--prio", c.priority);
    push_nonneg(&mut args, "--poll", c.poll);

    // 模型参数
    push_pos(&mut args, "--ctx-size", c.ctx_size);
    push_pos(&mut args, "--batch-size", c.batch_size);
    push_pos(&mut args, "--ubatch-size", c.ubatch_size);
    push_nonzero(&mut args, "--n-predict", c.n_predict);
    push_nonzero(&mut args, "--keep", c.keep);

    // GPU 相关配置
    push_pos(&mut args, "--n-gpu-layers", c.n_gpu_layers);
    push_str(&mut args, "--split-mode", &c.split_mode);
    push_str(&mut args, "--tensor-split", &c.tensor_split);
    push_nonneg(&mut args, "--main-gpu", c.main_gpu);
    push_str(&mut args, "--device", &c.device);

    // 内存管理
    push_flag(&mut args, "--mlock", c.mlock);
    push_flag(&mut args, "--no-mmap", c.no_mmap);
    push_str(&mut args, "--numa", &c.numa);
    push_flag(&mut args, "--no-kv-offload", c.no_kv_offload);

    // 缓存配置
    push_str(&mut args, "--cache-type-k", &c.cache_type_k);
    push_str(&mut args, "--cache-type-v", &c.cache_type_v);
    push_posf(&mut args, "--defrag-thold", c.defrag_thold);

    // 性能优化
    push_flag(&mut args, "--flash-attn", c.flash_attn);
    push_flag(&mut args, "--no-perf", c.no_perf_timer);

    // RoPE 配置
    push_str(&mut args, "--rope-scaling", &c.rope_scaling);
    push_posf(&mut args, "--rope-scale", c.rope_scale);
    push_posf(&mut args, "--rope-freq-base", c.rope_freq_base);
    push_posf(&mut args, "--rope-freq-scale", c.rope_freq_scale);

    // YaRN 配置
    push_pos(&mut args, "--yarn-orig-ctx", c.yarn_orig_ctx);
    push_nonnegf(&mut args, "--yarn-ext-factor", c.yarn_ext_factor);
    push_posf(&mut args, "--yarn-attn-factor", c.yarn_attn_factor);
    push_posf(&mut args, "--yarn-beta-slow", c.yarn_beta_slow);
    push_posf(&mut args, "--yarn-beta-fast", c.yarn_beta_fast);

    // 采样配置
    push_str(&mut args, "--samplers", &c.samplers);
    push_pos(&mut args, "--seed", c.seed);
    push_str(&mut args, "--sampler-seq", &c.sampler_seq);
    push_flag(&mut args, "--ignore-eos", c.ignore_eos);
    push_posf(&mut args, "--temp", c.temp);
    push_pos(&mut args, "--top-k", c.top_k);
    push_posf(&mut args, "--top-p", c.top_p);
    push_posf(&mut args, "--min-p", c.min_p);
    push_posf(&mut args, "--xtc-probability", c.xtc_probability);
    push_posf(&mut args, "--xtc-threshold", c.xtc_threshold);
    push_posf(&mut args, "--typical", c.typical);
    push_pos(&mut args, "--repeat-last-n", c.repeat_last_n);
    push_posf(&mut args, "--repeat-penalty", c.repeat_penalty);
    push_posf(&mut args, "--presence-penalty", c.presence_penalty);
    push_posf(&mut args, "--frequency-penalty", c.frequency_penalty);
    push_posf(&mut args, "--dry-multiplier", c.dry_multiplier);
    push_posf(&mut args, "--dry-base", c.dry_base);
    push_pos(&mut args, "--dry-allowed-length", c.dry_allowed_length);
    push_pos(&mut args, "--dry-penalty-last-n", c.dry_penalty_last_n);
    push_str(&mut args, "--dry-sequence-breaker", &c.dry_sequence_breaker);
    push_posf(&mut args, "--dynatemp-range", c.dynatemp_range);
    push_posf(&mut args, "--dynatemp-exp", c.dynatemp_exp);
    push_pos(&mut args, "--mirostat", c.mirostat);
    push_posf(&mut args, "--mirostat-lr", c.mirostat_lr);
    push_posf(&mut args, "--mirostat-ent", c.mirostat_ent);

    // 语法约束
    push_str(&mut args, "--grammar", &c.grammar);
    push_str(&mut args, "--grammar-file", &c.grammar_file);
    push_str(&mut args, "--json-schema", &c.json_schema);
    push_str(&mut args, "--json-schema-file", &c.json_schema_file);

    // 服务器功能
    push_str(&mut args, "--alias", &c.alias);
    push_pos(&mut args, "--parallel", c.parallel);
    push_flag(&mut args, "--cont-batching", c.cont_batching);
    push_flag(&mut args, "--no-cont-batching", c.no_cont_batching);
    push_flag(&mut args, "--embedding", c.embedding);
    push_flag(&mut args, "--reranking", c.reranking);
    push_flag(&mut args, "--no-webui", c.no_webui);
    push_str(&mut args, "--api-key", &c.api_key);
    push_str(&mut args, "--api-key-file", &c.api_key_file);
    push_str(&mut args, "--ssl-key-file", &c.ssl_key);
    push_str(&mut args, "--ssl-cert-file", &c.ssl_cert);
    push_pos(&mut args, "--threads-http", c.threads_http);
    push_pos(&mut args, "--cache-reuse", c.cache_reuse);
    push_flag(&mut args, "--metrics", c.metrics);
    push_flag(&mut args, "--slots", c.slots);
    push_flag(&mut args, "--props", c.props);
    push_flag(&mut args, "--no-slots", c.no_slots);
    push_str(&mut args, "--slot-save-path", &c.slot_save_path);
    push_posf(&mut args, "--slot-prompt-similarity", c.slot_prompt_similarity);
    push_flag(&mut args, "--jinja", c.jinja);
    push_str(&mut args, "--reasoning-format", &c.reasoning_format);
    push_str(&mut args, "--chat-template", &c.chat_template);
    push_str(&mut args, "--chat-template-file", &c.chat_template_file);

    // 推测解码
    push_pos(&mut args, "--draft-max", c.draft_max);
    push_pos(&mut args, "--draft-min", c.draft_min);
    push_posf(&mut args, "--draft-p-min", c.draft_p_min);
    push_pos(&mut args, "--ctx-size-draft", c.ctx_size_draft);
    push_str(&mut args, "--device-draft", &c.device_draft);
    push_pos(&mut args, "--n-gpu-layers-draft", c.n_gpu_layers_draft);
    push_str(&mut args, "--model-draft", &c.model_draft);

    // 适配器
    push_str(&mut args, "--lora", &c.lora);
    push_str(&mut args, "--lora-scaled", &c.lora_scaled);
    push_str(&mut args, "--control-vector", &c.control_vector);
    push_str(&mut args, "--control-vector-scaled", &c.control_vector_scaled);
    push_str(
        &mut args,
        "--control-vector-layer-range",
        &c.control_vector_layer_range,
    );

    // 其他功能
    push_flag(&mut args, "--verbose", c.verbose);
    push_str(&mut args, "--log-file", &c.log_file);
    push_str(&mut args, "--path", &c.static_path);
    push_flag(&mut args, "--no-context-shift", c.no_context_shift);
    push_flag(&mut args, "--no-warmup", c.no_warmup);
    push_str(&mut args, "--pooling", &c.pooling);

    args
}

/// 构建 llama-bench 的 argv
pub fn build_bench_args(cfg: &BenchmarkConfig, model_path: &str) -> Vec<String> {
    let mut args = vec!["--model".to_string(), model_path.to_string()];
    let c = &cfg.config;

    push_pos(&mut args, "--n-prompt", c.n_prompt);
    push_pos(&mut args, "--n-gen", c.n_gen);
    push_str(&mut args, "--pg", &c.pg);
    push_pos(&mut args, "--n-depth", c.n_depth);
    push_pos(&mut args, "--batch-size", c.batch_size);
    push_pos(&mut args, "--ubatch-size", c.ubatch_size);
    push_str(&mut args, "--cache-type-k", &c.cache_type_k);
    push_str(&mut args, "--cache-type-v", &c.cache_type_v);
    push_pos(&mut args, "--threads", c.threads);
    push_str(&mut args, "--cpu-mask", &c.cpu_mask);
    push_pos(&mut args, "--cpu-strict", c.cpu_strict);
    push_pos(&mut args, "--poll", c.poll);
    push_pos(&mut args, "--n-gpu-layers", c.n_gpu_layers);
    push_str(&mut args, "--split-mode", &c.split_mode);
    push_nonneg(&mut args, "--main-gpu", c.main_gpu);
    push_pos(&mut args, "--no-kv-offload", c.no_kv_offload);
    push_pos(&mut args, "--flash-attn", c.flash_attn);
    push_nonneg(&mut args, "--mmap", c.mmap);
    push_str(&mut args, "--numa", &c.numa);
    push_pos(&mut args, "--embeddings", c.embeddings);
    push_str(&mut args, "--tensor-split", &c.tensor_split);
    push_str(&mut args, "--override-tensors", &c.override_tensors);
    push_pos(&mut args, "--repetitions", c.repetitions);
    push_pos(&mut args, "--prio", c.priority);
    push_pos(&mut args, "--delay", c.delay);
    push_str(&mut args, "--output", &c.output);
    push_str(&mut args, "--output-err", &c.output_err);
    push_flag(&mut args, "--verbose", c.verbose > 0);
    push_flag(&mut args, "--progress", c.progress > 0);

    args
}
