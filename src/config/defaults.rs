// 默认配置常量

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

pub const DEFAULT_SERVER_BIN: &str = "llama-server";
pub const DEFAULT_BENCH_BIN: &str = "llama-bench";
pub const DEFAULT_MODELS_DIR: &str = "./models";

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "compact";
