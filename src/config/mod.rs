pub mod defaults;
pub mod loader;
pub mod settings;

pub use settings::{Config, LlamaPathConfig, LoggingConfig, ServerConfig};
