pub mod args;
pub mod types;
pub mod validate;

// Re-export commonly used types
pub use types::{
    BenchSettings, BenchmarkConfig, BenchmarkResult, BenchmarkStatus, ModelConfig, ModelFile,
    ModelStatus, ServerSettings, TaskState,
};
