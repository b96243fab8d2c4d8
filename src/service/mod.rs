pub mod benchmark;
pub mod gpu;
pub mod model_service;
pub mod parser;
pub mod process;

pub use benchmark::BenchmarkService;
pub use gpu::{NvidiaSmi, VramProbe};
pub use model_service::ModelService;
pub use process::ProcessRunner;
