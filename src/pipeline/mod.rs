//! Analysis orchestration, worker pool and batch pipeline

pub mod analyzer;
pub mod orchestrator;
pub mod pool;

pub use analyzer::{AnalysisOptions, Analyzer};
pub use orchestrator::{run, PipelineResult};
pub use pool::{Admission, AnalysisPool, PoolConfig, Ticket};
