//! Analysis jobs: background processing, progress, and durable results.

pub mod orchestrator;
pub mod pipeline;
pub mod store;

pub use orchestrator::Orchestrator;
pub use pipeline::AnalysisSettings;
pub use store::FileJobStore;
