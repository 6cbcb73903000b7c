pub mod artifacts;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod observability;
pub mod options;
pub mod pipeline;
pub mod stages;
pub mod supervisor;

pub use config::ToolPaths;
pub use error::{ErrorCode, WhoopError};
pub use options::PipelineConfig;
pub use pipeline::{PipelineController, RunSummary};
pub use supervisor::{ProcessSupervisor, ToolRunner};
