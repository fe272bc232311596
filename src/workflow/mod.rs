pub mod classify;
pub mod naming;
pub mod pipeline;
pub mod plan;
pub mod post_check;
pub mod progress;
pub mod types;

pub use pipeline::{Orchestrator, PipelineDeps, RunReport};
