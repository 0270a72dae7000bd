pub mod orchestrator;

pub use orchestrator::{Orchestrator, PipelineState, Session};
