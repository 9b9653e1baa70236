//! The media pipeline: discovery, media collaborators, status log,
//! orchestrator, report.

pub mod discover;
pub mod error;
pub mod media;
pub mod orchestrator;
pub mod report;
pub mod stage;
pub mod status_log;

pub use error::WorkflowError;
pub use orchestrator::{
    PipelineOrchestrator, RunRequest, StageRecord, WorkflowRun, WORKSPACE_FILE_NAME,
};
pub use stage::{Stage, StageStatus, StepSet};
