//! Workflow-level error types.

use thiserror::Error;

use super::stage::Stage;
use crate::workspace::WorkspaceError;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Input root not found or not a directory: {}", .0.display())]
    RootNotFound(std::path::PathBuf),

    #[error("Invalid steps '{0}': {1}")]
    InvalidSteps(String, String),

    #[error("Unknown prompt style: {0}")]
    InvalidPromptStyle(String),

    #[error("No model specified and no default configured")]
    MissingModel,

    #[error("Required tool not found on PATH: {0}")]
    ToolMissing(String),

    #[error("{tool} failed on {path}: {detail}")]
    ToolFailed {
        tool: String,
        path: String,
        detail: String,
    },

    #[error("Stage {stage} failed: {detail}")]
    StageFailed { stage: Stage, detail: String },

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report rendering failed: {0}")]
    Report(String),
}
