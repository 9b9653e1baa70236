//! Batch execution: task lifecycle, sequential runner, background worker.

pub mod background;
pub mod runner;
pub mod task;

pub use background::{spawn_batch, BatchHandle, BatchOutcome};
pub use runner::{BatchConfig, BatchEvent, BatchRunner, BatchSummary, CancellationToken};
pub use task::{DescriptionTask, SkipReason, TaskState};
