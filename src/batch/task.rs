//! The unit of work: one item, one provider, one model, one prompt.
//!
//! Task state is monotonic: `Pending → Running → {Succeeded | Failed |
//! Cancelled | Skipped}`. Transitions go through methods that reject
//! anything else, so no observer can ever see a terminal state followed by
//! a non-terminal one.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::prompt::PromptSpec;
use crate::provider::ProviderKind;

// ═══════════════════════════════════════════
// State machine
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Skipped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a task was skipped without a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The exact (provider, model, prompt) tuple is already described.
    AlreadyDescribed,
    /// An earlier task hit an auth failure; the credential is bad for the
    /// whole queue.
    AuthShortCircuit,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyDescribed => "already_described",
            Self::AuthShortCircuit => "auth_short_circuit",
        }
    }
}

/// Rejected state transition.
#[derive(Debug, thiserror::Error)]
#[error("Invalid task transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskState,
    pub to: TaskState,
}

// ═══════════════════════════════════════════
// DescriptionTask
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct DescriptionTask {
    pub input: PathBuf,
    pub provider: ProviderKind,
    pub model: String,
    pub prompt: PromptSpec,
    state: TaskState,
    /// Times this task was handed to a provider client. The client's own
    /// retries are internal to one execution and not counted here.
    pub attempts: u32,
    /// Error classification of the last failure ("auth", "transient", ...).
    pub error_kind: Option<String>,
    pub last_error: Option<String>,
    pub skip_reason: Option<SkipReason>,
}

impl DescriptionTask {
    pub fn new(input: PathBuf, provider: ProviderKind, model: &str, prompt: PromptSpec) -> Self {
        Self {
            input,
            provider,
            model: model.to_string(),
            prompt,
            state: TaskState::Pending,
            attempts: 0,
            error_kind: None,
            last_error: None,
            skip_reason: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    fn transition(&mut self, to: TaskState) -> Result<(), InvalidTransition> {
        let allowed = match (self.state, to) {
            (TaskState::Pending, TaskState::Running) => true,
            // Pending tasks can be resolved without ever running.
            (TaskState::Pending, TaskState::Cancelled | TaskState::Skipped) => true,
            (TaskState::Running, s) if s.is_terminal() && s != TaskState::Cancelled => true,
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Pending → Running, bumping the attempt counter.
    pub fn begin(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskState::Running)?;
        self.attempts += 1;
        Ok(())
    }

    pub fn succeed(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskState::Succeeded)
    }

    pub fn fail(&mut self, kind: &str, detail: &str) -> Result<(), InvalidTransition> {
        self.transition(TaskState::Failed)?;
        self.error_kind = Some(kind.to_string());
        self.last_error = Some(detail.to_string());
        Ok(())
    }

    /// Mark an unattempted task cancelled. A running task is never
    /// cancelled mid-flight; it finishes as Succeeded or Failed.
    pub fn cancel(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskState::Cancelled)
    }

    pub fn skip(&mut self, reason: SkipReason) -> Result<(), InvalidTransition> {
        self.transition(TaskState::Skipped)?;
        self.skip_reason = Some(reason);
        Ok(())
    }

    /// Short display name for progress events.
    pub fn display_name(&self) -> String {
        self.input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{PromptSpec, PromptStyle};

    fn task() -> DescriptionTask {
        DescriptionTask::new(
            PathBuf::from("photos/a.jpg"),
            ProviderKind::Ollama,
            "llava:latest",
            PromptSpec::style(PromptStyle::Detailed),
        )
    }

    #[test]
    fn happy_path_is_pending_running_succeeded() {
        let mut t = task();
        assert_eq!(t.state(), TaskState::Pending);
        t.begin().unwrap();
        assert_eq!(t.state(), TaskState::Running);
        assert_eq!(t.attempts, 1);
        t.succeed().unwrap();
        assert_eq!(t.state(), TaskState::Succeeded);
    }

    #[test]
    fn failure_records_kind_and_detail() {
        let mut t = task();
        t.begin().unwrap();
        t.fail("transient", "connection reset after 3 attempts").unwrap();
        assert_eq!(t.state(), TaskState::Failed);
        assert_eq!(t.error_kind.as_deref(), Some("transient"));
        assert!(t.last_error.as_deref().unwrap().contains("3 attempts"));
    }

    #[test]
    fn terminal_states_are_final() {
        let mut t = task();
        t.begin().unwrap();
        t.succeed().unwrap();

        assert!(t.begin().is_err());
        assert!(t.fail("transient", "x").is_err());
        assert!(t.cancel().is_err());
        assert!(t.skip(SkipReason::AlreadyDescribed).is_err());
        assert_eq!(t.state(), TaskState::Succeeded);
    }

    #[test]
    fn running_task_cannot_be_cancelled() {
        let mut t = task();
        t.begin().unwrap();
        assert!(t.cancel().is_err(), "In-flight calls are never interrupted");
        t.fail("malformed", "no text").unwrap();
    }

    #[test]
    fn pending_task_can_be_cancelled_or_skipped() {
        let mut cancelled = task();
        cancelled.cancel().unwrap();
        assert_eq!(cancelled.state(), TaskState::Cancelled);
        assert_eq!(cancelled.attempts, 0);

        let mut skipped = task();
        skipped.skip(SkipReason::AlreadyDescribed).unwrap();
        assert_eq!(skipped.state(), TaskState::Skipped);
        assert_eq!(
            skipped.skip_reason,
            Some(SkipReason::AlreadyDescribed)
        );
    }

    #[test]
    fn state_roundtrip() {
        for s in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Succeeded,
            TaskState::Failed,
            TaskState::Cancelled,
            TaskState::Skipped,
        ] {
            assert_eq!(TaskState::from_str(s.as_str()), Some(s));
        }
        assert_eq!(TaskState::from_str("paused"), None);
    }

    #[test]
    fn terminal_classification() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
    }

    #[test]
    fn display_name_uses_file_name() {
        assert_eq!(task().display_name(), "a.jpg");
    }
}
