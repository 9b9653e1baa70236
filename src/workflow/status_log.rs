//! Append-only run status log.
//!
//! One JSONL file per pinned (provider, model, prompt style) tuple, living
//! in the output root. Every stage transition and every describe-item
//! outcome is appended as it happens, so a crashed run can be resumed by
//! re-reading the log and recomputing what is left — without replaying any
//! provider calls. The log is the source of truth for stage completion;
//! directory contents are only an advisory sanity check on top.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::stage::{Stage, StageStatus};
use crate::batch::TaskState;
use crate::prompt::PromptStyle;
use crate::provider::ProviderKind;

/// One record in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    RunStarted {
        run_id: String,
        root: String,
        provider: ProviderKind,
        model: String,
        prompt_style: String,
        at: String,
    },
    StageTransition {
        run_id: String,
        stage: Stage,
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        at: String,
    },
    ItemOutcome {
        run_id: String,
        path: String,
        state: TaskState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: String,
    },
}

/// Handle to one tuple's log file.
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// The log file for a pinned run tuple under `output_root`.
    pub fn for_run(
        output_root: &Path,
        provider: ProviderKind,
        model: &str,
        style: PromptStyle,
    ) -> Self {
        let file = format!(
            "status_{}_{}_{}.jsonl",
            provider.as_str(),
            sanitize(model),
            style.as_str()
        );
        Self {
            path: output_root.join(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Each entry is one line, flushed immediately so a
    /// crash loses at most the in-flight record.
    pub fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{line}")?;
        file.flush()
    }

    /// Read every parseable entry. A torn final line from a crash is
    /// skipped with a warning, not a failure.
    pub fn read_all(&self) -> std::io::Result<Vec<LogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        log = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "Skipping unparseable log line"
                    );
                }
            }
        }
        Ok(entries)
    }

    /// Recompute resume state from the log contents.
    pub fn resume_state(&self) -> std::io::Result<ResumeState> {
        Ok(ResumeState::from_entries(&self.read_all()?))
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// "What is already done", replayed from the log. Last entry wins.
#[derive(Debug, Default)]
pub struct ResumeState {
    stage_status: std::collections::HashMap<Stage, StageStatus>,
    item_states: std::collections::HashMap<String, TaskState>,
}

impl ResumeState {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let mut state = Self::default();
        for entry in entries {
            match entry {
                LogEntry::StageTransition { stage, status, .. } => {
                    state.stage_status.insert(*stage, *status);
                }
                LogEntry::ItemOutcome { path, state: s, .. } => {
                    state.item_states.insert(path.clone(), *s);
                }
                LogEntry::RunStarted { .. } => {}
            }
        }
        state
    }

    pub fn stage_status(&self, stage: Stage) -> StageStatus {
        self.stage_status
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::NotStarted)
    }

    /// A done stage (completed or skipped) is not re-run on resume.
    pub fn stage_done(&self, stage: Stage) -> bool {
        self.stage_status(stage).is_done()
    }

    pub fn item_state(&self, path: &str) -> Option<TaskState> {
        self.item_states.get(path).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    fn log_in(dir: &Path) -> RunLog {
        RunLog::for_run(dir, ProviderKind::Ollama, "llava:latest", PromptStyle::Detailed)
    }

    #[test]
    fn log_file_name_encodes_tuple() {
        let log = RunLog::for_run(
            Path::new("/out"),
            ProviderKind::OpenAi,
            "gpt-4o-mini",
            PromptStyle::Concise,
        );
        assert_eq!(
            log.path(),
            Path::new("/out/status_openai_gpt-4o-mini_concise.jsonl")
        );

        // Model ids with slashes stay filesystem-safe.
        let hf = RunLog::for_run(
            Path::new("/out"),
            ProviderKind::HuggingFace,
            "Qwen/Qwen2.5-VL-7B-Instruct",
            PromptStyle::Detailed,
        );
        assert!(!hf.path().file_name().unwrap().to_string_lossy().contains('/'));
    }

    #[test]
    fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());

        log.append(&LogEntry::RunStarted {
            run_id: "run-1".into(),
            root: "/photos".into(),
            provider: ProviderKind::Ollama,
            model: "llava:latest".into(),
            prompt_style: "detailed".into(),
            at: now(),
        })
        .unwrap();
        log.append(&LogEntry::StageTransition {
            run_id: "run-1".into(),
            stage: Stage::Discover,
            status: StageStatus::Completed,
            detail: Some("4 media files".into()),
            at: now(),
        })
        .unwrap();
        log.append(&LogEntry::ItemOutcome {
            run_id: "run-1".into(),
            path: "/photos/a.jpg".into(),
            state: TaskState::Succeeded,
            error: None,
            at: now(),
        })
        .unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], LogEntry::RunStarted { .. }));
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(
            log.resume_state().unwrap().stage_status(Stage::Describe),
            StageStatus::NotStarted
        );
    }

    #[test]
    fn torn_trailing_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        log.append(&LogEntry::StageTransition {
            run_id: "run-1".into(),
            stage: Stage::ExtractFrames,
            status: StageStatus::Completed,
            detail: None,
            at: now(),
        })
        .unwrap();

        // Simulate a crash mid-write.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap();
        write!(file, "{{\"type\":\"stage_tra").unwrap();
        drop(file);

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn resume_state_last_entry_wins() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        for status in [
            StageStatus::Running,
            StageStatus::Failed,
            StageStatus::Running,
            StageStatus::Completed,
        ] {
            log.append(&LogEntry::StageTransition {
                run_id: "run-1".into(),
                stage: Stage::Describe,
                status,
                detail: None,
                at: now(),
            })
            .unwrap();
        }

        let resume = log.resume_state().unwrap();
        assert_eq!(resume.stage_status(Stage::Describe), StageStatus::Completed);
        assert!(resume.stage_done(Stage::Describe));
        assert!(!resume.stage_done(Stage::ExtractFrames));
    }

    #[test]
    fn skipped_already_done_counts_as_done() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        log.append(&LogEntry::StageTransition {
            run_id: "run-2".into(),
            stage: Stage::ExtractFrames,
            status: StageStatus::SkippedAlreadyDone,
            detail: Some("no videos in root".into()),
            at: now(),
        })
        .unwrap();

        let resume = log.resume_state().unwrap();
        assert!(resume.stage_done(Stage::ExtractFrames));
    }

    #[test]
    fn item_outcomes_replayed_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(dir.path());
        log.append(&LogEntry::ItemOutcome {
            run_id: "run-1".into(),
            path: "a.jpg".into(),
            state: TaskState::Failed,
            error: Some("transient: timeout".into()),
            at: now(),
        })
        .unwrap();
        log.append(&LogEntry::ItemOutcome {
            run_id: "run-2".into(),
            path: "a.jpg".into(),
            state: TaskState::Succeeded,
            error: None,
            at: now(),
        })
        .unwrap();

        let resume = log.resume_state().unwrap();
        assert_eq!(resume.item_state("a.jpg"), Some(TaskState::Succeeded));
        assert_eq!(resume.item_state("b.jpg"), None);
    }
}
