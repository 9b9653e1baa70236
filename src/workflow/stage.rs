//! Pipeline stages and their status lifecycle.

use serde::{Deserialize, Serialize};

/// The ordered stages of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discover,
    ExtractFrames,
    ConvertFormats,
    Describe,
    GenerateReport,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::ExtractFrames => "extract_frames",
            Self::ConvertFormats => "convert_formats",
            Self::Describe => "describe",
            Self::GenerateReport => "generate_report",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discover" => Some(Self::Discover),
            "extract_frames" => Some(Self::ExtractFrames),
            "convert_formats" => Some(Self::ConvertFormats),
            "describe" => Some(Self::Describe),
            "generate_report" => Some(Self::GenerateReport),
            _ => None,
        }
    }

    /// Execution order.
    pub fn all() -> &'static [Stage] {
        &[
            Self::Discover,
            Self::ExtractFrames,
            Self::ConvertFormats,
            Self::Describe,
            Self::GenerateReport,
        ]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stage status, advanced monotonically. `SkippedAlreadyDone` is recorded
/// explicitly so a resumed run's log still tells the whole story — a stage
/// with nothing to do is skipped, not "ran and found nothing".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    SkippedAlreadyDone,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::SkippedAlreadyDone => "skipped_already_done",
        }
    }

    /// A stage in this state satisfies its successors' preconditions.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::SkippedAlreadyDone)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which optional stages a caller asked for. Discover always runs; the
/// others can be subset to e.g. re-describe previously extracted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSet {
    pub extract: bool,
    pub convert: bool,
    pub describe: bool,
    pub report: bool,
}

impl StepSet {
    pub fn all() -> Self {
        Self {
            extract: true,
            convert: true,
            describe: true,
            report: true,
        }
    }

    /// Parse the CLI `--steps` value: a comma-separated subset of
    /// {extract, convert, describe, report}.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut steps = Self {
            extract: false,
            convert: false,
            describe: false,
            report: false,
        };
        for token in spec.split(',') {
            match token.trim() {
                "extract" => steps.extract = true,
                "convert" => steps.convert = true,
                "describe" => steps.describe = true,
                "report" | "html" => steps.report = true,
                "" => {}
                other => return Err(format!("unknown step '{other}'")),
            }
        }
        if steps == (Self {
            extract: false,
            convert: false,
            describe: false,
            report: false,
        }) {
            return Err("no steps selected".to_string());
        }
        Ok(steps)
    }

    pub fn requested(&self, stage: Stage) -> bool {
        match stage {
            Stage::Discover => true,
            Stage::ExtractFrames => self.extract,
            Stage::ConvertFormats => self.convert,
            Stage::Describe => self.describe,
            Stage::GenerateReport => self.report,
        }
    }
}

impl Default for StepSet {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_roundtrip() {
        for stage in Stage::all() {
            assert_eq!(Stage::from_str(stage.as_str()), Some(*stage));
        }
        assert_eq!(Stage::from_str("upload"), None);
    }

    #[test]
    fn stage_order_is_fixed() {
        let order = Stage::all();
        assert_eq!(order[0], Stage::Discover);
        assert_eq!(order[4], Stage::GenerateReport);
    }

    #[test]
    fn done_statuses() {
        assert!(StageStatus::Completed.is_done());
        assert!(StageStatus::SkippedAlreadyDone.is_done());
        assert!(!StageStatus::Failed.is_done());
        assert!(!StageStatus::Running.is_done());
        assert!(!StageStatus::NotStarted.is_done());
    }

    #[test]
    fn steps_parse_subset() {
        let steps = StepSet::parse("extract,describe").unwrap();
        assert!(steps.extract);
        assert!(!steps.convert);
        assert!(steps.describe);
        assert!(!steps.report);
    }

    #[test]
    fn steps_parse_html_alias() {
        let steps = StepSet::parse("describe, html").unwrap();
        assert!(steps.report);
        assert!(steps.describe);
    }

    #[test]
    fn steps_parse_rejects_unknown_and_empty() {
        assert!(StepSet::parse("extract,deploy").is_err());
        assert!(StepSet::parse("").is_err());
        assert!(StepSet::parse(",,").is_err());
    }

    #[test]
    fn discover_is_always_requested() {
        let steps = StepSet::parse("describe").unwrap();
        assert!(steps.requested(Stage::Discover));
        assert!(!steps.requested(Stage::ExtractFrames));
        assert!(steps.requested(Stage::Describe));
    }

    #[test]
    fn status_serde_snake_case() {
        let json = serde_json::to_string(&StageStatus::SkippedAlreadyDone).unwrap();
        assert_eq!(json, "\"skipped_already_done\"");
    }
}
