//! PipelineOrchestrator — stage sequencing with resumable status logging.
//!
//! Drives `Discover → ExtractFrames → ConvertFormats → Describe →
//! GenerateReport` over one input root, with collaborators injected as
//! traits so the whole pipeline runs under test with mocks. Every stage
//! transition is appended to the run log before and after execution;
//! resuming re-reads the log, skips done stages, and lets per-item skips
//! inside Describe pick up an interrupted batch. A stage-level failure
//! aborts the run — later stages cannot proceed on missing inputs. A
//! per-item failure inside Describe does not.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::discover::{discover, Discovery};
use super::error::WorkflowError;
use super::media::{FormatConverter, FrameExtractor};
use super::report::generate_report;
use super::stage::{Stage, StageStatus, StepSet};
use super::status_log::{LogEntry, RunLog};
use crate::batch::{
    BatchConfig, BatchEvent, BatchRunner, BatchSummary, CancellationToken, DescriptionTask,
};
use crate::prompt::PromptSpec;
use crate::provider::{ProviderKind, VisionProvider};
use crate::workspace::{Item, Workspace};

/// Workspace document written into the output root.
pub const WORKSPACE_FILE_NAME: &str = "workspace.mdw";
const FRAMES_DIR: &str = "frames";
const CONVERTED_DIR: &str = "converted";

/// One pipeline invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub root: PathBuf,
    pub output_root: PathBuf,
    pub model: String,
    pub prompt: PromptSpec,
    pub steps: StepSet,
}

/// Per-stage outcome on the finished run.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub detail: Option<String>,
}

/// Result of `PipelineOrchestrator::run`.
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    pub id: String,
    pub provider: ProviderKind,
    pub model: String,
    pub prompt: PromptSpec,
    pub root: PathBuf,
    pub output_root: PathBuf,
    pub workspace_path: PathBuf,
    pub stages: Vec<StageRecord>,
    pub summary: Option<BatchSummary>,
}

impl WorkflowRun {
    pub fn stage(&self, stage: Stage) -> &StageRecord {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .expect("all stages present")
    }

    pub fn failed_stage(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }

    /// Full success means no stage failed. Per-item describe failures are
    /// reported through the summary, not here — best-effort batch.
    pub fn succeeded(&self) -> bool {
        self.failed_stage().is_none()
    }
}

pub struct PipelineOrchestrator {
    provider: Arc<dyn VisionProvider>,
    extractor: Box<dyn FrameExtractor>,
    converter: Box<dyn FormatConverter>,
    batch_config: BatchConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        provider: Arc<dyn VisionProvider>,
        extractor: Box<dyn FrameExtractor>,
        converter: Box<dyn FormatConverter>,
        batch_config: BatchConfig,
    ) -> Self {
        Self {
            provider,
            extractor,
            converter,
            batch_config,
        }
    }

    /// Run the requested stages over `request.root`.
    ///
    /// Returns `Ok` with the run record unless a stage fails hard; a
    /// user cancellation ends the run early but is not an `Err`.
    pub fn run(
        &self,
        request: &RunRequest,
        on_event: &mut dyn FnMut(BatchEvent),
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        // Fail fast on bad configuration, before any provider call.
        if !request.root.is_dir() {
            return Err(WorkflowError::RootNotFound(request.root.clone()));
        }
        if request.model.trim().is_empty() {
            return Err(WorkflowError::MissingModel);
        }
        std::fs::create_dir_all(&request.output_root)?;

        let provider_kind = self.provider.kind();
        let workspace_path = request.output_root.join(WORKSPACE_FILE_NAME);
        let mut workspace = Workspace::load_or_new(&workspace_path)?;
        workspace.add_directory(&request.root);

        let log = RunLog::for_run(
            &request.output_root,
            provider_kind,
            &request.model,
            request.prompt.style,
        );
        let resume = log.resume_state()?;

        let run_id = format!("run-{}", uuid::Uuid::new_v4().simple());
        log.append(&LogEntry::RunStarted {
            run_id: run_id.clone(),
            root: request.root.display().to_string(),
            provider: provider_kind,
            model: request.model.clone(),
            prompt_style: request.prompt.style.as_str().to_string(),
            at: chrono::Utc::now().to_rfc3339(),
        })?;

        let mut run = WorkflowRun {
            id: run_id,
            provider: provider_kind,
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            root: request.root.clone(),
            output_root: request.output_root.clone(),
            workspace_path: workspace_path.clone(),
            stages: Stage::all()
                .iter()
                .map(|s| StageRecord {
                    stage: *s,
                    status: StageStatus::NotStarted,
                    detail: None,
                })
                .collect(),
            summary: None,
        };

        // ── Discover ────────────────────────────────────
        self.set_stage(&mut run, &log, Stage::Discover, StageStatus::Running, None)?;
        let discovery = match discover(&request.root) {
            Ok(d) => d,
            Err(e) => {
                let detail = e.to_string();
                self.set_stage(
                    &mut run,
                    &log,
                    Stage::Discover,
                    StageStatus::Failed,
                    Some(detail.clone()),
                )?;
                return Err(WorkflowError::StageFailed {
                    stage: Stage::Discover,
                    detail,
                });
            }
        };
        for image in &discovery.images {
            workspace.add_item_if_absent(Item::new(
                &image.to_string_lossy(),
                crate::workspace::ItemType::Image,
            ));
        }
        for video in &discovery.videos {
            workspace.add_item_if_absent(Item::new(
                &video.to_string_lossy(),
                crate::workspace::ItemType::Video,
            ));
        }
        self.set_stage(
            &mut run,
            &log,
            Stage::Discover,
            StageStatus::Completed,
            Some(format!(
                "{} images, {} videos, {} convertible, {} unsupported",
                discovery.images.len(),
                discovery.videos.len(),
                discovery.convertibles.len(),
                discovery.unsupported.len()
            )),
        )?;

        // ── ExtractFrames ───────────────────────────────
        if request.steps.extract {
            self.run_extract(&mut run, &log, &resume, &discovery, &mut workspace, request)?;
            workspace.save(&workspace_path)?;
        }

        // ── ConvertFormats ──────────────────────────────
        if request.steps.convert {
            self.run_convert(&mut run, &log, &resume, &discovery, &mut workspace, request)?;
            workspace.save(&workspace_path)?;
        }

        // ── Describe ────────────────────────────────────
        let mut aborted = false;
        if request.steps.describe {
            let summary = self.run_describe(
                &mut run,
                &log,
                &resume,
                &mut workspace,
                request,
                on_event,
                cancel,
            )?;
            workspace.save(&workspace_path)?;
            if let Some(summary) = summary {
                aborted = summary.cancelled > 0;
                run.summary = Some(summary);
            }
        }

        // ── GenerateReport ──────────────────────────────
        if request.steps.report && !aborted {
            self.set_stage(&mut run, &log, Stage::GenerateReport, StageStatus::Running, None)?;
            match generate_report(
                &workspace,
                provider_kind.as_str(),
                &request.model,
                run.summary.as_ref(),
                &request.output_root,
            ) {
                Ok(path) => {
                    self.set_stage(
                        &mut run,
                        &log,
                        Stage::GenerateReport,
                        StageStatus::Completed,
                        Some(path.display().to_string()),
                    )?;
                }
                Err(e) => {
                    let detail = e.to_string();
                    self.set_stage(
                        &mut run,
                        &log,
                        Stage::GenerateReport,
                        StageStatus::Failed,
                        Some(detail.clone()),
                    )?;
                    workspace.save(&workspace_path)?;
                    return Err(WorkflowError::StageFailed {
                        stage: Stage::GenerateReport,
                        detail,
                    });
                }
            }
        }

        if workspace.is_modified() {
            workspace.save(&workspace_path)?;
        }
        Ok(run)
    }

    fn run_extract(
        &self,
        run: &mut WorkflowRun,
        log: &RunLog,
        resume: &super::status_log::ResumeState,
        discovery: &Discovery,
        workspace: &mut Workspace,
        request: &RunRequest,
    ) -> Result<(), WorkflowError> {
        let stage = Stage::ExtractFrames;
        let frames_dir = request.output_root.join(FRAMES_DIR);

        if discovery.videos.is_empty() {
            // Skipped, not "ran and found nothing": the log should say why
            // the stage did no work.
            return self.set_stage(
                run,
                log,
                stage,
                StageStatus::SkippedAlreadyDone,
                Some("no videos in root".to_string()),
            );
        }

        // The log is authoritative for completion; the directory is an
        // advisory check that downgrades a stale claim.
        if resume.stage_done(stage) && frames_dir.is_dir() {
            return self.set_stage(
                run,
                log,
                stage,
                StageStatus::SkippedAlreadyDone,
                Some("recorded complete in status log".to_string()),
            );
        }

        self.set_stage(run, log, stage, StageStatus::Running, None)?;
        let mut frame_count = 0usize;
        for video in &discovery.videos {
            let frames = match self.extractor.extract_frames(video, &frames_dir) {
                Ok(frames) => frames,
                Err(e) => {
                    let detail = e.to_string();
                    self.set_stage(run, log, stage, StageStatus::Failed, Some(detail.clone()))?;
                    return Err(WorkflowError::StageFailed { stage, detail });
                }
            };
            frame_count += frames.len();
            let parent = crate::workspace::normalize_path(video);
            for frame in frames {
                workspace.add_item_if_absent(Item::frame_of(&frame.to_string_lossy(), &parent));
            }
        }
        self.set_stage(
            run,
            log,
            stage,
            StageStatus::Completed,
            Some(format!(
                "{frame_count} frames from {} videos",
                discovery.videos.len()
            )),
        )
    }

    fn run_convert(
        &self,
        run: &mut WorkflowRun,
        log: &RunLog,
        resume: &super::status_log::ResumeState,
        discovery: &Discovery,
        workspace: &mut Workspace,
        request: &RunRequest,
    ) -> Result<(), WorkflowError> {
        let stage = Stage::ConvertFormats;
        let converted_dir = request.output_root.join(CONVERTED_DIR);

        if discovery.convertibles.is_empty() {
            return self.set_stage(
                run,
                log,
                stage,
                StageStatus::SkippedAlreadyDone,
                Some("no convertible files in root".to_string()),
            );
        }

        if resume.stage_done(stage) && converted_dir.is_dir() {
            return self.set_stage(
                run,
                log,
                stage,
                StageStatus::SkippedAlreadyDone,
                Some("recorded complete in status log".to_string()),
            );
        }

        self.set_stage(run, log, stage, StageStatus::Running, None)?;
        let mut converted_count = 0usize;
        for src in &discovery.convertibles {
            let converted = match self.converter.convert(src, &converted_dir) {
                Ok(path) => path,
                Err(e) => {
                    let detail = e.to_string();
                    self.set_stage(run, log, stage, StageStatus::Failed, Some(detail.clone()))?;
                    return Err(WorkflowError::StageFailed { stage, detail });
                }
            };
            converted_count += 1;
            workspace.add_item_if_absent(Item::new(
                &converted.to_string_lossy(),
                crate::workspace::ItemType::Image,
            ));
        }
        self.set_stage(
            run,
            log,
            stage,
            StageStatus::Completed,
            Some(format!("{converted_count} files converted")),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn run_describe(
        &self,
        run: &mut WorkflowRun,
        log: &RunLog,
        resume: &super::status_log::ResumeState,
        workspace: &mut Workspace,
        request: &RunRequest,
        on_event: &mut dyn FnMut(BatchEvent),
        cancel: &CancellationToken,
    ) -> Result<Option<BatchSummary>, WorkflowError> {
        let stage = Stage::Describe;
        let provider_kind = self.provider.kind();

        // Advisory check on a completed claim: every describable item must
        // actually hold a record for this run's tuple, otherwise new files
        // appeared and the stage runs again (per-item skips do the rest).
        let all_done = !workspace.describable_items().is_empty()
            && workspace.describable_items().iter().all(|i| {
                i.has_description(provider_kind, &request.model, &request.prompt)
            });
        if resume.stage_done(stage) && all_done {
            self.set_stage(
                run,
                log,
                stage,
                StageStatus::SkippedAlreadyDone,
                Some("all items already described for this tuple".to_string()),
            )?;
            return Ok(None);
        }

        self.set_stage(run, log, stage, StageStatus::Running, None)?;

        let mut tasks: Vec<DescriptionTask> = workspace
            .describable_items()
            .iter()
            .map(|item| {
                DescriptionTask::new(
                    PathBuf::from(&item.file_path),
                    provider_kind,
                    &request.model,
                    request.prompt.clone(),
                )
            })
            .collect();

        let runner = BatchRunner::new(self.provider.clone(), self.batch_config.clone());
        let run_id = run.id.clone();
        let task_paths: Vec<String> = tasks
            .iter()
            .map(|t| t.input.display().to_string())
            .collect();
        let mut forward = |event: BatchEvent| {
            if let BatchEvent::ItemFinished {
                state,
                error,
                index,
                ..
            } = &event
            {
                // Item outcomes go into the log so a resumed run can
                // reconstruct what is left without provider calls.
                let _ = log.append(&LogEntry::ItemOutcome {
                    run_id: run_id.clone(),
                    path: task_paths[*index].clone(),
                    state: *state,
                    error: error.clone(),
                    at: chrono::Utc::now().to_rfc3339(),
                });
            }
            on_event(event);
        };
        let summary = runner.run(&mut tasks, workspace, &mut forward, cancel);

        if summary.cancelled > 0 {
            self.set_stage(
                run,
                log,
                stage,
                StageStatus::Failed,
                Some(format!(
                    "cancelled by user after {} of {} items",
                    summary.succeeded + summary.failed + summary.skipped,
                    summary.total()
                )),
            )?;
        } else {
            // Per-item failures do not fail the stage.
            self.set_stage(
                run,
                log,
                stage,
                StageStatus::Completed,
                Some(format!(
                    "{} succeeded, {} failed, {} skipped",
                    summary.succeeded, summary.failed, summary.skipped
                )),
            )?;
        }
        Ok(Some(summary))
    }

    fn set_stage(
        &self,
        run: &mut WorkflowRun,
        log: &RunLog,
        stage: Stage,
        status: StageStatus,
        detail: Option<String>,
    ) -> Result<(), WorkflowError> {
        tracing::info!(stage = %stage, status = %status, detail = ?detail, "Stage transition");
        log.append(&LogEntry::StageTransition {
            run_id: run.id.clone(),
            stage,
            status,
            detail: detail.clone(),
            at: chrono::Utc::now().to_rfc3339(),
        })?;
        let record = run
            .stages
            .iter_mut()
            .find(|s| s.stage == stage)
            .expect("all stages present");
        record.status = status;
        record.detail = detail;
        Ok(())
    }
}
