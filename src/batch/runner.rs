//! BatchRunner — drives a queue of description tasks to completion.
//!
//! Sequential by design: provider rate limits make naive parallelism
//! counterproductive, so the safe default is one call at a time with a
//! small delay between calls to the same backend. Cancellation is
//! cooperative and checked at item boundaries only — an in-flight provider
//! call always finishes, then the rest of the queue is marked cancelled.
//! One bad image never aborts the batch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::task::{DescriptionTask, SkipReason, TaskState};
use crate::provider::{ProviderError, VisionProvider};
use crate::workspace::{DescriptionRecord, Item, ItemType, Workspace};

// ═══════════════════════════════════════════
// Cancellation
// ═══════════════════════════════════════════

/// Cooperative cancellation flag, cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════
// Configuration, events, summary
// ═══════════════════════════════════════════

/// Knobs for one batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Pause between consecutive provider calls, to avoid burst limits.
    pub inter_item_delay: Duration,
    /// After the first auth failure, skip the rest of the queue: the
    /// credential is bad for every remaining call too.
    pub auth_short_circuit: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            inter_item_delay: Duration::from_millis(1500),
            auth_short_circuit: true,
        }
    }
}

/// Progress events, emitted at least once per item boundary so a front end
/// can render "N of M" without polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchEvent {
    Started {
        total: usize,
    },
    ItemStarted {
        index: usize,
        total: usize,
        name: String,
    },
    ItemFinished {
        index: usize,
        total: usize,
        name: String,
        state: TaskState,
        error: Option<String>,
        elapsed_ms: u64,
        /// Running-average projection for the rest of the queue.
        eta_remaining_ms: Option<u64>,
    },
    Finished {
        summary: BatchSummary,
    },
}

/// Outcome counts for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.cancelled
    }
}

// ═══════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════

pub struct BatchRunner {
    provider: Arc<dyn VisionProvider>,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(provider: Arc<dyn VisionProvider>, config: BatchConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &Arc<dyn VisionProvider> {
        &self.provider
    }

    /// Run every task in order, mutating the workspace on success.
    ///
    /// Tasks complete in enqueue order. The provider client owns all
    /// retrying; each task is executed at most once per run here.
    pub fn run(
        &self,
        tasks: &mut [DescriptionTask],
        workspace: &mut Workspace,
        on_event: &mut dyn FnMut(BatchEvent),
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let start = Instant::now();
        let total = tasks.len();
        let mut summary = BatchSummary::default();
        let mut durations_ms: Vec<u64> = Vec::new();
        let mut auth_failed = false;

        on_event(BatchEvent::Started { total });

        for index in 0..total {
            // Boundary check: a cancel request lands here, never mid-call.
            if cancel.is_cancelled() {
                if tasks[index].cancel().is_ok() {
                    summary.cancelled += 1;
                }
                continue;
            }

            let name = tasks[index].display_name();

            if auth_failed {
                if tasks[index].skip(SkipReason::AuthShortCircuit).is_ok() {
                    summary.skipped += 1;
                    on_event(self.finished_event(&tasks[index], index, total, &name, 0, None));
                }
                continue;
            }

            // Idempotence: an existing record for this exact tuple means
            // the work is already done.
            if workspace.has_description(
                &tasks[index].input,
                self.provider.kind(),
                &tasks[index].model,
                &tasks[index].prompt,
            ) {
                if tasks[index].skip(SkipReason::AlreadyDescribed).is_ok() {
                    summary.skipped += 1;
                    on_event(self.finished_event(&tasks[index], index, total, &name, 0, None));
                }
                continue;
            }

            on_event(BatchEvent::ItemStarted {
                index,
                total,
                name: name.clone(),
            });

            if let Err(e) = tasks[index].begin() {
                tracing::warn!(task = %name, error = %e, "Task not runnable, skipping");
                continue;
            }

            let item_start = Instant::now();
            let result = self.provider.describe(
                &tasks[index].input,
                &tasks[index].model,
                tasks[index].prompt.text(),
            );
            let elapsed_ms = item_start.elapsed().as_millis() as u64;
            durations_ms.push(elapsed_ms);

            match result {
                Ok(description) => {
                    let record = DescriptionRecord::from_description(
                        description,
                        self.provider.kind(),
                        &tasks[index].model,
                        &tasks[index].prompt,
                    );
                    // GUI batches can queue files that were never added as
                    // items; materialize them before appending.
                    let path = tasks[index].input.clone();
                    if !workspace.contains(&path) {
                        workspace.add_item_if_absent(Item::new(
                            &path.to_string_lossy(),
                            ItemType::Image,
                        ));
                    }
                    match workspace.add_description(&path, record) {
                        Ok(()) => {
                            let _ = tasks[index].succeed();
                            summary.succeeded += 1;
                        }
                        Err(e) => {
                            tracing::error!(task = %name, error = %e, "Failed to store description");
                            let _ = tasks[index].fail("workspace", &e.to_string());
                            summary.failed += 1;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(task = %name, error = %err, "Describe failed");
                    let _ = tasks[index].fail(err.kind_str(), &err.to_string());
                    summary.failed += 1;
                    if self.config.auth_short_circuit
                        && matches!(err, ProviderError::Auth { .. })
                    {
                        tracing::error!(
                            provider = %self.provider.kind(),
                            "Auth failure: short-circuiting the remaining queue"
                        );
                        auth_failed = true;
                    }
                }
            }

            let eta = eta_remaining_ms(&durations_ms, total - index - 1);
            on_event(self.finished_event(&tasks[index], index, total, &name, elapsed_ms, eta));

            // Delay only between real provider calls, and only while the
            // queue is still live.
            if index + 1 < total && !cancel.is_cancelled() && !auth_failed {
                std::thread::sleep(self.config.inter_item_delay);
            }
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "Batch complete"
        );
        on_event(BatchEvent::Finished {
            summary: summary.clone(),
        });
        summary
    }

    fn finished_event(
        &self,
        task: &DescriptionTask,
        index: usize,
        total: usize,
        name: &str,
        elapsed_ms: u64,
        eta_remaining_ms: Option<u64>,
    ) -> BatchEvent {
        BatchEvent::ItemFinished {
            index,
            total,
            name: name.to_string(),
            state: task.state(),
            error: task.last_error.clone(),
            elapsed_ms,
            eta_remaining_ms,
        }
    }
}

/// Project remaining wall time from the running average.
fn eta_remaining_ms(durations_ms: &[u64], remaining: usize) -> Option<u64> {
    if durations_ms.is_empty() || remaining == 0 {
        return None;
    }
    let avg = durations_ms.iter().sum::<u64>() / durations_ms.len() as u64;
    Some(avg * remaining as u64)
}
