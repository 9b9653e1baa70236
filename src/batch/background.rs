//! Background batch execution for interactive front ends.
//!
//! A GUI must not run provider calls on its event loop. `spawn_batch` moves
//! the whole run (tasks + workspace) onto a worker thread — the driving
//! context — and streams `BatchEvent`s over a channel the UI drains at its
//! own pace. The workspace comes back with the join, so there is exactly
//! one writer at any time and no shared mutable state.

use std::sync::mpsc::{channel, Receiver};
use std::thread::JoinHandle;

use super::runner::{BatchConfig, BatchEvent, BatchRunner, BatchSummary, CancellationToken};
use super::task::DescriptionTask;
use crate::provider::VisionProvider;
use crate::workspace::Workspace;

/// Everything the worker hands back when the run ends.
pub struct BatchOutcome {
    pub workspace: Workspace,
    pub tasks: Vec<DescriptionTask>,
    pub summary: BatchSummary,
}

/// Handle to a running background batch.
///
/// Dropping the handle requests cancellation and joins the worker, so an
/// abandoned batch cannot keep calling providers after its UI went away.
pub struct BatchHandle {
    cancel: CancellationToken,
    events: Receiver<BatchEvent>,
    worker: Option<JoinHandle<BatchOutcome>>,
}

impl BatchHandle {
    /// Request cancellation. The current item finishes; the rest of the
    /// queue is marked cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Event stream for progress rendering.
    pub fn events(&self) -> &Receiver<BatchEvent> {
        &self.events
    }

    /// Wait for the run to finish and take back the workspace.
    pub fn join(mut self) -> BatchOutcome {
        let worker = self.worker.take().expect("join called once");
        match worker.join() {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.cancel.cancel();
            let _ = worker.join();
        }
    }
}

/// Start a batch on a worker thread and return immediately.
pub fn spawn_batch(
    provider: std::sync::Arc<dyn VisionProvider>,
    config: BatchConfig,
    mut tasks: Vec<DescriptionTask>,
    mut workspace: Workspace,
) -> BatchHandle {
    let cancel = CancellationToken::new();
    let worker_cancel = cancel.clone();
    let (tx, rx) = channel();

    let worker = std::thread::spawn(move || {
        let runner = BatchRunner::new(provider, config);
        let summary = runner.run(
            &mut tasks,
            &mut workspace,
            // A closed receiver just means the UI stopped listening; the
            // run itself carries on until cancelled.
            &mut |event| {
                let _ = tx.send(event);
            },
            &worker_cancel,
        );
        BatchOutcome {
            workspace,
            tasks,
            summary,
        }
    });

    BatchHandle {
        cancel,
        events: rx,
        worker: Some(worker),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::task::TaskState;
    use crate::prompt::{PromptSpec, PromptStyle};
    use crate::provider::{MockProvider, ProviderKind};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn tasks(n: usize) -> Vec<DescriptionTask> {
        (0..n)
            .map(|i| {
                DescriptionTask::new(
                    PathBuf::from(format!("img_{i}.jpg")),
                    ProviderKind::Ollama,
                    "llava:latest",
                    PromptSpec::style(PromptStyle::Concise),
                )
            })
            .collect()
    }

    fn fast_config() -> BatchConfig {
        BatchConfig {
            inter_item_delay: Duration::ZERO,
            auth_short_circuit: true,
        }
    }

    #[test]
    fn background_run_streams_events_and_returns_workspace() {
        let provider = Arc::new(MockProvider::new("a tabby cat"));
        let handle = spawn_batch(provider, fast_config(), tasks(3), Workspace::new());

        let mut saw_started = false;
        let mut finished_items = 0;
        // Drain until the channel closes with the worker.
        while let Ok(event) = handle.events().recv() {
            match event {
                BatchEvent::Started { total } => {
                    saw_started = true;
                    assert_eq!(total, 3);
                }
                BatchEvent::ItemFinished { .. } => finished_items += 1,
                _ => {}
            }
        }

        let outcome = handle.join();
        assert!(saw_started);
        assert_eq!(finished_items, 3);
        assert_eq!(outcome.summary.succeeded, 3);
        assert_eq!(outcome.workspace.len(), 3);
        assert!(outcome.tasks.iter().all(|t| t.state() == TaskState::Succeeded));
    }

    #[test]
    fn cancel_stops_remaining_items() {
        let provider = Arc::new(MockProvider::new("slow scene"));
        let config = BatchConfig {
            // Long enough that cancel lands before the queue drains.
            inter_item_delay: Duration::from_millis(50),
            auth_short_circuit: true,
        };
        let handle = spawn_batch(provider, config, tasks(20), Workspace::new());

        // Cancel as soon as the first item finishes.
        while let Ok(event) = handle.events().recv() {
            if matches!(event, BatchEvent::ItemFinished { .. }) {
                handle.cancel();
                break;
            }
        }

        let outcome = handle.join();
        assert!(outcome.summary.cancelled > 0, "Queue was cut short");
        assert_eq!(outcome.summary.total(), 20);
        let attempted = outcome.summary.succeeded + outcome.summary.failed;
        assert_eq!(
            outcome.summary.cancelled,
            20 - attempted - outcome.summary.skipped
        );
    }

    #[test]
    fn drop_cancels_and_joins() {
        let provider = Arc::new(MockProvider::new("scene"));
        let config = BatchConfig {
            inter_item_delay: Duration::from_millis(20),
            auth_short_circuit: true,
        };
        let handle = spawn_batch(provider, config, tasks(50), Workspace::new());
        // Dropping without joining must not leave the worker describing
        // images forever.
        drop(handle);
    }
}
