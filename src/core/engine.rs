//! The resumable-transfer capability shared by both directions
//!
//! [`Engine`] selects the download or upload implementation from the task's
//! direction. [`execute`] runs it and folds every error into an outcome;
//! [`finalize`] applies the matching terminal state transition.

use log::{error, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::downloader::DownloadEngine;
use crate::core::progress::{ProgressReporter, TransferOutcome};
use crate::core::sink::Sink;
use crate::core::task::{TaskSnapshot, TransferState, TransferTask};
use crate::core::uploader::UploadEngine;

/// Everything an engine needs besides the task itself
pub struct TransferContext {
    pub cancel: CancellationToken,
    pub reporter: ProgressReporter,
    status: watch::Sender<TaskSnapshot>,
}

impl TransferContext {
    pub fn new(
        cancel: CancellationToken,
        reporter: ProgressReporter,
        status: watch::Sender<TaskSnapshot>,
    ) -> Self {
        Self {
            cancel,
            reporter,
            status,
        }
    }

    /// Make the task's current state visible to the controller.
    pub fn publish(&self, task: &TransferTask) {
        self.status.send_replace(task.snapshot());
    }
}

/// One of the two transfer implementations
pub enum Engine<S: Sink> {
    Download(DownloadEngine<S>),
    Upload(UploadEngine),
}

/// Run `engine` to the end. Never returns an error: failures become
/// [`TransferOutcome::Failed`], a cancellation becomes
/// [`TransferOutcome::Cancelled`].
pub async fn execute<S: Sink>(
    engine: Engine<S>,
    task: &mut TransferTask,
    ctx: &mut TransferContext,
) -> TransferOutcome {
    let result = match engine {
        Engine::Download(engine) => engine.run(task, ctx).await,
        Engine::Upload(mut engine) => engine.run(task, ctx).await,
    };

    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(
                "{} {} failed after {} bytes: {e}",
                direction_label(task),
                task.id(),
                task.transferred_bytes()
            );
            TransferOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// Move `task` into the terminal state that matches `outcome`.
pub fn finalize(task: &mut TransferTask, outcome: &TransferOutcome) {
    let result = match outcome {
        TransferOutcome::Completed => task.transition(TransferState::Completed),
        TransferOutcome::Failed { .. } => task.transition(TransferState::Failed),
        TransferOutcome::Cancelled => {
            if task.state() == TransferState::Running {
                let _ = task.transition(TransferState::Cancelling);
            }
            task.transition(TransferState::Cancelled)
        }
    };
    if let Err(e) = result {
        warn!("{}: {e}", task.id());
    }
}

fn direction_label(task: &TransferTask) -> &'static str {
    match task.direction() {
        crate::core::task::Direction::Download => "download",
        crate::core::task::Direction::Upload => "upload",
    }
}
