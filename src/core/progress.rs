//! Progress reporting
//!
//! Engines push raw byte counts through a [`ProgressReporter`], which turns
//! them into a throttled percentage stream for a [`TransferObserver`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::task::{TaskSnapshot, TransferTask};

/// Minimum spacing between two download progress events
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// A progress update as seen by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum Progress {
    /// Percentage of a known total, `0..=100`
    Percent(u8),
    /// Total unknown, raw bytes transferred so far
    Bytes(u64),
}

/// How a transfer ended. Exactly one is reported per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum TransferOutcome {
    Completed,
    Failed { reason: String },
    Cancelled,
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed)
    }
}

/// Receiver of transfer events.
///
/// Called from the background execution context; implementations must not
/// block for long.
pub trait TransferObserver: Send + Sync {
    fn on_progress(&self, progress: Progress);

    fn on_terminal(&self, outcome: &TransferOutcome, snapshot: &TaskSnapshot);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_progress(&self, _progress: Progress) {}

    fn on_terminal(&self, _outcome: &TransferOutcome, _snapshot: &TaskSnapshot) {}
}

/// Event forwarded by [`ChannelObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Progress(Progress),
    Terminal {
        outcome: TransferOutcome,
        snapshot: TaskSnapshot,
    },
}

/// Observer that forwards every event into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransferObserver for ChannelObserver {
    fn on_progress(&self, progress: Progress) {
        // receiver gone means nobody is watching any more
        let _ = self.tx.send(TransferEvent::Progress(progress));
    }

    fn on_terminal(&self, outcome: &TransferOutcome, snapshot: &TaskSnapshot) {
        let _ = self.tx.send(TransferEvent::Terminal {
            outcome: outcome.clone(),
            snapshot: snapshot.clone(),
        });
    }
}

/// Observer built from two closures
pub struct FnObserver<P, T> {
    progress: P,
    terminal: T,
}

impl<P, T> FnObserver<P, T>
where
    P: Fn(Progress) + Send + Sync,
    T: Fn(&TransferOutcome, &TaskSnapshot) + Send + Sync,
{
    pub fn new(progress: P, terminal: T) -> Self {
        Self { progress, terminal }
    }
}

impl<P, T> TransferObserver for FnObserver<P, T>
where
    P: Fn(Progress) + Send + Sync,
    T: Fn(&TransferOutcome, &TaskSnapshot) + Send + Sync,
{
    fn on_progress(&self, progress: Progress) {
        (self.progress)(progress)
    }

    fn on_terminal(&self, outcome: &TransferOutcome, snapshot: &TaskSnapshot) {
        (self.terminal)(outcome, snapshot)
    }
}

/// Turns task byte counts into observer progress events
#[derive(Clone)]
pub struct ProgressReporter {
    observer: Arc<dyn TransferObserver>,
    interval: Duration,
    last_emitted: Option<Progress>,
}

impl ProgressReporter {
    pub fn new(observer: Arc<dyn TransferObserver>, interval: Duration) -> Self {
        Self {
            observer,
            interval,
            last_emitted: None,
        }
    }

    fn current(task: &TransferTask) -> Progress {
        match task.percent() {
            Some(pct) => Progress::Percent(pct),
            None => Progress::Bytes(task.transferred_bytes()),
        }
    }

    fn emit(&mut self, task: &mut TransferTask, progress: Progress, now: Instant) {
        task.mark_progress_emitted(now);
        self.last_emitted = Some(progress);
        self.observer.on_progress(progress);
    }

    /// Emit if more than the configured interval passed since the last
    /// emission. Returns whether an event was sent.
    pub fn maybe_emit(&mut self, task: &mut TransferTask, now: Instant) -> bool {
        let due = match task.last_progress_emit() {
            Some(last) => now.saturating_duration_since(last) > self.interval,
            None => true,
        };
        if !due {
            return false;
        }
        let progress = Self::current(task);
        self.emit(task, progress, now);
        true
    }

    /// Emit the current progress unconditionally.
    pub fn emit_now(&mut self, task: &mut TransferTask) {
        let progress = Self::current(task);
        self.emit(task, progress, Instant::now());
    }

    /// Emit 100 % unless that was already the last event.
    pub fn emit_complete(&mut self, task: &mut TransferTask) {
        if self.last_emitted != Some(Progress::Percent(100)) {
            self.emit(task, Progress::Percent(100), Instant::now());
        }
    }

    pub fn last_emitted(&self) -> Option<Progress> {
        self.last_emitted
    }
}
