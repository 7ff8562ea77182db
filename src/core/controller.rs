//! Transfer session controller
//!
//! Owns at most one active transfer: builds its task, spawns the engine on
//! the tokio runtime, cancels it on request and reports exactly one
//! terminal event per task to the observer.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use log::{debug, error, info};
use reqwest::Client;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::downloader::DownloadEngine;
use crate::core::engine::{execute, finalize, Engine, TransferContext};
use crate::core::error::{Error, Result};
use crate::core::progress::{ProgressReporter, TransferObserver, TransferOutcome};
use crate::core::request::{DownloadRequest, TransferRequest, UploadRequest};
use crate::core::sink::{FileSink, UploadSource};
use crate::core::stream::TransferConfig;
use crate::core::task::{Direction, TaskSnapshot, TransferState, TransferTask};
use crate::core::uploader::UploadEngine;

/// Terminal result handed back by the background task
#[derive(Debug, Clone)]
struct Finished {
    snapshot: TaskSnapshot,
    outcome: TransferOutcome,
}

struct ActiveTransfer {
    handle: JoinHandle<Finished>,
}

/// Read side of the current task
struct Monitor {
    status: watch::Receiver<TaskSnapshot>,
    cancel: CancellationToken,
}

/// Runs one transfer at a time on behalf of a host application.
///
/// All methods take `&self`; the controller can be shared behind an `Arc`
/// between the code that starts transfers and the code that cancels them.
pub struct TransferController {
    config: TransferConfig,
    client: Mutex<Option<Client>>,
    observer: Arc<dyn TransferObserver>,
    active: tokio::sync::Mutex<Option<ActiveTransfer>>,
    monitor: Mutex<Option<Monitor>>,
    finished: Mutex<Option<Finished>>,
}

impl TransferController {
    /// Create a controller with its own HTTP client.
    pub fn new(config: TransferConfig, observer: Arc<dyn TransferObserver>) -> Result<Self> {
        if config.chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be greater than zero".to_string()));
        }
        let client = config.build_client()?;
        Ok(Self {
            config,
            client: Mutex::new(Some(client)),
            observer,
            active: tokio::sync::Mutex::new(None),
            monitor: Mutex::new(None),
            finished: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Start a transfer in the background.
    ///
    /// Returns `Ok(false)` without doing anything when a transfer is still
    /// running or cancelling. Errors are reported for requests that cannot
    /// be started at all (bad URL, unreadable source, controller shut down).
    pub async fn start(&self, request: impl Into<TransferRequest>) -> Result<bool> {
        if self.state().is_active() {
            debug!("Transfer already active, ignoring start request");
            return Ok(false);
        }

        let mut active = self.active.lock().await;
        if matches!(active.as_ref(), Some(transfer) if !transfer.handle.is_finished()) {
            return Ok(false);
        }
        self.reap(&mut active).await;

        let client = lock(&self.client)
            .clone()
            .ok_or_else(|| Error::InvalidInput("controller has been shut down".to_string()))?;

        let (mut task, engine) = match request.into() {
            TransferRequest::Download(request) => self.prepare_download(client, request).await?,
            TransferRequest::Upload(request) => self.prepare_upload(client, request).await?,
        };
        task.transition(TransferState::Running)?;

        let cancel = CancellationToken::new();
        let (status, receiver) = watch::channel(task.snapshot());
        let reporter = ProgressReporter::new(Arc::clone(&self.observer), self.config.progress_interval);
        let ctx = TransferContext::new(cancel.clone(), reporter, status);

        info!("Starting {:?} transfer {}", task.direction(), task.id());
        let handle = tokio::spawn(run_transfer(engine, task, ctx, Arc::clone(&self.observer)));

        *lock(&self.monitor) = Some(Monitor {
            status: receiver,
            cancel,
        });
        *lock(&self.finished) = None;
        *active = Some(ActiveTransfer { handle });
        Ok(true)
    }

    async fn prepare_download(
        &self,
        client: Client,
        request: DownloadRequest,
    ) -> Result<(TransferTask, Engine<FileSink>)> {
        request.validate()?;
        let task = TransferTask::new(
            request.task_id(),
            Direction::Download,
            self.config.chunk_size,
            request.resume_from,
        )?;

        let sink = if request.resume_from == 0 {
            FileSink::create(&request.destination)
                .await
                .map_err(Error::SinkError)?
        } else {
            let existing = tokio::fs::metadata(&request.destination)
                .await
                .map_err(Error::SinkError)?
                .len();
            if existing < request.resume_from {
                return Err(Error::InvalidInput(format!(
                    "cannot resume {} at {} bytes: file holds only {existing}",
                    request.destination.display(),
                    request.resume_from
                )));
            }
            FileSink::at(&request.destination)
        };

        let engine = DownloadEngine::new(client, request.url, sink, &self.config);
        Ok((task, Engine::Download(engine)))
    }

    async fn prepare_upload(
        &self,
        client: Client,
        request: UploadRequest,
    ) -> Result<(TransferTask, Engine<FileSink>)> {
        request.target.validate()?;
        let source = UploadSource::open(&request.source)
            .await
            .map_err(Error::SourceError)?;
        let engine = UploadEngine::new(client, request.target, source, &self.config);
        let task = TransferTask::new(engine.upload_name(), Direction::Upload, self.config.chunk_size, 0)?;
        Ok((task, Engine::Upload(engine)))
    }

    /// Cancel the active transfer and wait for its background task to exit.
    ///
    /// No-op when nothing is running or a cancellation is already under way.
    pub async fn cancel(&self) {
        let token = {
            let monitor = lock(&self.monitor);
            match monitor.as_ref() {
                Some(m) if m.status.borrow().state.is_active() && !m.cancel.is_cancelled() => {
                    m.cancel.clone()
                }
                _ => return,
            }
        };

        info!("Cancelling active transfer");
        token.cancel();
        let mut active = self.active.lock().await;
        self.reap(&mut active).await;
    }

    /// Wait for the current transfer to end and return its final snapshot
    /// and outcome. `None` if no transfer was ever started.
    pub async fn wait(&self) -> Option<(TaskSnapshot, TransferOutcome)> {
        let mut active = self.active.lock().await;
        self.reap(&mut active).await;
        lock(&self.finished)
            .clone()
            .map(|finished| (finished.snapshot, finished.outcome))
    }

    /// Cancel whatever is running and release the HTTP client. Later
    /// `start` calls fail.
    pub async fn shutdown(&self) {
        self.cancel().await;
        let mut active = self.active.lock().await;
        self.reap(&mut active).await;
        if lock(&self.client).take().is_some() {
            debug!("Transfer controller shut down");
        }
    }

    /// Latest view of the active or last task.
    pub fn snapshot(&self) -> Option<TaskSnapshot> {
        let monitor = lock(&self.monitor);
        let monitor = monitor.as_ref()?;
        let mut snapshot = monitor.status.borrow().clone();
        if snapshot.state == TransferState::Running && monitor.cancel.is_cancelled() {
            snapshot.state = TransferState::Cancelling;
        }
        Some(snapshot)
    }

    /// `Idle` until the first transfer is started.
    pub fn state(&self) -> TransferState {
        self.snapshot()
            .map(|snapshot| snapshot.state)
            .unwrap_or(TransferState::Idle)
    }

    async fn reap(&self, active: &mut Option<ActiveTransfer>) {
        let Some(transfer) = active.as_mut() else {
            return;
        };
        // The handle stays in `active` until it resolves, so a dropped waiter
        // leaves the task joinable by the next caller.
        let joined = (&mut transfer.handle).await;
        *active = None;
        match joined {
            Ok(finished) => *lock(&self.finished) = Some(finished),
            Err(e) => error!("Transfer task did not finish cleanly: {e}"),
        }
    }
}

impl Drop for TransferController {
    fn drop(&mut self) {
        if let Some(monitor) = lock(&self.monitor).as_ref() {
            monitor.cancel.cancel();
        }
    }
}

async fn run_transfer(
    engine: Engine<FileSink>,
    mut task: TransferTask,
    mut ctx: TransferContext,
    observer: Arc<dyn TransferObserver>,
) -> Finished {
    let result = AssertUnwindSafe(execute(engine, &mut task, &mut ctx))
        .catch_unwind()
        .await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = format!("transfer panicked: {}", panic_message(&*panic));
            error!("{}: {reason}", task.id());
            TransferOutcome::Failed { reason }
        }
    };

    finalize(&mut task, &outcome);
    ctx.publish(&task);
    let snapshot = task.snapshot();
    info!(
        "Transfer {} ended {} at {} bytes",
        snapshot.id, snapshot.state, snapshot.transferred_bytes
    );
    observer.on_terminal(&outcome, &snapshot);
    Finished { snapshot, outcome }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
