//! # Reelvault Library
//!
//! Resumable chunked HTTP transfers for archiving video files: downloads
//! that survive server-side stream closes by re-requesting the remainder
//! with byte ranges, and uploads split into fixed-size chunks that each
//! carry their byte range.
//!
//! ## Features
//!
//! - **Range-resume downloads**: `Range: bytes=<offset>-` until the whole
//!   object is on disk, continuing from a partial file if asked to
//! - **Chunked uploads**: sequential, explicitly addressed chunks under one
//!   stable per-upload name
//! - **Cooperative cancellation**: cancel returns once the background task
//!   has exited and no request follows it
//! - **Progress tracking**: throttled percentages through a
//!   [`TransferObserver`]
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     reelvault::download("https://archive.example.org/video?file_id=7", "clip.mp4").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Controller
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reelvault::{ChannelObserver, DownloadRequest, TransferConfig, TransferController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (observer, mut events) = ChannelObserver::new();
//!     let controller = TransferController::new(TransferConfig::default(), Arc::new(observer))?;
//!
//!     controller
//!         .start(DownloadRequest::new("https://archive.example.org/video?file_id=7", "clip.mp4"))
//!         .await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!         if matches!(event, reelvault::TransferEvent::Terminal { .. }) {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

pub use crate::core::error::{Error, Result};
pub use crate::core::progress::{
    ChannelObserver, FnObserver, NoopObserver, Progress, TransferEvent, TransferObserver,
    TransferOutcome,
};
pub use crate::core::request::{
    resolve_output_filename, DownloadRequest, TransferRequest, UploadRequest, UploadTarget,
};
pub use crate::core::stream::{OverwriteBehavior, TransferConfig, DEFAULT_CHUNK_SIZE};
pub use crate::core::task::{Direction, TaskSnapshot, TransferState};
pub use crate::core::TransferController;

pub mod core;

// C-compatible FFI bindings (optional)
#[cfg(feature = "c-bindings")]
pub mod ffi;

/// Download `url` into `dest`, truncating any existing file.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// reelvault::download("https://cdn.example.org/media/clip.mp4", "clip.mp4").await?;
/// # Ok(())
/// # }
/// ```
pub async fn download(url: &str, dest: impl AsRef<Path>) -> Result<TaskSnapshot> {
    run_to_end(DownloadRequest::new(url, dest.as_ref()), Arc::new(NoopObserver)).await
}

/// Download with a progress callback
///
/// The callback receives every [`Progress`] event; it runs on the runtime's
/// worker threads and should return quickly.
pub async fn download_with_progress<F>(url: &str, dest: impl AsRef<Path>, progress: F) -> Result<TaskSnapshot>
where
    F: Fn(Progress) + Send + Sync + 'static,
{
    let observer = FnObserver::new(progress, |_: &TransferOutcome, _: &TaskSnapshot| {});
    run_to_end(DownloadRequest::new(url, dest.as_ref()), Arc::new(observer)).await
}

/// Upload the file at `source` to `target` in default-sized chunks.
pub async fn upload(source: impl AsRef<Path>, target: UploadTarget) -> Result<TaskSnapshot> {
    run_to_end(UploadRequest::new(source.as_ref(), target), Arc::new(NoopObserver)).await
}

async fn run_to_end(request: impl Into<TransferRequest>, observer: Arc<dyn TransferObserver>) -> Result<TaskSnapshot> {
    let controller = TransferController::new(TransferConfig::default(), observer)?;
    controller.start(request).await?;
    let finished = controller.wait().await;
    controller.shutdown().await;
    into_result(finished)
}

/// Map a finished transfer onto the helpers' return value.
fn into_result(finished: Option<(TaskSnapshot, TransferOutcome)>) -> Result<TaskSnapshot> {
    match finished {
        Some((snapshot, TransferOutcome::Completed)) => Ok(snapshot),
        Some((_, TransferOutcome::Failed { reason })) => Err(Error::TransferFailed(reason)),
        Some((snapshot, TransferOutcome::Cancelled)) => Err(Error::Cancelled {
            id: snapshot.id,
            transferred_bytes: snapshot.transferred_bytes,
        }),
        None => Err(Error::TransferFailed("transfer ended without a result".to_string())),
    }
}
