//! Core library modules for reelvault
//!
//! Leaves first: chunk and range codec, task model, progress reporting,
//! the two engines, and the controller that runs them.

pub mod chunk;
pub mod controller;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod progress;
pub mod range;
pub mod request;
pub mod sink;
pub mod stream;
pub mod task;
pub mod uploader;

// Re-export main types for internal use
pub use controller::TransferController;
pub use request::{generate_upload_name, resolve_output_filename};
