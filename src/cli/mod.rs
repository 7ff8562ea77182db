//! CLI-specific utilities for reelvault
//!
//! This module contains code specific to the command-line interface,
//! separate from the core library functionality.

pub mod overwrite;
pub mod progress;

pub use overwrite::check_overwrite_permission;
pub use progress::ProgressManager;
