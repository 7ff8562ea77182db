//! CLI-specific progress handling for reelvault
//!
//! Renders transfer events as an indicatif bar on stderr.

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use reelvault::{Progress, TaskSnapshot, TransferObserver, TransferOutcome};

/// Creates a percentage bar for CLI display
pub fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Observer that drives a progress bar
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager
    pub fn new(message: &str) -> Self {
        // Print initial message to stderr
        eprintln!("{}", message);

        Self {
            pb: create_progress_bar(),
        }
    }

    /// Manager that draws nothing, for machine-readable output
    pub fn hidden() -> Self {
        Self {
            pb: ProgressBar::hidden(),
        }
    }
}

impl TransferObserver for ProgressManager {
    fn on_progress(&self, progress: Progress) {
        match progress {
            Progress::Percent(pct) => self.pb.set_position(u64::from(pct)),
            Progress::Bytes(bytes) => self.pb.set_message(format!("{} received", HumanBytes(bytes))),
        }
    }

    fn on_terminal(&self, outcome: &TransferOutcome, snapshot: &TaskSnapshot) {
        match outcome {
            TransferOutcome::Completed => {
                self.pb.finish_with_message(format!(
                    "✅ Transfer completed! ({})",
                    HumanBytes(snapshot.transferred_bytes)
                ));
            }
            TransferOutcome::Failed { reason } => {
                self.pb.abandon_with_message(format!("❌ {reason}"));
            }
            TransferOutcome::Cancelled => {
                self.pb.abandon_with_message(format!(
                    "⏹  Cancelled at {} bytes",
                    snapshot.transferred_bytes
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelvault::{Direction, TransferState};

    fn snapshot(transferred: u64) -> TaskSnapshot {
        TaskSnapshot {
            id: "clip.mp4".to_string(),
            direction: Direction::Download,
            total_bytes: 1000,
            transferred_bytes: transferred,
            state: TransferState::Running,
        }
    }

    #[test]
    fn test_create_progress_bar_template() {
        let pb = create_progress_bar();
        assert_eq!(pb.length().unwrap(), 100);
        pb.set_position(42);
        pb.finish();
    }

    #[test]
    fn test_percent_moves_bar() {
        let manager = ProgressManager::hidden();
        manager.on_progress(Progress::Percent(37));
        assert_eq!(manager.pb.position(), 37);
    }

    #[test]
    fn test_unknown_total_leaves_position() {
        let manager = ProgressManager::hidden();
        manager.on_progress(Progress::Bytes(2048));
        assert_eq!(manager.pb.position(), 0);
        assert!(manager.pb.message().contains("KiB"));
    }

    #[test]
    fn test_terminal_finishes_bar() {
        let manager = ProgressManager::hidden();
        manager.on_terminal(&TransferOutcome::Completed, &snapshot(1000));
        assert!(manager.pb.is_finished());
    }
}
