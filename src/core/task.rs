//! Transfer task model and its state machine
//!
//! A [`TransferTask`] is owned by the background execution context running
//! the engine. Everything else sees it through [`TaskSnapshot`]s.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Which way the bytes flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Server to local sink, resumed with byte-range requests
    Download,
    /// Local source to server, one addressed request per chunk
    Upload,
}

/// Lifecycle state of a transfer task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Idle,
    Running,
    Cancelling,
    Completed,
    Failed,
    /// Clean stop requested by the owner of the controller
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }

    /// Whether a transfer in this state still occupies the controller.
    pub fn is_active(self) -> bool {
        matches!(self, TransferState::Running | TransferState::Cancelling)
    }

    fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Cancelling)
                | (Running, Completed)
                | (Running, Failed)
                | (Cancelling, Completed)
                | (Cancelling, Failed)
                | (Cancelling, Cancelled)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::Running => "running",
            TransferState::Cancelling => "cancelling",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of a task, safe to hand to observers and other threads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub direction: Direction,
    /// `-1` while unknown
    pub total_bytes: i64,
    pub transferred_bytes: u64,
    pub state: TransferState,
}

impl TaskSnapshot {
    /// Known total size, if any.
    pub fn total(&self) -> Option<u64> {
        u64::try_from(self.total_bytes).ok()
    }
}

/// One transfer, from acceptance to its terminal state
#[derive(Debug)]
pub struct TransferTask {
    id: String,
    direction: Direction,
    total_bytes: i64,
    transferred_bytes: u64,
    chunk_size: usize,
    state: TransferState,
    last_progress_emit: Option<Instant>,
}

impl TransferTask {
    /// Create an idle task. `start_offset` is the number of bytes already
    /// committed by a previous attempt.
    pub fn new(
        id: impl Into<String>,
        direction: Direction,
        chunk_size: usize,
        start_offset: u64,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be greater than zero".to_string()));
        }
        Ok(Self {
            id: id.into(),
            direction,
            total_bytes: -1,
            transferred_bytes: start_offset,
            chunk_size,
            state: TransferState::Idle,
            last_progress_emit: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    pub fn total_bytes(&self) -> i64 {
        self.total_bytes
    }

    pub fn total(&self) -> Option<u64> {
        u64::try_from(self.total_bytes).ok()
    }

    pub fn is_running(&self) -> bool {
        self.state == TransferState::Running
    }

    /// Move to `next`, rejecting anything the state machine does not allow.
    pub fn transition(&mut self, next: TransferState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidInput(format!(
                "illegal transfer state transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Record the object's total size.
    ///
    /// Only the first known value is kept; a total smaller than what is
    /// already committed is rejected.
    pub fn set_total(&mut self, total: u64) -> Result<()> {
        if self.total_bytes >= 0 {
            return Ok(());
        }
        if total < self.transferred_bytes {
            return Err(Error::ProtocolViolation(format!(
                "reported total {total} is smaller than the {} bytes already transferred",
                self.transferred_bytes
            )));
        }
        self.total_bytes = i64::try_from(total)
            .map_err(|_| Error::ProtocolViolation(format!("total size {total} out of range")))?;
        Ok(())
    }

    /// Commit `bytes` more bytes as durably transferred.
    pub fn advance(&mut self, bytes: u64) -> Result<()> {
        let next = self.transferred_bytes + bytes;
        if let Some(total) = self.total() {
            if next > total {
                return Err(Error::ProtocolViolation(format!(
                    "transfer would reach {next} bytes, past the {total}-byte total"
                )));
            }
        }
        self.transferred_bytes = next;
        Ok(())
    }

    /// `floor(transferred * 100 / total)`, when the total is known and non-zero.
    pub fn percent(&self) -> Option<u8> {
        match self.total() {
            Some(0) | None => None,
            Some(total) => {
                let pct = (self.transferred_bytes as u128 * 100) / total as u128;
                Some(pct.min(100) as u8)
            }
        }
    }

    /// True once every byte of a known, non-empty object is committed.
    pub fn is_complete(&self) -> bool {
        matches!(self.total(), Some(total) if total > 0 && self.transferred_bytes >= total)
    }

    pub fn last_progress_emit(&self) -> Option<Instant> {
        self.last_progress_emit
    }

    pub fn mark_progress_emitted(&mut self, at: Instant) {
        self.last_progress_emit = Some(at);
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            direction: self.direction,
            total_bytes: self.total_bytes,
            transferred_bytes: self.transferred_bytes,
            state: self.state,
        }
    }
}
