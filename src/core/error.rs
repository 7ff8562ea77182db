//! Error types for the reelvault transfer engine
//!
//! Every failure an engine can hit is one of these variants. Engines report
//! cancellation as an outcome; only the one-shot helpers in the crate root
//! turn it into [`Error::Cancelled`].

use std::fmt;

/// Main error type for reelvault operations
#[derive(Debug)]
pub enum Error {
    /// Connect, read or write failure on the HTTP connection, including timeouts
    NetworkError(String),

    /// The server answered with a non-success status
    HttpError(String),

    /// The server answered successfully but broke the range protocol
    /// (missing body, malformed or mismatched content-range, ignored range)
    ProtocolViolation(String),

    /// Local sink could not be opened, positioned or written
    SinkError(std::io::Error),

    /// Local upload source could not be opened or read
    SourceError(std::io::Error),

    /// Invalid configuration, parameters or state transition
    InvalidInput(String),

    /// Other local I/O error
    IoError(std::io::Error),

    /// A background transfer ended in failure; carries its reported reason
    TransferFailed(String),

    /// A transfer was cancelled before it completed
    Cancelled { id: String, transferred_bytes: u64 },
}

impl Error {
    /// True for failures that originate on the network side of the transfer.
    ///
    /// Protocol violations count as network errors: the peer sent something
    /// the engine cannot use.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(_) | Error::HttpError(_) | Error::ProtocolViolation(_)
        )
    }

    /// True for failures of local storage (sink or source).
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::SinkError(_) | Error::SourceError(_) | Error::IoError(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NetworkError(msg) => {
                write!(f, "Network error: {}", msg)
            }
            Error::HttpError(msg) => {
                write!(f, "HTTP error: {}", msg)
            }
            Error::ProtocolViolation(msg) => {
                write!(f, "Protocol violation: {}", msg)
            }
            Error::SinkError(err) => {
                write!(f, "Sink error: {}", err)
            }
            Error::SourceError(err) => {
                write!(f, "Source error: {}", err)
            }
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {}", msg)
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {}", err)
            }
            Error::TransferFailed(reason) => {
                write!(f, "Transfer failed: {}", reason)
            }
            Error::Cancelled { id, transferred_bytes } => {
                write!(f, "Transfer {} cancelled at {} bytes", id, transferred_bytes)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SinkError(err) | Error::SourceError(err) | Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Error::HttpError(format!("{status}"))
        } else if err.is_builder() {
            Error::InvalidInput(err.to_string())
        } else {
            Error::NetworkError(err.to_string())
        }
    }
}

/// Convenience result type for reelvault operations
pub type Result<T> = std::result::Result<T, Error>;
