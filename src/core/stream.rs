//! Streaming plumbing and transfer options for reelvault
//!
//! Provides the AsyncRead view of an HTTP response body and the tunables
//! shared by both engines.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, ReadBuf};

use crate::core::progress::DEFAULT_PROGRESS_INTERVAL;

/// Default buffer and chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// A response body readable as a byte stream
pub enum BodyStream {
    /// HTTP body stream from reqwest
    Http(Box<dyn AsyncRead + Send + Unpin>),
}

impl AsyncRead for BodyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            BodyStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

/// Creates a BodyStream from an HTTP response
pub fn create_body_stream(response: reqwest::Response) -> BodyStream {
    let stream = Box::new(tokio_util::io::StreamReader::new(
        response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    ));
    BodyStream::Http(stream)
}

/// Tunables for a transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Download buffer size and upload chunk size
    pub chunk_size: usize,

    /// Minimum time between two download progress events
    pub progress_interval: Duration,

    /// TCP connect timeout for every request
    pub connect_timeout: Duration,

    /// Upper bound for a single body read or a single upload request
    pub read_timeout: Duration,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            user_agent: format!("reelvault/{}", env!("REELVAULT_VERSION")),
        }
    }
}

impl TransferConfig {
    /// Build the HTTP client every request of a controller goes through.
    pub fn build_client(&self) -> crate::Result<reqwest::Client> {
        reqwest::ClientBuilder::new()
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| crate::Error::InvalidInput(format!("failed to create HTTP client: {e}")))
    }
}

/// Overwrite behavior for an existing download destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwriteBehavior {
    /// Prompt user for confirmation (default)
    #[default]
    Prompt,
    /// Force overwrite without prompting
    Force,
    /// Never overwrite, fail if file exists
    NeverOverwrite,
    /// Keep the existing bytes and continue from the end of the file
    Resume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, 1_048_576);
        assert_eq!(config.progress_interval, Duration::from_millis(500));
        assert!(config.user_agent.starts_with("reelvault/"));
    }

    #[test]
    fn test_config_partial_json() {
        let config: TransferConfig = serde_json::from_str(r#"{"chunk_size": 4096}"#).unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_build_client() {
        assert!(TransferConfig::default().build_client().is_ok());
    }
}
