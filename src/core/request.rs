//! Transfer requests accepted by the controller
//!
//! A request says what to move and where; the direction tag picks the engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::task::Direction;

/// Download of a remote object into a local file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
    /// Bytes of `destination` already committed by an earlier attempt
    pub resume_from: u64,
}

impl DownloadRequest {
    /// Fresh download: the destination is truncated before the first request.
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            resume_from: 0,
        }
    }

    /// Continue after `offset` bytes already written to the destination.
    pub fn resume_from(mut self, offset: u64) -> Self {
        self.resume_from = offset;
        self
    }

    /// Continue from whatever the destination file already holds.
    pub async fn resume_existing(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Result<Self> {
        let destination = destination.into();
        let offset = match tokio::fs::metadata(&destination).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(Error::SinkError(e)),
        };
        Ok(Self::new(url, destination).resume_from(offset))
    }

    /// Task identifier: the destination file name
    pub fn task_id(&self) -> String {
        file_name_of(&self.destination)
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.url)
    }
}

/// Where upload chunks go and on whose behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Full URL of the chunk endpoint, e.g. `https://host:10000/upload`
    pub endpoint: String,
    /// Opaque session key of the signed-in user
    pub session_id: String,
    /// Destination channel the video is archived into
    pub chat_id: String,
}

impl UploadTarget {
    pub fn new(
        endpoint: impl Into<String>,
        session_id: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            session_id: session_id.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.endpoint)?;
        if self.chat_id.is_empty() {
            return Err(Error::InvalidInput("upload chat id is empty".to_string()));
        }
        Ok(())
    }
}

/// Upload of a local file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub source: PathBuf,
    pub target: UploadTarget,
}

impl UploadRequest {
    pub fn new(source: impl Into<PathBuf>, target: UploadTarget) -> Self {
        Self {
            source: source.into(),
            target,
        }
    }
}

/// Direction-tagged request accepted by [`crate::TransferController::start`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "direction")]
pub enum TransferRequest {
    Download(DownloadRequest),
    Upload(UploadRequest),
}

impl TransferRequest {
    pub fn direction(&self) -> Direction {
        match self {
            TransferRequest::Download(_) => Direction::Download,
            TransferRequest::Upload(_) => Direction::Upload,
        }
    }
}

impl From<DownloadRequest> for TransferRequest {
    fn from(request: DownloadRequest) -> Self {
        TransferRequest::Download(request)
    }
}

impl From<UploadRequest> for TransferRequest {
    fn from(request: UploadRequest) -> Self {
        TransferRequest::Upload(request)
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::InvalidInput(format!("invalid URL {url:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::InvalidInput(format!(
            "unsupported URL scheme {other:?} in {url:?}"
        ))),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Random server-side name for one upload: 32 hex characters plus the
/// original extension. It must stay the same for every chunk.
pub fn generate_upload_name(original: &str) -> String {
    let extension = match original.rfind('.') {
        Some(dot) if dot + 1 < original.len() => &original[dot..],
        _ => "",
    };
    format!("{}{}", uuid::Uuid::new_v4().simple(), extension)
}

/// Generates a local file name for a download URL
pub fn resolve_output_filename(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return "download.bin".to_string();
    };

    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string);

    // archive endpoints address videos by id: /video?file_id=<id>
    let file_id = parsed
        .query_pairs()
        .find(|(key, _)| key == "file_id")
        .map(|(_, value)| value.into_owned());

    match (segment, file_id) {
        (Some(name), Some(id)) => format!("{name}-{id}.mp4"),
        (None, Some(id)) => format!("video-{id}.mp4"),
        (Some(name), None) => name,
        (None, None) => "download.bin".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_upload_name_keeps_extension() {
        let name = generate_upload_name("holiday.mp4");
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), 32 + 4);
        assert!(name[..32].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_upload_name_without_extension() {
        assert_eq!(generate_upload_name("README").len(), 32);
        assert_eq!(generate_upload_name("trailing.").len(), 32);
    }

    #[test]
    fn test_generate_upload_name_is_random() {
        assert_ne!(generate_upload_name("a.mp4"), generate_upload_name("a.mp4"));
    }

    #[test]
    fn test_resolve_output_filename() {
        assert_eq!(
            resolve_output_filename("https://cdn.example.org/media/clip.mp4"),
            "clip.mp4"
        );
        assert_eq!(
            resolve_output_filename("https://archive.example.org:10000/video?file_id=77&session_id=5"),
            "video-77.mp4"
        );
        assert_eq!(resolve_output_filename("https://example.org/"), "download.bin");
        assert_eq!(resolve_output_filename("not a url"), "download.bin");
    }

    #[test]
    fn test_validation() {
        assert!(DownloadRequest::new("https://example.org/a", "a").validate().is_ok());
        assert!(DownloadRequest::new("ftp://example.org/a", "a").validate().is_err());
        assert!(DownloadRequest::new("", "a").validate().is_err());

        let target = UploadTarget::new("http://localhost:10000/upload", "42", "");
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_task_id_and_direction() {
        let request = DownloadRequest::new("https://example.org/a", "/tmp/videos/clip.mp4");
        assert_eq!(request.task_id(), "clip.mp4");
        let request: TransferRequest = request.resume_from(10).into();
        assert_eq!(request.direction(), Direction::Download);
    }

    #[tokio::test]
    async fn test_resume_existing_reads_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.mp4");
        std::fs::write(&path, vec![0u8; 123]).unwrap();

        let request = DownloadRequest::resume_existing("https://example.org/a", &path)
            .await
            .unwrap();
        assert_eq!(request.resume_from, 123);

        let missing = DownloadRequest::resume_existing("https://example.org/a", dir.path().join("x"))
            .await
            .unwrap();
        assert_eq!(missing.resume_from, 0);
    }
}
