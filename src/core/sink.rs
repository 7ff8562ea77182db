//! Local ends of a transfer
//!
//! A download writes into a [`Sink`] that is reopened for every response and
//! addressed by absolute offset. An upload reads once, start to end, from an
//! [`UploadSource`] of known length.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

/// Random-access byte store a download writes into
pub trait Sink: Send + Sync {
    type Handle: AsyncWrite + AsyncSeek + Send + Unpin;

    /// Open for read/write without truncating, so earlier bytes survive.
    fn open(&self) -> impl Future<Output = io::Result<Self::Handle>> + Send;
}

/// File-backed sink
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Sink for a fresh download: the file is created or truncated now.
    pub async fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        File::create(&path).await?;
        Ok(Self { path })
    }

    /// Sink continuing a previous download. Returns the sink together with
    /// the number of bytes already on disk, which is where the download
    /// resumes.
    pub async fn resume(path: impl Into<PathBuf>) -> io::Result<(Self, u64)> {
        let path = path.into();
        let existing = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                File::create(&path).await?;
                0
            }
            Err(e) => return Err(e),
        };
        Ok((Self { path }, existing))
    }

    /// Sink over an existing file, without touching its content.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    type Handle = File;

    async fn open(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await
    }
}

/// Finite byte source of known length for an upload
pub struct UploadSource {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    len: u64,
    name: String,
}

impl UploadSource {
    /// Open a local file. The source name is the file name component.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self {
            reader: Box::new(file),
            len,
            name,
        })
    }

    /// Wrap any reader that will yield exactly `len` bytes.
    pub fn from_reader(
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        len: u64,
        name: impl Into<String>,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            len,
            name: name.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Original name, forwarded to the server as metadata
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn reader_mut(&mut self) -> &mut (dyn AsyncRead + Send + Sync + Unpin) {
        &mut *self.reader
    }
}

impl std::fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSource")
            .field("len", &self.len)
            .field("name", &self.name)
            .finish()
    }
}
