//! Offset chunk upload engine
//!
//! Sends a local object as a sequence of POST requests, one per chunk, each
//! carrying its byte range within the whole object. The receiving side
//! reassembles chunks by the per-upload file name, so that name is fixed
//! before the first chunk and never changes.

use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Client;

use crate::core::chunk::ChunkBuffer;
use crate::core::engine::TransferContext;
use crate::core::error::{Error, Result};
use crate::core::progress::TransferOutcome;
use crate::core::range::ContentRange;
use crate::core::request::{generate_upload_name, UploadTarget};
use crate::core::sink::UploadSource;
use crate::core::stream::TransferConfig;
use crate::core::task::TransferTask;

/// Header carrying the signed-in session key
pub const SESSION_ID_HEADER: &str = "session_id";
/// Header carrying the destination channel
pub const CHAT_ID_HEADER: &str = "chat_id";
/// Header carrying the stable per-upload file name
pub const FILE_NAME_HEADER: &str = "file_name";
/// Header carrying the name of the file on the device
pub const ORIGINAL_FILENAME_HEADER: &str = "original_filename";

/// Uploads one source to one endpoint
pub struct UploadEngine {
    client: Client,
    target: UploadTarget,
    source: UploadSource,
    upload_name: String,
    request_timeout: Duration,
}

impl UploadEngine {
    /// Prepare an upload. The server-side file name is drawn here, once.
    pub fn new(client: Client, target: UploadTarget, source: UploadSource, config: &TransferConfig) -> Self {
        let upload_name = generate_upload_name(source.name());
        Self {
            client,
            target,
            source,
            upload_name,
            request_timeout: config.read_timeout,
        }
    }

    /// Name every chunk of this upload is sent under.
    pub fn upload_name(&self) -> &str {
        &self.upload_name
    }

    pub fn source_len(&self) -> u64 {
        self.source.len()
    }

    /// Send every chunk in order. Stops at the first rejected chunk; the
    /// task then covers only the chunks the server accepted.
    pub async fn run(&mut self, task: &mut TransferTask, ctx: &mut TransferContext) -> Result<TransferOutcome> {
        let total = self.source.len();
        task.set_total(total)?;
        ctx.publish(task);
        info!(
            "Uploading {} ({total} bytes) to {} as {}",
            self.source.name(),
            self.target.endpoint,
            self.upload_name
        );

        let mut chunk = ChunkBuffer::new(task.chunk_size(), task.transferred_bytes());
        let mut sent = 0u32;
        while chunk.offset() < total {
            if ctx.cancel.is_cancelled() {
                warn!(
                    "Upload of {} cancelled after {sent} chunks ({} bytes)",
                    self.upload_name,
                    task.transferred_bytes()
                );
                return Ok(TransferOutcome::Cancelled);
            }

            let remaining = total - chunk.offset();
            let want = usize::try_from(remaining).unwrap_or(usize::MAX);
            let n = chunk
                .fill_from(self.source.reader_mut(), want)
                .await
                .map_err(Error::SourceError)?;
            if n == 0 {
                return Err(Error::SourceError(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("source ended at {} of {total} bytes", chunk.offset()),
                )));
            }

            let range = ContentRange::for_chunk(chunk.offset(), n as u64, total);
            self.send_chunk(&range, Bytes::copy_from_slice(chunk.filled()))
                .await?;

            task.advance(chunk.commit_sent() as u64)?;
            sent += 1;
            ctx.reporter.emit_now(task);
            ctx.publish(task);
        }

        ctx.reporter.emit_complete(task);
        info!("Upload of {} complete: {sent} chunks", self.upload_name);
        Ok(TransferOutcome::Completed)
    }

    async fn send_chunk(&self, range: &ContentRange, body: Bytes) -> Result<()> {
        debug!("POST {} Content-Range: {range}", self.target.endpoint);
        let response = self
            .client
            .post(&self.target.endpoint)
            .timeout(self.request_timeout)
            .header(CONTENT_RANGE, range.to_string())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(SESSION_ID_HEADER, &self.target.session_id)
            .header(CHAT_ID_HEADER, &self.target.chat_id)
            .header(FILE_NAME_HEADER, &self.upload_name)
            .header(ORIGINAL_FILENAME_HEADER, self.source.name())
            .body(body)
            .send()
            .await
            .map_err(|e| Error::NetworkError(format!("chunk {range} not sent: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpError(format!("chunk {range} rejected: {status}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::{ChannelObserver, Progress, ProgressReporter, TransferEvent};
    use crate::core::task::{Direction, TransferState};
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MIB: usize = 1024 * 1024;

    #[derive(Debug, Clone)]
    struct ReceivedChunk {
        range: String,
        file_name: String,
        len: usize,
    }

    /// Accepts chunks, answering `fail_status` from the `fail_at`-th one on
    async fn mount_upload_server(
        server: &MockServer,
        fail_at: Option<usize>,
        fail_status: u16,
    ) -> Arc<Mutex<Vec<ReceivedChunk>>> {
        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&received);
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(header("session_id", "4242"))
            .and(header("chat_id", "-100200"))
            .and(header("original_filename", "holiday.mp4"))
            .respond_with(move |req: &wiremock::Request| {
                let header = |name: &str| {
                    req.headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                let mut seen = seen.lock().unwrap();
                seen.push(ReceivedChunk {
                    range: header("content-range"),
                    file_name: header("file_name"),
                    len: req.body.len(),
                });
                match fail_at {
                    Some(k) if seen.len() >= k => ResponseTemplate::new(fail_status),
                    _ => ResponseTemplate::new(200).set_body_string("OK"),
                }
            })
            .mount(server)
            .await;
        received
    }

    fn context(cancel: CancellationToken) -> (TransferContext, tokio::sync::mpsc::UnboundedReceiver<TransferEvent>) {
        let (observer, rx) = ChannelObserver::new();
        let reporter = ProgressReporter::new(Arc::new(observer), Duration::from_millis(500));
        let (status, _) = watch::channel(
            TransferTask::new("placeholder", Direction::Upload, 1, 0)
                .unwrap()
                .snapshot(),
        );
        (TransferContext::new(cancel, reporter, status), rx)
    }

    fn engine(server: &MockServer, data: Vec<u8>) -> UploadEngine {
        let len = data.len() as u64;
        let source = UploadSource::from_reader(std::io::Cursor::new(data), len, "holiday.mp4");
        let target = UploadTarget::new(format!("{}/upload", server.uri()), "4242", "-100200");
        UploadEngine::new(Client::new(), target, source, &TransferConfig::default())
    }

    fn running_task(id: &str) -> TransferTask {
        let mut task = TransferTask::new(id, Direction::Upload, MIB, 0).unwrap();
        task.transition(TransferState::Running).unwrap();
        task
    }

    #[tokio::test]
    async fn test_upload_sends_contiguous_chunks() {
        let server = MockServer::start().await;
        let received = mount_upload_server(&server, None, 500).await;

        let mut engine = engine(&server, vec![9u8; 3_670_016]);
        let upload_name = engine.upload_name().to_string();
        assert!(upload_name.ends_with(".mp4"));

        let mut task = running_task(&upload_name);
        let (mut ctx, mut events) = context(CancellationToken::new());
        let outcome = engine.run(&mut task, &mut ctx).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(task.transferred_bytes(), 3_670_016);

        let received = received.lock().unwrap();
        let ranges: Vec<&str> = received.iter().map(|c| c.range.as_str()).collect();
        assert_eq!(
            ranges,
            vec![
                "bytes 0-1048575/3670016",
                "bytes 1048576-2097151/3670016",
                "bytes 2097152-3145727/3670016",
                "bytes 3145728-3670015/3670016",
            ]
        );
        assert!(received.iter().all(|c| c.file_name == upload_name));
        assert_eq!(received.last().unwrap().len, 524_288);

        let mut progress = Vec::new();
        while let Ok(TransferEvent::Progress(p)) = events.try_recv() {
            progress.push(p);
        }
        assert_eq!(
            progress,
            vec![
                Progress::Percent(28),
                Progress::Percent(57),
                Progress::Percent(85),
                Progress::Percent(100),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_chunk_stops_upload() {
        let server = MockServer::start().await;
        let received = mount_upload_server(&server, Some(2), 503).await;

        let mut engine = engine(&server, vec![1u8; 3 * MIB + 10]);
        let mut task = running_task(engine.upload_name());
        let (mut ctx, _events) = context(CancellationToken::new());
        let result = engine.run(&mut task, &mut ctx).await;

        assert!(matches!(result, Err(Error::HttpError(_))));
        assert_eq!(received.lock().unwrap().len(), 2);
        assert_eq!(task.transferred_bytes(), MIB as u64);
    }

    #[tokio::test]
    async fn test_cancel_checked_before_each_chunk() {
        let server = MockServer::start().await;
        let received = mount_upload_server(&server, None, 500).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut engine = engine(&server, vec![1u8; 2 * MIB]);
        let mut task = running_task(engine.upload_name());
        let (mut ctx, _events) = context(cancel);
        let outcome = engine.run(&mut task, &mut ctx).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Cancelled);
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(task.transferred_bytes(), 0);
    }

    #[tokio::test]
    async fn test_short_source_is_source_error() {
        let server = MockServer::start().await;
        let received = mount_upload_server(&server, None, 500).await;

        // declares more bytes than it holds
        let source = UploadSource::from_reader(std::io::Cursor::new(vec![0u8; 100]), 200, "holiday.mp4");
        let target = UploadTarget::new(format!("{}/upload", server.uri()), "4242", "-100200");
        let mut engine = UploadEngine::new(Client::new(), target, source, &TransferConfig::default());
        let mut task = running_task(engine.upload_name());
        let (mut ctx, _events) = context(CancellationToken::new());
        let result = engine.run(&mut task, &mut ctx).await;

        assert!(matches!(result, Err(Error::SourceError(_))));
        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(received.lock().unwrap()[0].range, "bytes 0-99/200");
        assert_eq!(task.transferred_bytes(), 100);
    }

    #[tokio::test]
    async fn test_empty_source_completes_without_requests() {
        let server = MockServer::start().await;
        let received = mount_upload_server(&server, None, 500).await;

        let mut engine = engine(&server, Vec::new());
        let mut task = running_task(engine.upload_name());
        let (mut ctx, mut events) = context(CancellationToken::new());
        let outcome = engine.run(&mut task, &mut ctx).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Completed);
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(
            events.try_recv().unwrap(),
            TransferEvent::Progress(Progress::Percent(100))
        );
    }
}
