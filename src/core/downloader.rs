//! Range-resume download engine
//!
//! Fetches a remote object with open-ended `Range` requests, writing each
//! response at the offset it starts from. Servers and CDNs often end a range
//! response early; the engine simply asks again for the remainder until the
//! whole object is on disk.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use tokio::io::AsyncRead;

use crate::core::chunk::ChunkBuffer;
use crate::core::engine::TransferContext;
use crate::core::error::{Error, Result};
use crate::core::progress::TransferOutcome;
use crate::core::range::{open_range, total_from_content_range, ContentRange};
use crate::core::sink::Sink;
use crate::core::stream::{create_body_stream, TransferConfig};
use crate::core::task::TransferTask;

/// How one response body ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// Server closed the body; `delivered` bytes were committed from it
    Eof { delivered: u64 },
    /// Cancellation was observed
    Cancelled,
}

/// Downloads one URL into one sink
pub struct DownloadEngine<S: Sink> {
    client: Client,
    url: String,
    sink: S,
    read_timeout: Duration,
}

impl<S: Sink> DownloadEngine<S> {
    pub fn new(client: Client, url: impl Into<String>, sink: S, config: &TransferConfig) -> Self {
        Self {
            client,
            url: url.into(),
            sink,
            read_timeout: config.read_timeout,
        }
    }

    /// Run until the object is complete, the transfer fails, or the
    /// context's token is cancelled.
    ///
    /// `task` must be `Running`; its `transferred_bytes` is the offset of the
    /// first request.
    pub async fn run(&self, task: &mut TransferTask, ctx: &mut TransferContext) -> Result<TransferOutcome> {
        info!(
            "Downloading {} into {} from offset {}",
            self.url,
            task.id(),
            task.transferred_bytes()
        );

        let mut requests = 0u32;
        loop {
            if ctx.cancel.is_cancelled() {
                return Ok(self.cancelled(task));
            }

            let offset = task.transferred_bytes();
            let range = open_range(offset);
            debug!("GET {} Range: {range}", self.url);

            let response = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Ok(self.cancelled(task));
                }
                result = self.client.get(&self.url).header(RANGE, &range).send() => {
                    result.map_err(|e| Error::NetworkError(format!("request for {range} failed: {e}")))?
                }
            };
            requests += 1;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::HttpError(format!("{status} for {range}")));
            }
            self.learn_total(&response, offset, task)?;
            ctx.publish(task);

            let end = self.stream_into_sink(response, task, ctx).await?;
            match end {
                StreamEnd::Cancelled => return Ok(self.cancelled(task)),
                StreamEnd::Eof { delivered } => {
                    if task.is_complete() || task.total() == Some(0) {
                        break;
                    }
                    if task.total().is_none() {
                        // no size ever advertised: end of body is the only completion signal
                        debug!("Total size unknown, treating end of stream as completion");
                        break;
                    }
                    if delivered == 0 {
                        return Err(Error::ProtocolViolation(format!(
                            "empty response for {range} with {} of {} bytes still missing",
                            task.total().unwrap_or(0).saturating_sub(task.transferred_bytes()),
                            task.total_bytes()
                        )));
                    }
                    debug!(
                        "Server ended range response at {} bytes, requesting remainder",
                        task.transferred_bytes()
                    );
                }
            }
        }

        ctx.reporter.emit_complete(task);
        info!(
            "Download of {} complete: {} bytes in {requests} range requests",
            task.id(),
            task.transferred_bytes()
        );
        Ok(TransferOutcome::Completed)
    }

    fn cancelled(&self, task: &TransferTask) -> TransferOutcome {
        warn!(
            "Download of {} cancelled at {} bytes",
            task.id(),
            task.transferred_bytes()
        );
        TransferOutcome::Cancelled
    }

    /// Check the response lines up with the requested offset and record the
    /// object's total size the first time it is advertised.
    fn learn_total(&self, response: &Response, offset: u64, task: &mut TransferTask) -> Result<()> {
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .map(|v| {
                v.to_str()
                    .map_err(|_| Error::ProtocolViolation("non-ASCII content-range header".to_string()))
            })
            .transpose()?;

        let total = match response.status() {
            StatusCode::PARTIAL_CONTENT => match content_range {
                Some(value) => {
                    let range: ContentRange = value.parse()?;
                    if range.start != offset {
                        return Err(Error::ProtocolViolation(format!(
                            "asked for offset {offset}, server sent {range}"
                        )));
                    }
                    range.total
                }
                None => None,
            },
            _ if offset > 0 => {
                // a full-content answer to a resumed request starts at byte 0
                return Err(Error::ProtocolViolation(format!(
                    "server ignored range request at offset {offset} ({})",
                    response.status()
                )));
            }
            _ => {
                let advertised = match content_range {
                    Some(value) => total_from_content_range(value)?,
                    None => None,
                };
                advertised.or_else(|| response.content_length())
            }
        };

        if task.total().is_none() {
            if let Some(total) = total {
                debug!("Total size of {}: {total} bytes", task.id());
                task.set_total(total)?;
            }
        }
        Ok(())
    }

    /// Copy one response body into the sink, buffer by buffer, starting at
    /// the task's current offset.
    async fn stream_into_sink(
        &self,
        response: Response,
        task: &mut TransferTask,
        ctx: &mut TransferContext,
    ) -> Result<StreamEnd> {
        let mut body = create_body_stream(response);
        let mut handle = self.sink.open().await.map_err(Error::SinkError)?;
        let mut chunk = ChunkBuffer::new(task.chunk_size(), task.transferred_bytes());
        chunk.seek_sink(&mut handle).await.map_err(Error::SinkError)?;

        let mut delivered = 0u64;
        let end = loop {
            let read = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break StreamEnd::Cancelled,
                read = tokio::time::timeout(self.read_timeout, read_buffer(&mut chunk, &mut body)) => read,
            };

            let n = match read {
                Err(_) => {
                    return Err(Error::NetworkError(format!(
                        "no data received for {:?} at offset {}",
                        self.read_timeout,
                        chunk.offset()
                    )))
                }
                Ok(Err(e)) => {
                    return Err(Error::NetworkError(format!(
                        "stream read error at offset {} after {delivered} bytes of this response: {e}",
                        chunk.offset()
                    )));
                }
                Ok(Ok(0)) => break StreamEnd::Eof { delivered },
                Ok(Ok(n)) => n as u64,
            };

            if let Some(total) = task.total() {
                if chunk.offset() + n > total {
                    return Err(Error::ProtocolViolation(format!(
                        "server sent data past the {total}-byte end of the object"
                    )));
                }
            }

            let before = chunk.offset();
            let written = chunk.commit_to(&mut handle).await;
            task.advance(chunk.offset() - before)?;
            written.map_err(Error::SinkError)?;
            ChunkBuffer::flush_sink(&mut handle)
                .await
                .map_err(Error::SinkError)?;

            delivered += n;
            ctx.reporter.maybe_emit(task, Instant::now());
            ctx.publish(task);
        };

        ChunkBuffer::flush_sink(&mut handle)
            .await
            .map_err(Error::SinkError)?;
        Ok(end)
    }
}

async fn read_buffer<R>(chunk: &mut ChunkBuffer, body: &mut R) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    chunk.read_once(body).await
}
