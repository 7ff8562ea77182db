//! Chunk I/O primitive
//!
//! A fixed-capacity buffer that moves bytes from a reader (network body or
//! local source) into a random-access sink while tracking the absolute
//! offset of the next byte. The offset only moves once bytes are written.

use std::io::{self, SeekFrom};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

/// Bounded transfer buffer with a cumulative offset
#[derive(Debug)]
pub struct ChunkBuffer {
    buf: Vec<u8>,
    filled: usize,
    offset: u64,
}

impl ChunkBuffer {
    /// Buffer of `capacity` bytes whose first byte lands at `offset`.
    pub fn new(capacity: usize, offset: u64) -> Self {
        Self {
            buf: vec![0u8; capacity],
            filled: 0,
            offset,
        }
    }

    /// Absolute offset of the next byte to commit.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes read but not yet committed.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// One read from `reader` into the buffer. Returns the byte count,
    /// `0` meaning end of stream.
    pub async fn read_once<R>(&mut self, reader: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        debug_assert!(self.filled == 0, "previous chunk not committed");
        let n = reader.read(&mut self.buf).await?;
        self.filled = n;
        Ok(n)
    }

    /// Fill the buffer from `reader` until it is full or the reader hits
    /// end of stream, reading at most `limit` bytes.
    pub async fn fill_from<R>(&mut self, reader: &mut R, limit: usize) -> io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        debug_assert!(self.filled == 0, "previous chunk not committed");
        let want = limit.min(self.buf.len());
        while self.filled < want {
            let n = reader.read(&mut self.buf[self.filled..want]).await?;
            if n == 0 {
                break;
            }
            self.filled += n;
        }
        Ok(self.filled)
    }

    /// Position `sink` at the current offset.
    pub async fn seek_sink<W>(&self, sink: &mut W) -> io::Result<()>
    where
        W: AsyncSeek + Unpin + ?Sized,
    {
        let pos = sink.seek(SeekFrom::Start(self.offset)).await?;
        if pos != self.offset {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("sink positioned at {pos}, expected {}", self.offset),
            ));
        }
        Ok(())
    }

    /// Write every filled byte to `sink`, retrying short writes, then
    /// advance the offset. Returns the number of bytes committed.
    ///
    /// On error the offset is advanced by whatever part of the buffer the
    /// sink did accept, and the rest stays pending.
    pub async fn commit_to<W>(&mut self, sink: &mut W) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut written = 0;
        let result = loop {
            if written == self.filled {
                break Ok(());
            }
            match sink.write(&self.buf[written..self.filled]).await {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "sink accepted no bytes",
                    ))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        self.offset += written as u64;
        self.buf.copy_within(written..self.filled, 0);
        self.filled -= written;
        result.map(|()| written)
    }

    /// Account for the filled bytes as delivered elsewhere (an upload
    /// request body) and advance the offset.
    pub fn commit_sent(&mut self) -> usize {
        let n = self.filled;
        self.offset += n as u64;
        self.filled = 0;
        n
    }

    /// Drop any pending bytes without moving the offset.
    pub fn discard(&mut self) {
        self.filled = 0;
    }

    /// Flush a sink after the last commit of an attempt.
    pub async fn flush_sink<W>(sink: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        sink.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Sink that accepts at most `max` bytes per write call
    struct ShortWriter {
        inner: Cursor<Vec<u8>>,
        max: usize,
        fail_after: Option<usize>,
    }

    impl AsyncWrite for ShortWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if let Some(limit) = self.fail_after {
                if self.inner.position() as usize >= limit {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")));
                }
            }
            let n = buf.len().min(self.max);
            Pin::new(&mut self.inner).poll_write(cx, &buf[..n])
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    #[tokio::test]
    async fn test_short_writes_are_retried() {
        let mut reader: &[u8] = b"0123456789";
        let mut sink = ShortWriter {
            inner: Cursor::new(Vec::new()),
            max: 3,
            fail_after: None,
        };

        let mut chunk = ChunkBuffer::new(16, 0);
        assert_eq!(chunk.read_once(&mut reader).await.unwrap(), 10);
        assert_eq!(chunk.commit_to(&mut sink).await.unwrap(), 10);
        assert_eq!(chunk.offset(), 10);
        assert!(chunk.is_empty());
        assert_eq!(sink.inner.into_inner(), b"0123456789");
    }

    #[tokio::test]
    async fn test_failed_write_commits_only_accepted_bytes() {
        let mut reader: &[u8] = b"abcdefgh";
        let mut sink = ShortWriter {
            inner: Cursor::new(Vec::new()),
            max: 2,
            fail_after: Some(4),
        };

        let mut chunk = ChunkBuffer::new(8, 100);
        chunk.read_once(&mut reader).await.unwrap();
        assert!(chunk.commit_to(&mut sink).await.is_err());
        assert_eq!(chunk.offset(), 104);
        assert_eq!(chunk.filled(), b"efgh");
    }

    #[tokio::test]
    async fn test_seek_then_write_keeps_prefix() {
        let mut sink = Cursor::new(b"KEEPxxxx".to_vec());
        let mut reader: &[u8] = b"NEW!";

        let mut chunk = ChunkBuffer::new(4, 4);
        chunk.seek_sink(&mut sink).await.unwrap();
        chunk.read_once(&mut reader).await.unwrap();
        chunk.commit_to(&mut sink).await.unwrap();

        assert_eq!(sink.into_inner(), b"KEEPNEW!");
    }

    #[tokio::test]
    async fn test_fill_from_respects_limit_and_eof() {
        let data = vec![7u8; 10];
        let mut reader: &[u8] = &data;

        let mut chunk = ChunkBuffer::new(4, 0);
        assert_eq!(chunk.fill_from(&mut reader, 4).await.unwrap(), 4);
        assert_eq!(chunk.commit_sent(), 4);
        assert_eq!(chunk.fill_from(&mut reader, 3).await.unwrap(), 3);
        assert_eq!(chunk.commit_sent(), 3);
        assert_eq!(chunk.fill_from(&mut reader, 4).await.unwrap(), 3);
        assert_eq!(chunk.commit_sent(), 3);
        assert_eq!(chunk.fill_from(&mut reader, 4).await.unwrap(), 0);
        assert_eq!(chunk.offset(), 10);
    }
}
