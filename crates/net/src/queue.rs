//! Outgoing line queue
//!
//! Lines are appended without blocking and written out in batches by the
//! connection's flush task. A flush drains the whole queue and performs one
//! transport write. The queue is cleared before the write is attempted, so a
//! failed write loses its batch; the lines are handed back in the error for
//! reporting.

use std::io;
use std::sync::{Mutex, PoisonError};

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;

use crate::frame::LineFramer;

/// A batch that could not be written
#[derive(Debug, thiserror::Error)]
#[error("failed to write {} queued line(s): {source}", .lines.len())]
pub struct FlushError {
    /// Lines dropped with the failed write
    pub lines: Vec<String>,
    #[source]
    pub source: io::Error,
}

/// FIFO of lines waiting for the next flush
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    lines: Mutex<Vec<String>>,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line. Never blocks on I/O.
    pub fn push(&self, line: impl Into<String>) {
        self.lock().push(line.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of pending lines, oldest first
    pub fn pending(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Remove and return every pending line
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    /// Drain the queue into a single write
    ///
    /// Returns the lines written; an empty queue writes nothing.
    pub async fn flush<W>(&self, writer: &mut W) -> Result<Vec<String>, FlushError>
    where
        W: AsyncWrite + Unpin,
    {
        let lines = self.take();
        if lines.is_empty() {
            return Ok(lines);
        }

        let mut framer = LineFramer::new();
        let mut buf = BytesMut::new();
        for line in &lines {
            if let Err(source) = framer.encode(line.as_str(), &mut buf) {
                return Err(FlushError { lines, source });
            }
        }

        let written = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        }
        .await;

        match written {
            Ok(()) => Ok(lines),
            Err(source) => Err(FlushError { lines, source }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct BrokenPipe;

    impl AsyncWrite for BrokenPipe {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Counts write calls so a batch can be checked to be one write
    #[derive(Default)]
    struct CountingWriter {
        data: Vec<u8>,
        writes: usize,
    }

    impl AsyncWrite for CountingWriter {
        fn poll_write(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            self.writes += 1;
            self.data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_flush_writes_batch_in_order() {
        let queue = OutgoingQueue::new();
        queue.push("JOIN main");
        queue.push("SAY main hello");
        queue.push("PING");

        let mut out = CountingWriter::default();
        let written = queue.flush(&mut out).await.unwrap();

        assert_eq!(written, vec!["JOIN main", "SAY main hello", "PING"]);
        assert_eq!(out.data, b"JOIN main\r\nSAY main hello\r\nPING\r\n");
        assert_eq!(out.writes, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let queue = OutgoingQueue::new();
        let mut out = CountingWriter::default();
        assert!(queue.flush(&mut out).await.unwrap().is_empty());
        assert_eq!(out.writes, 0);
    }

    #[tokio::test]
    async fn test_failed_write_clears_queue_and_reports_lines() {
        let queue = OutgoingQueue::new();
        queue.push("SAY main one");
        queue.push("SAY main two");

        let err = queue.flush(&mut BrokenPipe).await.unwrap_err();
        assert_eq!(err.lines, vec!["SAY main one", "SAY main two"]);
        assert_eq!(err.source.kind(), io::ErrorKind::BrokenPipe);
        assert!(queue.is_empty());

        queue.push("SAY main three");
        assert_eq!(queue.pending(), vec!["SAY main three"]);
    }
}
