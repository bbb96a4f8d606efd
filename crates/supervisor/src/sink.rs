//! Response sinks
//!
//! A sink is where a session's output goes: bytes are appended in order and
//! the sink is closed once. [`ChannelSink`] feeds a chunked HTTP body;
//! [`BufferSink`] collects the whole answer for non-streaming callers.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use pdfask_common::{PdfAskError, Result};
use tokio::sync::mpsc;

/// Item type carried to the HTTP body
pub type BodyChunk = std::result::Result<Bytes, std::io::Error>;

/// Append-then-close output destination
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Append bytes. An error means the consumer is gone.
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Close the sink. Further writes fail; closing twice is a no-op.
    async fn close(&mut self);

    /// Resolves when the consumer has gone away
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Sink backed by a bounded channel feeding a streaming response body
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<BodyChunk>>,
}

impl ChannelSink {
    /// Create a sink and the receiver the HTTP body reads from
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| PdfAskError::internal("write after close"))?;

        tx.send(Ok(chunk))
            .await
            .map_err(|_| PdfAskError::cancelled("client disconnected"))
    }

    async fn close(&mut self) {
        // Dropping the last sender ends the body stream
        self.tx.take();
    }

    async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending::<()>().await,
        }
    }
}

/// Sink that buffers everything in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: BytesMut,
    writes: usize,
    closes: usize,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Number of times `close` was called
    pub fn close_count(&self) -> usize {
        self.closes
    }

    pub fn is_closed(&self) -> bool {
        self.closes > 0
    }

    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

#[async_trait]
impl ResponseSink for BufferSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(PdfAskError::internal("write after close"));
        }
        self.buffer.extend_from_slice(&chunk);
        self.writes += 1;
        Ok(())
    }

    async fn close(&mut self) {
        self.closes += 1;
    }
}
