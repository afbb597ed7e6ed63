//! Resumable frame writer.
//!
//! Serializes enqueued [`Frame`]s to an output channel while coping with
//! partial (short) writes: [`FrameWriter::write`] performs at most one
//! bounded write attempt and reports `Ok(true)` only once everything,
//! including anything previously queued, has been flushed. On `Ok(false)`
//! the caller re-invokes `write(None)` once the channel can make progress
//! again.
//!
//! Internally a single flat byte buffer holds the frame currently being
//! written; further frames wait unserialized in a queue so that several
//! large payloads are never held in serialized form at once.

use std::collections::VecDeque;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{DispatchError, Result};

use super::frame::Frame;

/// Default read/write chunk size (matches the dispatcher's granularity).
pub const DEFAULT_GRANULARITY: usize = 64 * 1024;

/// Buffering frame writer over an async byte sink.
pub struct FrameWriter<W> {
    sink: W,
    buffer: BytesMut,
    queue: VecDeque<Frame>,
    granularity: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Create a writer with the default granularity.
    pub fn new(sink: W) -> Self {
        Self::with_granularity(sink, DEFAULT_GRANULARITY)
    }

    /// Create a writer capping each write attempt at `granularity` bytes.
    pub fn with_granularity(sink: W, granularity: usize) -> Self {
        Self {
            sink,
            buffer: BytesMut::new(),
            queue: VecDeque::new(),
            granularity: granularity.max(1),
        }
    }

    /// Enqueue `frame` (if any) and attempt one write.
    ///
    /// Returns `Ok(true)` when the buffer and queue are fully flushed,
    /// `Ok(false)` when more `write(None)` invocations are needed.
    ///
    /// Fails with [`DispatchError::Resource`] if the destination accepts no
    /// bytes despite data being pending (the channel is gone), or with the
    /// underlying I/O error.
    pub async fn write(&mut self, frame: Option<Frame>) -> Result<bool> {
        if let Some(frame) = frame {
            self.queue.push_back(frame);
        }

        // Serialize the next queued frame only once the current buffer has
        // fully drained.
        if self.buffer.is_empty() {
            if let Some(next) = self.queue.pop_front() {
                self.buffer
                    .extend_from_slice(&next.encode_header());
                self.buffer.extend_from_slice(&next.payload);
            }
        }

        if self.buffer.is_empty() {
            return Ok(true);
        }

        let chunk = self.buffer.len().min(self.granularity);
        let written = self.sink.write(&self.buffer[..chunk]).await?;

        if written == 0 {
            return Err(DispatchError::Resource(
                "output channel accepted zero bytes".to_string(),
            ));
        }

        self.buffer.advance(written);

        if self.buffer.is_empty() && self.queue.is_empty() {
            self.sink.flush().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Keep invoking [`write`](Self::write) until everything is flushed.
    pub async fn flush_all(&mut self) -> Result<()> {
        while !self.write(None).await? {}
        Ok(())
    }

    /// True while buffered or queued data remains.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.queue.is_empty()
    }

    /// Bytes currently held in serialized form.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
