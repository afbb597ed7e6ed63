//! Worker session: one spawned worker's channels wired to frame I/O.
//!
//! A [`WorkerSession`] couples the channels produced by a
//! [`WorkerFactory`](super::WorkerFactory) with a reader task (owning the
//! session's [`FrameParser`]) and a writer task (owning its
//! [`FrameWriter`]). Parsed frames and channel failures flow to the
//! dispatcher core as [`WorkerEvent`]s; outbound frames are handed to the
//! writer task, which keeps re-invoking the resumable writer until each
//! frame is fully flushed.

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::DispatchError;
use crate::protocol::{Frame, FrameParser, FrameWriter};

use super::factory::{ChannelReader, ChannelWriter, WorkerChannels};

/// Worker identity: pool slot plus spawn generation.
///
/// A respawn reuses the slot but bumps the generation, so events from a
/// torn-down worker can never be mistaken for its replacement's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId {
    /// Pool slot index.
    pub slot: u32,
    /// Spawn generation within the slot.
    pub generation: u32,
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}g{}", self.slot, self.generation)
    }
}

/// Event emitted by a session's I/O tasks toward the dispatcher core.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// A complete frame arrived on the worker's read channel.
    Frame { worker: WorkerId, frame: Frame },
    /// The session is unusable: EOF, broken pipe, or a protocol violation.
    Failed {
        worker: WorkerId,
        reason: DispatchError,
    },
}

pub(crate) type EventSender = mpsc::UnboundedSender<WorkerEvent>;

/// One live worker's I/O plumbing.
pub struct WorkerSession {
    outbound: mpsc::UnboundedSender<Frame>,
    child: Option<tokio::process::Child>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<()>>,
}

impl WorkerSession {
    /// Wire up channels and start the session's I/O tasks.
    pub(crate) fn launch(
        id: WorkerId,
        channels: WorkerChannels,
        events: EventSender,
        granularity: usize,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(reader_loop(
            id,
            channels.reader,
            events.clone(),
            granularity,
        ));
        let writer_task = tokio::spawn(writer_loop(
            id,
            channels.writer,
            outbound_rx,
            events,
            granularity,
        ));
        let stderr_task = channels
            .stderr
            .map(|stderr| tokio::spawn(stderr_loop(id, stderr)));

        Self {
            outbound,
            child: channels.child,
            reader_task,
            writer_task,
            stderr_task,
        }
    }

    /// Hand a frame to the writer task.
    ///
    /// Returns false if the writer task is gone (session already failed).
    pub(crate) fn send(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Tear the session down: stop I/O tasks and kill the child process.
    pub(crate) fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
        if let Some(task) = &self.stderr_task {
            task.abort();
        }
        if let Some(child) = &mut self.child {
            // kill_on_drop also covers this; start_kill avoids waiting for
            // the drop to reach the runtime's reaper.
            let _ = child.start_kill();
        }
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Read chunks from the worker, feed the parser, forward complete frames.
async fn reader_loop(
    id: WorkerId,
    mut reader: ChannelReader,
    events: EventSender,
    granularity: usize,
) {
    let mut parser = FrameParser::new();
    let mut buf = vec![0u8; granularity];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(WorkerEvent::Failed {
                    worker: id,
                    reason: DispatchError::Resource("worker read pipe reached EOF".to_string()),
                });
                return;
            }
            Ok(n) => n,
            Err(e) => {
                let _ = events.send(WorkerEvent::Failed {
                    worker: id,
                    reason: DispatchError::Io(e),
                });
                return;
            }
        };

        match parser.push(&buf[..n]) {
            Ok(frames) => {
                for frame in frames {
                    if events.send(WorkerEvent::Frame { worker: id, frame }).is_err() {
                        // Dispatcher core is gone; nothing left to do.
                        return;
                    }
                }
            }
            Err(reason) => {
                let _ = events.send(WorkerEvent::Failed { worker: id, reason });
                return;
            }
        }
    }
}

/// Drain outbound frames through the resumable writer.
async fn writer_loop(
    id: WorkerId,
    writer: ChannelWriter,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    events: EventSender,
    granularity: usize,
) {
    let mut writer = FrameWriter::with_granularity(writer, granularity);

    'recv: while let Some(frame) = rx.recv().await {
        let mut result = writer.write(Some(frame)).await;
        loop {
            match result {
                Ok(true) => break,
                Ok(false) => {
                    // Fold in frames that arrived while flushing.
                    result = match rx.try_recv() {
                        Ok(extra) => writer.write(Some(extra)).await,
                        Err(_) => writer.write(None).await,
                    };
                }
                Err(reason) => {
                    let _ = events.send(WorkerEvent::Failed { worker: id, reason });
                    break 'recv;
                }
            }
        }
    }
}

/// Relay worker stderr lines into the log.
async fn stderr_loop(id: WorkerId, stderr: ChannelReader) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(worker = %id, "worker stderr: {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    fn duplex_channels() -> (
        WorkerChannels,
        tokio::io::DuplexStream,
        tokio::io::DuplexStream,
    ) {
        let (dispatcher_w, worker_r) = tokio::io::duplex(4096);
        let (worker_w, dispatcher_r) = tokio::io::duplex(4096);
        (
            WorkerChannels {
                writer: Box::new(dispatcher_w),
                reader: Box::new(dispatcher_r),
                stderr: None,
                child: None,
            },
            worker_r,
            worker_w,
        )
    }

    #[tokio::test]
    async fn test_session_forwards_parsed_frames() {
        let (channels, _worker_r, mut worker_w) = duplex_channels();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = WorkerId {
            slot: 0,
            generation: 1,
        };
        let _session = WorkerSession::launch(id, channels, tx, 4096);

        let frame = Frame::data(Bytes::from_static(b"result"));
        worker_w.write_all(&frame.encode()).await.unwrap();

        match rx.recv().await.unwrap() {
            WorkerEvent::Frame { worker, frame } => {
                assert_eq!(worker, id);
                assert_eq!(frame.payload(), b"result");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_writes_outbound_frames() {
        let (channels, mut worker_r, _worker_w) = duplex_channels();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = WorkerId {
            slot: 1,
            generation: 1,
        };
        let session = WorkerSession::launch(id, channels, tx, 4096);

        let frame = Frame::data(Bytes::from_static(b"request"));
        assert!(session.send(frame.clone()));

        let expected = frame.encode();
        let mut buf = vec![0u8; expected.len()];
        worker_r.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected.to_vec());
    }

    #[tokio::test]
    async fn test_eof_reports_failure() {
        let (channels, _worker_r, worker_w) = duplex_channels();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = WorkerId {
            slot: 2,
            generation: 1,
        };
        let _session = WorkerSession::launch(id, channels, tx, 4096);

        drop(worker_w);

        match rx.recv().await.unwrap() {
            WorkerEvent::Failed { worker, reason } => {
                assert_eq!(worker, id);
                assert!(matches!(reason, DispatchError::Resource(_)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_bytes_report_protocol_failure() {
        let (channels, _worker_r, mut worker_w) = duplex_channels();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = WorkerId {
            slot: 3,
            generation: 1,
        };
        let _session = WorkerSession::launch(id, channels, tx, 4096);

        // First byte carries opcode nibble 0x05, which is unassigned.
        worker_w.write_all(&[0b1000_0101, 0]).await.unwrap();

        match rx.recv().await.unwrap() {
            WorkerEvent::Failed { reason, .. } => {
                assert!(matches!(reason, DispatchError::Protocol(_)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
