//! Worker-side service: the program half that executes procedures.
//!
//! A worker process builds a [`ProcedureRegistry`], hands it to a
//! [`WorkerService`], and runs the service over its stdin/stdout. The
//! service reads CALL frames, executes the named handler, and writes
//! CALL_RESULT or CALL_ERROR frames back. Handlers run as separate tasks,
//! so a worker can serve several outstanding calls when the dispatcher
//! multiplexes them over one channel.

mod context;
mod registry;

pub use context::ProcedureContext;
pub use registry::{BoxFuture, Procedure, ProcedureRegistry, ProcedureResult};

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{
    CallCode, CallEnvelope, CallRequest, Frame, FrameParser, FrameWriter, Opcode,
    DEFAULT_GRANULARITY,
};

/// Frame loop executing registered procedures for one dispatcher.
pub struct WorkerService {
    registry: Arc<ProcedureRegistry>,
    granularity: usize,
}

impl WorkerService {
    /// Create a service over the given registry.
    pub fn new(registry: ProcedureRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            granularity: DEFAULT_GRANULARITY,
        }
    }

    /// Override the read chunk size.
    pub fn granularity(mut self, bytes: usize) -> Self {
        self.granularity = bytes.max(1);
        self
    }

    /// Serve call frames until the read channel reaches EOF.
    ///
    /// EOF is the normal shutdown path: the dispatcher closed our stdin.
    pub async fn run<R, W>(self, mut reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Frame>();
        let writer_task = tokio::spawn(write_loop(writer, out_rx));

        let mut parser = FrameParser::new();
        let mut buf = vec![0u8; self.granularity];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            for frame in parser.push(&buf[..n])? {
                self.handle_frame(frame, &out_tx);
            }
        }

        drop(out_tx);
        let _ = writer_task.await;
        Ok(())
    }

    fn handle_frame(&self, frame: Frame, out_tx: &mpsc::UnboundedSender<Frame>) {
        match frame.opcode {
            Opcode::Data => {}
            // The dispatcher never sends CLOSE/ERROR; tolerate and move on.
            other => {
                tracing::debug!(?other, "ignoring non-DATA frame from dispatcher");
                return;
            }
        }

        let envelope = match CallEnvelope::decode(&frame.payload) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!("malformed call envelope: {e}");
                return;
            }
        };

        if envelope.code != CallCode::Call {
            tracing::error!(code = ?envelope.code, "unexpected call code from dispatcher");
            return;
        }

        let request = match CallRequest::decode(&envelope.body) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("malformed call request: {e}");
                return;
            }
        };

        let ctx = ProcedureContext::new(envelope.call_id, out_tx.clone());

        let Some(procedure) = self.registry.get(&request.procedure) else {
            tracing::debug!(procedure = %request.procedure, "unknown procedure requested");
            let reply = ctx.reply_frame(
                CallCode::CallError,
                format!("unknown procedure: {}", request.procedure).as_bytes(),
            );
            let _ = out_tx.send(reply);
            return;
        };

        let future = procedure.call(request.args, ctx.clone());
        let out_tx = out_tx.clone();

        tokio::spawn(async move {
            let reply = match future.await {
                Ok(result) => ctx.reply_frame(CallCode::CallResult, &result),
                Err(message) => ctx.reply_frame(CallCode::CallError, message.as_bytes()),
            };
            let _ = out_tx.send(reply);
        });
    }
}

/// Flush outbound frames to the write channel.
async fn write_loop<W>(writer: W, mut rx: mpsc::UnboundedReceiver<Frame>)
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut writer = FrameWriter::new(writer);

    while let Some(frame) = rx.recv().await {
        if writer.write(Some(frame)).await.is_err() {
            return;
        }
        while writer.has_pending() {
            if writer.write(None).await.is_err() {
                return;
            }
        }
    }
}
