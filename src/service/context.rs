//! Per-call context handed to procedure handlers.

use tokio::sync::mpsc;

use crate::protocol::wire_format::encode_reply_payload;
use crate::protocol::{CallCode, Frame};

/// Context for one in-flight procedure execution.
///
/// The handler's return value becomes the final result frame; a handler
/// producing a large or incremental result can additionally push
/// intermediate fragments with [`chunk`](Self::chunk). Fragments share the
/// call id and arrive at the dispatcher in write order; the final frame is
/// the one built from the handler's return value.
#[derive(Clone)]
pub struct ProcedureContext {
    call_id: u32,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
}

impl ProcedureContext {
    pub(crate) fn new(call_id: u32, outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            call_id,
            outbound: Some(outbound),
        }
    }

    /// Context without an output channel, for exercising handlers directly
    /// in tests.
    pub fn detached(call_id: u32) -> Self {
        Self {
            call_id,
            outbound: None,
        }
    }

    /// The call id this execution belongs to.
    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    /// Send a non-final result fragment.
    ///
    /// Returns false if the service's write side is gone.
    pub fn chunk(&self, data: &[u8]) -> bool {
        let Some(outbound) = &self.outbound else {
            return true;
        };

        let payload = encode_reply_payload(self.call_id, CallCode::CallResult, data);
        outbound
            .send(Frame::new(false, 0, crate::protocol::Opcode::Data, payload))
            .is_ok()
    }

    /// Build the frame carrying this call's final payload.
    pub(crate) fn reply_frame(&self, code: CallCode, body: &[u8]) -> Frame {
        Frame::data(encode_reply_payload(self.call_id, code, body))
    }
}

impl std::fmt::Debug for ProcedureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureContext")
            .field("call_id", &self.call_id)
            .finish()
    }
}
