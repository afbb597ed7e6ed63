//! Call value types: ids, in-flight state, and delivered results.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Identifier of one accepted call.
///
/// Ids are issued monotonically and wrap at
/// [`MAX_CALL_ID`](crate::protocol::MAX_CALL_ID) back to
/// [`MIN_CALL_ID`](crate::protocol::MIN_CALL_ID); ids still attached to an
/// outstanding call are skipped at wrap time, so a live id is always
/// unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u32);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a call failed.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The worker executed the procedure and reported a failure, or the
    /// procedure name was not registered on the worker side. The worker
    /// itself stays healthy.
    #[error("procedure failed: {0}")]
    Application(String),

    /// The configured call timeout elapsed before a result arrived.
    #[error("call timed out")]
    Timeout,

    /// The caller cancelled the call before a result arrived.
    #[error("call cancelled")]
    Cancelled,

    /// The worker assigned to this call died or its pipes broke.
    #[error("worker lost: {0}")]
    Resource(String),
}

/// Callback invoked exactly once with the outcome of a call.
pub type ResultCallback = Box<dyn FnOnce(CallResult) + Send + 'static>;

/// Delivered outcome of one call: the final payload bytes on success, a
/// [`CallError`] on failure. An explicit sum: there is no accessor that
/// panics or throws on the wrong arm.
#[derive(Debug, Clone)]
pub struct CallResult {
    call_id: CallId,
    outcome: Result<Bytes, CallError>,
}

impl CallResult {
    /// Build a successful result.
    pub fn ok(call_id: CallId, data: Bytes) -> Self {
        Self {
            call_id,
            outcome: Ok(data),
        }
    }

    /// Build a failed result.
    pub fn err(call_id: CallId, error: CallError) -> Self {
        Self {
            call_id,
            outcome: Err(error),
        }
    }

    /// The call this result belongs to.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Did the invocation succeed?
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Did the invocation fail?
    pub fn failed(&self) -> bool {
        self.outcome.is_err()
    }

    /// Borrow the result payload, if the call succeeded.
    pub fn data(&self) -> Option<&Bytes> {
        self.outcome.as_ref().ok()
    }

    /// Borrow the failure, if the call failed.
    pub fn error(&self) -> Option<&CallError> {
        self.outcome.as_ref().err()
    }

    /// Consume into the underlying sum, forcing the caller to branch.
    pub fn into_result(self) -> Result<Bytes, CallError> {
        self.outcome
    }
}

/// One accepted, not-yet-completed call.
///
/// Exactly one of three states at any time: queued, allocated to a worker,
/// or completed (at which point the record is dropped). `result_buf`
/// accumulates streamed fragments across non-final DATA frames.
pub(crate) struct Call {
    pub(crate) id: CallId,
    pub(crate) procedure: String,
    pub(crate) payload: Bytes,
    pub(crate) on_result: Option<ResultCallback>,
    pub(crate) result_buf: BytesMut,
}

impl Call {
    pub(crate) fn new(
        id: CallId,
        procedure: String,
        payload: Bytes,
        on_result: ResultCallback,
    ) -> Self {
        Self {
            id,
            procedure,
            payload,
            on_result: Some(on_result),
            result_buf: BytesMut::new(),
        }
    }

    /// Fire the callback. Safe to call at most once; the callback slot is
    /// emptied so a second completion attempt is a no-op.
    pub(crate) fn complete(&mut self, result: CallResult) {
        if let Some(cb) = self.on_result.take() {
            cb(result);
        }
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("procedure", &self.procedure)
            .field("payload_len", &self.payload.len())
            .field("buffered", &self.result_buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_result_success_accessors() {
        let result = CallResult::ok(CallId(1), Bytes::from_static(b"out"));

        assert!(result.succeeded());
        assert!(!result.failed());
        assert_eq!(result.data().unwrap().as_ref(), b"out");
        assert!(result.error().is_none());
        assert_eq!(result.into_result().unwrap().as_ref(), b"out");
    }

    #[test]
    fn test_result_failure_accessors() {
        let result = CallResult::err(CallId(2), CallError::Timeout);

        assert!(result.failed());
        assert!(result.data().is_none());
        assert!(matches!(result.error(), Some(CallError::Timeout)));
        assert!(result.into_result().is_err());
    }

    #[test]
    fn test_complete_fires_callback_at_most_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();

        let mut call = Call::new(
            CallId(9),
            "noop".to_string(),
            Bytes::new(),
            Box::new(move |_| {
                fired2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        call.complete(CallResult::err(CallId(9), CallError::Timeout));
        call.complete(CallResult::ok(CallId(9), Bytes::new()));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_call_id_display() {
        assert_eq!(CallId(17).to_string(), "#17");
    }
}
