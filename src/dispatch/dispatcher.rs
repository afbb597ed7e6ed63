//! Dispatcher builder and public handle.
//!
//! The [`DispatcherBuilder`] configures the pool; [`DispatcherBuilder::start`]
//! spawns the initial workers and the core task. The returned [`Dispatcher`]
//! is a cheap clone-able handle whose methods message the core.
//!
//! # Example
//!
//! ```no_run
//! use taskwire::{Dispatcher, ProcessWorkerFactory};
//!
//! # async fn demo() -> taskwire::Result<()> {
//! let dispatcher = Dispatcher::builder()
//!     .pool_size(1, 4)
//!     .call_timeout(Some(std::time::Duration::from_secs(10)))
//!     .start(ProcessWorkerFactory::new("taskwire-worker"))?;
//!
//! let result = dispatcher.invoke("strlen", &b"zanzibar"[..]).await?;
//! assert!(result.succeeded());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::call::{CallId, CallResult};
use crate::config::{AllocationPolicy, DispatcherConfig};
use crate::error::{DispatchError, Result};
use crate::protocol::MAX_PROCEDURE_LENGTH;
use crate::worker::WorkerFactory;

use super::pool::{Command, PoolCore, PoolStats};

/// Fluent configuration for a [`Dispatcher`].
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
        }
    }

    /// Use a prepared configuration wholesale.
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// Pool bounds: `min` workers are maintained at all times, growth on
    /// demand stops at `max`.
    pub fn pool_size(mut self, min: usize, max: usize) -> Self {
        self.config.pool_min = min;
        self.config.pool_max = max;
        self
    }

    /// Per-call deadline. `None` disables timeout tracking.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Cadence of the timeout/idle sweep (default 1 s).
    pub fn timeout_check_interval(mut self, interval: Duration) -> Self {
        self.config.timeout_check_interval = interval;
        self
    }

    /// Calls a worker may execute before being recycled. 0 disables.
    pub fn execution_limit(mut self, limit: u32) -> Self {
        self.config.execution_limit = limit;
        self
    }

    /// Idle duration after which an above-minimum worker is retired.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Read/write chunk size for worker channel I/O.
    pub fn granularity(mut self, bytes: usize) -> Self {
        self.config.granularity = bytes;
        self
    }

    /// Cap on outstanding (queued + in-flight) calls. 0 means unbounded.
    pub fn max_outstanding(mut self, cap: usize) -> Self {
        self.config.max_outstanding = cap;
        self
    }

    /// Worker allocation policy.
    pub fn allocation(mut self, policy: AllocationPolicy) -> Self {
        self.config.allocation = policy;
        self
    }

    /// Spawn the initial workers and start the dispatcher core.
    ///
    /// Must be called within a tokio runtime. Fails if the initial worker
    /// spawn fails; an unrunnable worker command is a configuration
    /// error, not a per-call failure.
    pub fn start<F: WorkerFactory>(self, factory: F) -> Result<Dispatcher> {
        let config = self.config.normalized();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut core = PoolCore::new(factory, config, commands_rx, events_tx, events_rx);
        core.fill_pool()?;
        tokio::spawn(core.run());

        Ok(Dispatcher {
            commands: commands_tx,
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running dispatcher.
///
/// Clones share the same pool. Methods are asynchronous only because they
/// rendezvous with the core task; none of them wait for worker I/O. When
/// the last handle is dropped the core tears the pool down; outstanding
/// callbacks are then dropped without notification, so drain or
/// [`stop`](Self::stop) deliberately.
#[derive(Clone)]
pub struct Dispatcher {
    commands: mpsc::UnboundedSender<Command>,
}

impl Dispatcher {
    /// Start building a dispatcher.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Submit a call; `on_result` fires exactly once with the outcome.
    ///
    /// Returns the call id as soon as the call is accepted, before any
    /// worker I/O happens. The callback, not the return value, carries the
    /// result. Fails synchronously on an invalid procedure name, when the
    /// outstanding-call cap is reached, or when the dispatcher is stopped.
    pub async fn call<F>(
        &self,
        procedure: &str,
        payload: impl Into<Bytes>,
        on_result: F,
    ) -> Result<CallId>
    where
        F: FnOnce(CallResult) + Send + 'static,
    {
        validate_procedure(procedure)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Call {
                procedure: procedure.to_string(),
                payload: payload.into(),
                on_result: Box::new(on_result),
                reply: reply_tx,
            })
            .map_err(|_| DispatchError::Stopped)?;

        reply_rx.await.map_err(|_| DispatchError::Stopped)?
    }

    /// Submit a call and await its result.
    ///
    /// A convenience wrapper over [`call`](Self::call) for callers that
    /// prefer a future to a callback.
    pub async fn invoke(
        &self,
        procedure: &str,
        payload: impl Into<Bytes>,
    ) -> Result<CallResult> {
        let (tx, rx) = oneshot::channel();
        self.call(procedure, payload, move |result| {
            let _ = tx.send(result);
        })
        .await?;

        rx.await.map_err(|_| DispatchError::Stopped)
    }

    /// Cancel an outstanding call.
    ///
    /// Reuses the timeout recovery path with an immediate deadline: a
    /// queued call is dequeued, an in-flight call costs its worker a
    /// respawn. The call's callback fires with a cancellation error. A
    /// no-op for already-completed ids.
    pub async fn cancel(&self, id: CallId) -> Result<()> {
        self.commands
            .send(Command::Cancel { id })
            .map_err(|_| DispatchError::Stopped)
    }

    /// Snapshot pool and call counts.
    pub async fn stats(&self) -> Result<PoolStats> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply: tx })
            .map_err(|_| DispatchError::Stopped)?;
        rx.await.map_err(|_| DispatchError::Stopped)
    }

    /// Tear down every worker and stop the core.
    ///
    /// Calls still queued or in flight never see their callbacks; drain
    /// first if that matters to you.
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stop { reply: tx })
            .map_err(|_| DispatchError::Stopped)?;
        rx.await.map_err(|_| DispatchError::Stopped)
    }
}

fn validate_procedure(procedure: &str) -> Result<()> {
    if procedure.is_empty() {
        return Err(DispatchError::Validation(
            "procedure name is empty".to_string(),
        ));
    }
    if procedure.len() > MAX_PROCEDURE_LENGTH {
        return Err(DispatchError::Validation(format!(
            "procedure name exceeds maximum allowable length ({MAX_PROCEDURE_LENGTH}): {procedure}"
        )));
    }
    Ok(())
}
