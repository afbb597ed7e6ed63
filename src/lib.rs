//! # taskwire
//!
//! Asynchronous named-procedure dispatch over a pool of external worker
//! processes, using a length-prefixed binary frame protocol on the
//! workers' standard pipes.
//!
//! Callers submit calls (a procedure name plus an opaque encoded payload)
//! and receive results through a per-call callback (or a future via
//! [`Dispatcher::invoke`]). The dispatcher owns the worker pool: it
//! allocates calls to workers, reassembles fragmented result frames,
//! enforces per-call timeouts, and replaces crashed, stuck, or worn-out
//! workers without losing caller callbacks.
//!
//! ## Architecture
//!
//! - Dispatcher side: [`Dispatcher`] (handle) + a single-owner core task
//!   holding all pool state; per-worker reader/writer tasks move frames.
//! - Worker side: [`service::WorkerService`] runs inside the worker
//!   process, executing procedures from a [`service::ProcedureRegistry`]
//!   over stdin/stdout.
//! - Both sides share the [`protocol`] module (frames, incremental
//!   parser, resumable writer) and the [`codec`] module.
//!
//! ## Example
//!
//! ```ignore
//! use taskwire::{Dispatcher, ProcessWorkerFactory};
//!
//! #[tokio::main]
//! async fn main() -> taskwire::Result<()> {
//!     let dispatcher = Dispatcher::builder()
//!         .pool_size(1, 4)
//!         .start(ProcessWorkerFactory::new("taskwire-worker"))?;
//!
//!     let result = dispatcher.invoke("strlen", &b"zanzibar"[..]).await?;
//!     match result.into_result() {
//!         Ok(data) => println!("result: {:?}", data),
//!         Err(err) => eprintln!("failed: {err}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod call;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod service;
pub mod worker;

pub use call::{CallError, CallId, CallResult};
pub use config::{AllocationPolicy, DispatcherConfig};
pub use dispatch::{Dispatcher, DispatcherBuilder, PoolStats};
pub use error::{DispatchError, Result};
pub use worker::ProcessWorkerFactory;
