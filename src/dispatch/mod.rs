//! Dispatcher: pool orchestration, allocation, timeout and failure
//! recovery.

mod dispatcher;
mod pool;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use pool::PoolStats;
