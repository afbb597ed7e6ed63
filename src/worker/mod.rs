//! Worker spawning and per-worker session plumbing.

mod factory;
mod session;

pub use factory::{
    ChannelReader, ChannelWriter, ProcessWorkerFactory, WorkerChannels, WorkerFactory,
};
pub use session::{WorkerId, WorkerSession};

pub(crate) use session::{EventSender, WorkerEvent};
