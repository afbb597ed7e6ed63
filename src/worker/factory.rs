//! Worker spawning.
//!
//! [`WorkerFactory`] is the seam between the dispatcher and whatever
//! produces worker byte channels. The stock implementation,
//! [`ProcessWorkerFactory`], spawns an external process and hands back its
//! three standard pipes; tests substitute in-memory duplex channels.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::error::{DispatchError, Result};

/// Boxed read half of a worker channel.
pub type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a worker channel.
pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The byte channels of one freshly spawned worker.
pub struct WorkerChannels {
    /// Dispatcher → worker channel (the worker's stdin).
    pub writer: ChannelWriter,
    /// Worker → dispatcher channel (the worker's stdout).
    pub reader: ChannelReader,
    /// Worker diagnostics channel (the worker's stderr), if captured.
    pub stderr: Option<ChannelReader>,
    /// OS process handle, when the worker is a real child process.
    pub child: Option<Child>,
}

impl std::fmt::Debug for WorkerChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerChannels")
            .field("stderr", &self.stderr.as_ref().map(|_| "..."))
            .field("child", &self.child)
            .finish_non_exhaustive()
    }
}

/// Spawns one worker and yields its channels.
///
/// A spawn failure is a configuration error, not a per-call failure: it
/// propagates to the code maintaining the pool.
pub trait WorkerFactory: Send + Sync + 'static {
    /// Spawn a fresh worker.
    fn spawn(&self) -> Result<WorkerChannels>;
}

/// Factory spawning worker processes with piped stdio.
///
/// # Example
///
/// ```no_run
/// use taskwire::worker::ProcessWorkerFactory;
///
/// let factory = ProcessWorkerFactory::new("taskwire-worker")
///     .arg("--quiet")
///     .current_dir("/var/lib/app");
/// ```
#[derive(Debug, Clone)]
pub struct ProcessWorkerFactory {
    command: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl ProcessWorkerFactory {
    /// Create a factory for the given worker executable.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Append one argument to the worker command line.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the workers' working directory. Defaults to the dispatcher's.
    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn spawn(&self) -> Result<WorkerChannels> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DispatchError::Resource("worker stdin pipe missing".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DispatchError::Resource("worker stdout pipe missing".to_string()))?;
        let stderr = child.stderr.take();

        Ok(WorkerChannels {
            writer: Box::new(stdin),
            reader: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as ChannelReader),
            child: Some(child),
        })
    }
}
