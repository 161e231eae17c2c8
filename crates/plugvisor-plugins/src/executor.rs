//! Execution engine seam.
//!
//! The execution engine spawns and supervises plugin processes. The manager
//! obtains an [`ExecutorClient`] from an [`Executor`], registering itself as
//! the [`StateSink`] that receives asynchronous process state changes.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PluginResult;
use crate::logs::LogAttacher;
use crate::plugin::PluginId;

/// Errors reported by the execution engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// The engine could not be reached.
    #[error("execution engine unavailable: {0}")]
    Unavailable(String),

    /// The engine has no process for this plugin.
    #[error("no such process: {0}")]
    NoSuchProcess(String),

    /// The engine rejected or failed the request.
    #[error("{0}")]
    Failed(String),
}

/// Result type for execution engine calls.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Everything the engine needs to start a plugin process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Root filesystem of the process.
    pub rootfs: PathBuf,
    /// Full argv.
    pub args: Vec<String>,
    /// `KEY=VALUE` environment.
    pub env: Vec<String>,
    /// Working directory inside the rootfs.
    pub cwd: PathBuf,
    /// Per-run state directory on the host.
    pub runtime_dir: PathBuf,
    /// Host path that must be shared back out of the rootfs.
    pub propagated_mount: Option<PathBuf>,
}

/// Signals the manager sends through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to exit (`SIGTERM`).
    Terminate,
    /// Force the process to exit (`SIGKILL`).
    Kill,
}

impl Signal {
    /// The POSIX signal number.
    #[must_use]
    pub fn number(self) -> i32 {
        match self {
            Self::Terminate => 15,
            Self::Kill => 9,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminate => f.write_str("SIGTERM"),
            Self::Kill => f.write_str("SIGKILL"),
        }
    }
}

/// Process state transitions reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The process started.
    Start,
    /// The process exited.
    Exit,
    /// The process was paused.
    Pause,
    /// The process was resumed.
    Resume,
    /// The engine reattached to a live process.
    Restore,
    /// The process hit its memory limit.
    Oom,
}

/// A state-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateInfo {
    /// The new state.
    pub state: ProcessState,
    /// Process ID, when known.
    pub pid: Option<u32>,
    /// Exit status for [`ProcessState::Exit`].
    pub exit_code: Option<i32>,
}

impl StateInfo {
    /// An exit notification with the given status.
    #[must_use]
    pub fn exit(exit_code: i32) -> Self {
        Self {
            state: ProcessState::Exit,
            pid: None,
            exit_code: Some(exit_code),
        }
    }
}

/// Receiver of process state changes.
#[async_trait]
pub trait StateSink: Send + Sync {
    /// Called by the engine whenever a tracked process changes state.
    ///
    /// Errors are returned to the engine; they never alter manager state.
    async fn state_changed(&self, id: &str, info: StateInfo) -> PluginResult<()>;
}

/// Factory for engine clients.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Create a client whose state changes are delivered to `sink`.
    async fn client(&self, sink: Arc<dyn StateSink>) -> ExecutorResult<Arc<dyn ExecutorClient>>;
}

/// A client bound to one state sink.
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    /// Start a process for the plugin and return its PID.
    ///
    /// The engine hands the new process's pipes to `attach` before it
    /// returns. Later state changes for this process carry the same PID.
    async fn create(&self, id: &PluginId, spec: ProcessSpec, attach: LogAttacher) -> ExecutorResult<u32>;

    /// Reattach bookkeeping to an already-running process, if any.
    ///
    /// Does not start anything.
    async fn restore(&self, id: &PluginId, attach: LogAttacher) -> ExecutorResult<()>;

    /// Deliver a signal to the plugin's process.
    async fn signal(&self, id: &PluginId, signal: Signal) -> ExecutorResult<()>;

    /// PIDs currently running for the plugin.
    async fn pids(&self, id: &PluginId) -> ExecutorResult<Vec<u32>>;
}
