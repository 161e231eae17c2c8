//! Plugin log attachment.
//!
//! Forwards a plugin process's stdout and stderr into `tracing`, one event
//! per line on the `plugvisor::plugin` target, tagged with the plugin ID.
//! Copy tasks run until the engine closes the pipes; they are spawned on
//! the manager's [`TaskTracker`] so their lifetime stays observable.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::plugin::PluginId;

/// Longest chunk forwarded as one event; longer lines are split.
pub const MAX_LINE_LEN: u64 = 64 * 1024;

/// Boxed readable pipe end.
pub type ReadPipe = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writable pipe end.
pub type WritePipe = Box<dyn AsyncWrite + Send + Unpin>;

/// Standard streams of a freshly started plugin process.
#[derive(Default)]
pub struct IoPipes {
    /// Process stdin.
    pub stdin: Option<WritePipe>,
    /// Process stdout.
    pub stdout: Option<ReadPipe>,
    /// Process stderr.
    pub stderr: Option<ReadPipe>,
}

impl std::fmt::Debug for IoPipes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoPipes")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Hands a plugin's pipes to the logger.
///
/// Created by the manager per start or reattach and passed to the engine,
/// which calls [`LogAttacher::attach`] once the pipes exist.
#[derive(Debug, Clone)]
pub struct LogAttacher {
    plugin_id: PluginId,
    tracker: TaskTracker,
}

impl LogAttacher {
    /// Create an attacher spawning onto `tracker`.
    #[must_use]
    pub fn new(plugin_id: PluginId, tracker: TaskTracker) -> Self {
        Self { plugin_id, tracker }
    }

    /// The plugin whose output is forwarded.
    #[must_use]
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Close stdin and start forwarding stdout and stderr.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn attach(self, mut pipes: IoPipes) -> LogStreams {
        // Plugins are never driven over stdin.
        drop(pipes.stdin.take());

        let stdout = pipes.stdout.take().map(|reader| {
            self.tracker
                .spawn(forward_lines(self.plugin_id.clone(), "stdout", reader))
        });
        let stderr = pipes.stderr.take().map(|reader| {
            self.tracker
                .spawn(forward_lines(self.plugin_id.clone(), "stderr", reader))
        });
        debug!(plugin_id = %self.plugin_id, "Attached plugin log streams");
        LogStreams { stdout, stderr }
    }
}

/// Handles to the copy tasks of one attachment.
#[derive(Debug)]
pub struct LogStreams {
    stdout: Option<JoinHandle<u64>>,
    stderr: Option<JoinHandle<u64>>,
}

impl LogStreams {
    /// Wait for both copies to end and return the lines forwarded from
    /// stdout and stderr.
    pub async fn join(self) -> (u64, u64) {
        let stdout = match self.stdout {
            Some(h) => h.await.unwrap_or(0),
            None => 0,
        };
        let stderr = match self.stderr {
            Some(h) => h.await.unwrap_or(0),
            None => 0,
        };
        (stdout, stderr)
    }
}

async fn forward_lines(plugin_id: PluginId, stream: &'static str, reader: ReadPipe) -> u64 {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut lines: u64 = 0;
    loop {
        buf.clear();
        match (&mut reader).take(MAX_LINE_LEN).read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                info!(target: "plugvisor::plugin", plugin = %plugin_id, stream, "{line}");
                lines = lines.saturating_add(1);
            },
            Err(e) => {
                debug!(plugin_id = %plugin_id, stream, error = %e, "Plugin log stream read failed");
                break;
            },
        }
    }
    debug!(plugin_id = %plugin_id, stream, lines, "Plugin log stream closed");
    lines
}
