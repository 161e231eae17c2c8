//! Plugin error types.

use std::path::PathBuf;

use crate::executor::ExecutorError;
use crate::plugin::PluginId;

/// Errors from plugin lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No plugin with this identity or name is known to the store.
    #[error("plugin not found: {0}")]
    NotFound(String),

    /// A short reference matched more than one plugin.
    #[error("multiple plugins found for reference {0}")]
    AmbiguousReference(String),

    /// The string is not a valid full plugin ID.
    #[error("invalid plugin id: {0}")]
    InvalidId(String),

    /// Failed to create one of the manager's directories.
    #[error("failed to create {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to list the plugin root during reload.
    #[error("failed to read {path}: {source}")]
    ReadRoot {
        /// The plugin root directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A persisted plugin record could not be read.
    #[error("error reading {path}: {source}")]
    ReadRecord {
        /// Path to the `config.json` file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A persisted plugin record could not be decoded.
    #[error("error decoding {path}: {source}")]
    DecodeRecord {
        /// Path to the `config.json` file.
        path: PathBuf,
        /// JSON decode error.
        source: serde_json::Error,
    },

    /// A plugin record could not be written back to disk.
    #[error("failed to save plugin {plugin_id}: {message}")]
    SaveFailed {
        /// The plugin being saved.
        plugin_id: PluginId,
        /// Failure reason.
        message: String,
    },

    /// Startup recovery failed; the manager was not constructed.
    #[error("failed to restore plugins: {0}")]
    Restore(Box<PluginError>),

    /// The execution engine refused to hand out a client.
    #[error("failed to create executor client: {0}")]
    ClientUnavailable(#[source] ExecutorError),

    /// An execution engine call failed.
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// The plugin is already enabled.
    #[error("plugin {0} is already enabled")]
    AlreadyEnabled(String),

    /// The plugin is already disabled.
    #[error("plugin {0} is already disabled")]
    AlreadyDisabled(String),

    /// The operation is not allowed while the plugin is enabled.
    #[error("plugin {0} is enabled")]
    PluginEnabled(String),

    /// A `set` argument is malformed or targets a non-settable variable.
    #[error("setting {key} is not allowed: {reason}")]
    NotSettable {
        /// The offending key (or the whole argument when malformed).
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Mount propagation setup failed.
    #[error("mount error at {path}: {source}")]
    Mount {
        /// The propagated mount path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A state-change event arrived after the manager was dropped.
    #[error("plugin manager is closed")]
    ManagerClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
