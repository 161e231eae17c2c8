//! Configuration struct definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level plugvisor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plugin manager settings.
    pub plugins: PluginsConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Plugin manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory holding one subdirectory per installed plugin.
    pub root: PathBuf,
    /// Directory holding per-run plugin state.
    pub exec_root: PathBuf,
    /// Leave plugin processes running across manager restarts.
    pub live_restore: bool,
    /// Extra start attempts during automated recovery.
    pub enable_retries: u32,
    /// Pause between automated start attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Grace period between `SIGTERM` and `SIGKILL`, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/plugvisor/plugins"),
            exec_root: PathBuf::from("/run/plugvisor/plugins"),
            live_restore: false,
            enable_retries: 3,
            retry_backoff_ms: 500,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// Output format: `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Extra `EnvFilter` directives, e.g. `plugvisor::plugin=debug`.
    pub directives: Vec<String>,
    /// Write rolling log files here instead of stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
            directives: Vec::new(),
            directory: None,
        }
    }
}
