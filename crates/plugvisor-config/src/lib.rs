#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Configuration for the plugvisor plugin host.
//!
//! # Usage
//!
//! ```rust,no_run
//! use plugvisor_config::Config;
//!
//! let config = Config::load(Some(std::path::Path::new("/etc/plugvisor/config.toml"))).unwrap();
//! println!("plugins live in {}", config.plugins.root.display());
//! ```
//!
//! # Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment** (`PLUGVISOR_ROOT`, `PLUGVISOR_EXEC_ROOT`,
//!    `PLUGVISOR_LIVE_RESTORE`, `PLUGVISOR_LOG_LEVEL`)
//! 2. **Config file**, when one is given
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate depends on no other plugvisor crate.

/// Configuration error types.
pub mod error;
/// Layered configuration loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is malformed, an environment
    /// override is invalid, or validation fails.
    pub fn load(path: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(path)
    }
}
