//! Logging for the plugvisor plugin host.
//!
//! Plugin output is forwarded on the `plugvisor::plugin` target, so it can
//! be filtered separately from the manager's own diagnostics:
//!
//! ```rust,no_run
//! use plugvisor_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), plugvisor_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("plugvisor::plugin=warn");
//! setup_logging(&config)?;
//! tracing::info!("Logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
