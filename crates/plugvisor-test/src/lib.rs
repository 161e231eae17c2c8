//! Shared test utilities for plugvisor.
//!
//! Mock execution and mount backends, plugin directory fixtures, and log
//! capture for asserting on `tracing` output.
//!
//! ```rust,ignore
//! use plugvisor_test::{MockExecutor, PluginFixture, TestRoots};
//!
//! #[tokio::test]
//! async fn test_enabled_plugin_starts() {
//!     let roots = TestRoots::new();
//!     PluginFixture::new(1, "sshfs:latest").enabled().write(&roots.root());
//!     let executor = MockExecutor::new();
//!     let manager = roots.manager(&executor).await.unwrap();
//!     assert_eq!(executor.created().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::{PluginFixture, TestRoots, test_plugin_id, write_raw_config};
pub use harness::{CapturedLogs, capture_logs, setup_test_logging};
pub use mocks::{ExecutorCall, FIRST_MOCK_PID, MockExecutor, MockMounter, MountCall};
