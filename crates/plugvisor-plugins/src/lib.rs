//! Plugin lifecycle manager for the plugvisor container-engine host.
//!
//! Plugins are out-of-process helpers, each run as an isolated process by
//! an external execution engine. This crate keeps them in the state the
//! operator asked for:
//!
//! - [`PluginRecord`]: persisted description of one installed plugin
//! - [`PluginStore`]: in-memory index, the source of truth for callers
//! - [`Manager`]: recovers plugins at startup, starts and stops them, and
//!   restarts them after unexpected exits
//! - [`Executor`] / [`ExecutorClient`]: the execution engine seam
//! - [`Mounter`]: mount propagation for volume and graph driver plugins
//!
//! # Layout on disk
//!
//! ```text
//! {root}/{id}/config.json   persisted record
//! {root}/{id}/rootfs        plugin root filesystem
//! {exec_root}/{id}          per-run state, removed on every exit
//! ```
//!
//! `{id}` is always a 64-character lowercase hex plugin ID; other entries
//! under `root` are ignored.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod controller;
pub mod error;
pub mod executor;
pub mod logs;
pub mod manager;
pub mod mount;
pub mod plugin;
pub mod store;

pub use controller::{Controller, ExitSignal};
pub use error::{PluginError, PluginResult};
pub use executor::{
    Executor, ExecutorClient, ExecutorError, ExecutorResult, ProcessSpec, ProcessState, Signal,
    StateInfo, StateSink,
};
pub use logs::{IoPipes, LogAttacher, LogStreams};
pub use manager::{CONFIG_FILE_NAME, EnableConfig, EventLogger, Manager, ManagerConfig, RemoveConfig};
pub use mount::{HostMounter, Mounter};
pub use plugin::{InterfaceType, PluginConfig, PluginId, PluginRecord, PluginSettings};
pub use store::PluginStore;
