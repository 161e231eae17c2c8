//! The plugin lifecycle manager.
//!
//! [`Manager`] owns the controller table, recovers installed plugins at
//! construction, and reacts to process state changes from the execution
//! engine for the rest of its lifetime.
//!
//! # Locking
//!
//! The controller table sits behind a single reader/writer lock. Critical
//! sections only read or mutate controllers; every filesystem, mount, and
//! engine call happens after the guard is dropped.

mod backend;
mod events;
mod lifecycle;
mod reload;

pub use backend::{EnableConfig, RemoveConfig};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::debug;

use plugvisor_config::PluginsConfig;

use crate::controller::{Controller, ExitSignal};
use crate::error::{PluginError, PluginResult};
use crate::executor::{Executor, ExecutorClient, StateInfo, StateSink};
use crate::logs::LogAttacher;
use crate::mount::{HostMounter, Mounter};
use crate::plugin::{PluginId, PluginRecord};
use crate::store::PluginStore;

/// Name of the persisted record inside each plugin directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Callback for plugin events: `(id, name, action)`.
pub type EventLogger = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Everything needed to construct a [`Manager`].
#[derive(Clone)]
pub struct ManagerConfig {
    /// Authoritative plugin index.
    pub store: Arc<PluginStore>,
    /// Process execution engine.
    pub executor: Arc<dyn Executor>,
    /// Mount propagation backend.
    pub mounter: Arc<dyn Mounter>,
    /// Whether plugin processes survive a manager restart.
    pub live_restore_enabled: bool,
    /// Sink for enable/disable/remove events.
    pub log_plugin_event: EventLogger,
    /// Directory holding one subdirectory per installed plugin.
    pub root: PathBuf,
    /// Directory holding per-run plugin state.
    pub exec_root: PathBuf,
    /// Extra start attempts during automated recovery.
    pub enable_retries: u32,
    /// Pause between automated start attempts.
    pub retry_backoff: Duration,
    /// Grace period used when an enable request names none.
    pub default_timeout_secs: u64,
}

impl ManagerConfig {
    /// Create a config with default recovery policy, host mounts, and no
    /// event logging.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        exec_root: impl Into<PathBuf>,
        executor: Arc<dyn Executor>,
        store: Arc<PluginStore>,
    ) -> Self {
        Self {
            store,
            executor,
            mounter: Arc::new(HostMounter),
            live_restore_enabled: false,
            log_plugin_event: Arc::new(|_, _, _| {}),
            root: root.into(),
            exec_root: exec_root.into(),
            enable_retries: 3,
            retry_backoff: Duration::from_millis(500),
            default_timeout_secs: 10,
        }
    }

    /// Build a manager config from the `[plugins]` configuration section.
    #[must_use]
    pub fn from_config(
        config: &PluginsConfig,
        executor: Arc<dyn Executor>,
        store: Arc<PluginStore>,
    ) -> Self {
        Self::new(config.root.clone(), config.exec_root.clone(), executor, store)
            .with_live_restore(config.live_restore)
            .with_enable_retries(
                config.enable_retries,
                Duration::from_millis(config.retry_backoff_ms),
            )
            .with_default_timeout(config.shutdown_timeout_secs)
    }

    /// Set whether live restore is active.
    #[must_use]
    pub fn with_live_restore(mut self, enabled: bool) -> Self {
        self.live_restore_enabled = enabled;
        self
    }

    /// Replace the mount backend.
    #[must_use]
    pub fn with_mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounter = mounter;
        self
    }

    /// Set the event logging callback.
    #[must_use]
    pub fn with_event_logger(
        mut self,
        logger: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.log_plugin_event = Arc::new(logger);
        self
    }

    /// Set the automated start retry policy.
    #[must_use]
    pub fn with_enable_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.enable_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Set the default shutdown grace period.
    #[must_use]
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("root", &self.root)
            .field("exec_root", &self.exec_root)
            .field("live_restore_enabled", &self.live_restore_enabled)
            .field("enable_retries", &self.enable_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("default_timeout_secs", &self.default_timeout_secs)
            .field("mounter", &self.mounter)
            .finish_non_exhaustive()
    }
}

/// Controls the plugin subsystem.
pub struct Manager {
    config: ManagerConfig,
    controllers: RwLock<HashMap<PluginId, Controller>>,
    client: Arc<dyn ExecutorClient>,
    log_tasks: TaskTracker,
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("log_tasks", &self.log_tasks.len())
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Create the manager and recover every installed plugin.
    ///
    /// Creates `root` and `exec_root` (mode `0700`), registers the manager
    /// with the execution engine, then runs reload. Individual plugins that
    /// fail to recover are logged and skipped; an unreadable or corrupt
    /// record aborts construction.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::CreateDir`] if a directory cannot be created,
    /// [`PluginError::ClientUnavailable`] if the engine refuses a client,
    /// and [`PluginError::Restore`] if reload fails.
    pub async fn new(config: ManagerConfig) -> PluginResult<Arc<Self>> {
        create_private_dir(&config.root)?;
        create_private_dir(&config.exec_root)?;

        let sink = Arc::new(ManagerSink::default());
        let client = config
            .executor
            .client(Arc::clone(&sink) as Arc<dyn StateSink>)
            .await
            .map_err(PluginError::ClientUnavailable)?;

        let manager = Arc::new(Self {
            config,
            controllers: RwLock::new(HashMap::new()),
            client,
            log_tasks: TaskTracker::new(),
        });
        // Set exactly once, right after construction.
        let _ = sink.manager.set(Arc::downgrade(&manager));

        manager
            .reload()
            .await
            .map_err(|e| PluginError::Restore(Box::new(e)))?;
        Ok(manager)
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The plugin store the manager publishes to.
    #[must_use]
    pub fn store(&self) -> &Arc<PluginStore> {
        &self.config.store
    }

    /// Snapshot of a plugin's controller.
    pub async fn controller(&self, id: &PluginId) -> Option<Controller> {
        self.controllers.read().await.get(id).cloned()
    }

    /// The exit signal of a plugin's current process.
    ///
    /// Lets a caller block until the process exits without polling.
    pub async fn exit_signal(&self, id: &PluginId) -> Option<ExitSignal> {
        self.controllers
            .read()
            .await
            .get(id)
            .map(|c| c.exit.clone())
    }

    /// Number of log copy tasks still running.
    #[must_use]
    pub fn active_log_streams(&self) -> usize {
        self.log_tasks.len()
    }

    /// Wait until every log copy task has ended.
    ///
    /// Copies end when the engine closes the plugin's pipes.
    pub async fn wait_log_streams(&self) {
        self.log_tasks.close();
        self.log_tasks.wait().await;
        self.log_tasks.reopen();
    }

    fn log_attacher(&self, id: &PluginId) -> LogAttacher {
        LogAttacher::new(id.clone(), self.log_tasks.clone())
    }

    fn log_event(&self, record: &PluginRecord, action: &str) {
        (self.config.log_plugin_event)(record.id().as_str(), record.name(), action);
    }

    fn plugin_dir(&self, id: &PluginId) -> PathBuf {
        self.config.root.join(id.as_str())
    }
}

/// The manager's registration with the execution engine.
///
/// Holds a weak reference so the engine client never keeps the manager
/// alive.
#[derive(Default)]
struct ManagerSink {
    manager: OnceLock<Weak<Manager>>,
}

#[async_trait]
impl StateSink for ManagerSink {
    async fn state_changed(&self, id: &str, info: StateInfo) -> PluginResult<()> {
        let Some(manager) = self.manager.get().and_then(Weak::upgrade) else {
            debug!(plugin_id = id, "Dropping state change for closed manager");
            return Err(PluginError::ManagerClosed);
        };
        manager.state_changed(id, info).await
    }
}

/// Create `path` and any missing parents with mode `0700`.
fn create_private_dir(path: &Path) -> PluginResult<()> {
    create_dir_with_mode(path, 0o700).map_err(|source| PluginError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn create_dir_with_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path)
}
