//! Operator-facing plugin operations.
//!
//! Plugins are referenced by full ID, name, or unique ID prefix.

use tracing::{info, warn};

use crate::error::{PluginError, PluginResult};
use crate::plugin::PluginRecord;

use super::Manager;

/// Options for [`Manager::enable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnableConfig {
    /// Shutdown grace period for this run; the configured default when
    /// `None`.
    pub timeout_secs: Option<u64>,
}

/// Options for [`Manager::remove`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveConfig {
    /// Disable an enabled plugin instead of refusing.
    pub force: bool,
}

impl Manager {
    /// Start a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyEnabled`] if the plugin is enabled, or
    /// the engine/mount error that prevented the start.
    pub async fn enable(&self, name: &str, config: &EnableConfig) -> PluginResult<()> {
        let record = self.config.store.get(name).await?;
        let record = self.enable_plugin(record, config.timeout_secs, false).await?;
        self.log_event(&record, "enable");
        Ok(())
    }

    /// Stop a plugin without restarting it.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyDisabled`] if the plugin is not
    /// enabled.
    pub async fn disable(&self, name: &str) -> PluginResult<()> {
        let record = self.config.store.get(name).await?;
        let record = self.disable_plugin(record).await?;
        self.log_event(&record, "disable");
        Ok(())
    }

    /// All installed plugins, sorted by name.
    pub async fn list(&self) -> Vec<PluginRecord> {
        self.config.store.list().await
    }

    /// Look up one plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] or
    /// [`PluginError::AmbiguousReference`].
    pub async fn inspect(&self, name: &str) -> PluginResult<PluginRecord> {
        self.config.store.get(name).await
    }

    /// Uninstall a plugin: forget its controller and record and delete its
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::PluginEnabled`] for an enabled plugin unless
    /// `force` is set, or the I/O error that prevented deletion.
    pub async fn remove(&self, name: &str, config: &RemoveConfig) -> PluginResult<()> {
        let mut record = self.config.store.get(name).await?;
        if record.is_enabled() {
            if !config.force {
                return Err(PluginError::PluginEnabled(record.name().to_string()));
            }
            record = self.disable_plugin(record).await?;
        }

        self.controllers.write().await.remove(record.id());
        self.config.store.remove(record.id()).await;

        if let Some(mount) = &record.propagated_mount
            && let Err(e) = self.config.mounter.unmount(mount)
        {
            warn!(path = %mount.display(), error = %e, "Could not unmount propagated mount");
        }
        record.restore(&self.config.exec_root);
        record.remove_from_disk()?;
        match tokio::fs::remove_dir_all(self.plugin_dir(record.id())).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {},
        }

        info!(plugin_id = %record.id(), plugin = %record.name(), "Plugin removed");
        self.log_event(&record, "remove");
        Ok(())
    }

    /// Override settable environment values of a disabled plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::PluginEnabled`] for an enabled plugin and
    /// [`PluginError::NotSettable`] for rejected arguments.
    pub async fn set(&self, name: &str, args: &[String]) -> PluginResult<()> {
        let mut record = self.config.store.get(name).await?;
        if record.is_enabled() {
            return Err(PluginError::PluginEnabled(record.name().to_string()));
        }
        record.set(args)?;
        self.config.store.update(record.clone()).await;
        self.save(&record)?;
        self.log_event(&record, "set");
        Ok(())
    }
}
