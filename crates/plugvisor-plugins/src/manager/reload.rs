//! Startup recovery.
//!
//! Loading is all-or-nothing: one unreadable record fails the whole reload.
//! Recovery is per plugin: each runs in its own task and failures are only
//! logged, so one broken plugin never keeps the rest of the fleet down.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::controller::Controller;
use crate::error::{PluginError, PluginResult};
use crate::plugin::{PluginId, PluginRecord};

use super::{CONFIG_FILE_NAME, Manager, create_dir_with_mode};

impl Manager {
    /// Reconcile on-disk records with the store and live processes.
    pub(super) async fn reload(self: &Arc<Self>) -> PluginResult<()> {
        let root = &self.config.root;
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|source| PluginError::ReadRoot {
                path: root.clone(),
                source,
            })?;

        let mut plugins = HashMap::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| PluginError::ReadRoot {
                path: root.clone(),
                source,
            })?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !PluginId::is_full_id(name) {
                debug!(entry = name, "Skipping non-plugin entry in plugin root");
                continue;
            }
            let record = self.load_plugin(name).await?;
            plugins.insert(record.id().clone(), record);
        }

        self.config.store.set_all(plugins.clone()).await;

        {
            let mut controllers = self.controllers.write().await;
            for id in plugins.keys() {
                controllers.insert(id.clone(), Controller::new(self.config.default_timeout_secs));
            }
        }

        info!(count = plugins.len(), "Restoring plugins");

        let tasks: Vec<_> = plugins
            .into_values()
            .map(|record| {
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    let id = record.id().clone();
                    let name = record.name().to_string();
                    if let Err(e) = manager.recover_plugin(record).await {
                        error!(plugin_id = %id, plugin = %name, error = %e, "Failed to restore plugin");
                    }
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Plugin recovery task panicked");
            }
        }
        Ok(())
    }

    /// Read and decode `{root}/{id}/config.json`.
    async fn load_plugin(&self, id: &str) -> PluginResult<PluginRecord> {
        let path = self.config.root.join(id).join(CONFIG_FILE_NAME);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|source| PluginError::ReadRecord {
                path: path.clone(),
                source,
            })?;
        serde_json::from_slice(&data).map_err(|source| PluginError::DecodeRecord { path, source })
    }

    /// Recover one plugin. Runs in its own task during reload.
    async fn recover_plugin(self: Arc<Self>, mut record: PluginRecord) -> PluginResult<()> {
        record.restore(&self.config.exec_root);
        if record.is_enabled() {
            self.client
                .restore(record.id(), self.log_attacher(record.id()))
                .await?;
        }

        record.derive_rootfs(&self.config.root);

        if let Some(mount) = record.derive_propagated_mount() {
            create_dir_with_mode(mount, 0o755).map_err(|source| PluginError::CreateDir {
                path: mount.to_path_buf(),
                source,
            })?;
        }

        self.config.store.update(record.clone()).await;

        if !record.is_enabled() {
            return Ok(());
        }

        if !self.config.live_restore_enabled {
            // Without live restore the engine did not keep the process
            // running, so the enabled intent has to be re-applied.
            if let Err(e) = self.enable_plugin(record.clone(), None, true).await {
                error!(plugin_id = %record.id(), plugin = %record.name(), error = %e, "Failed to enable plugin");
            }
            return Ok(());
        }

        self.adopt_or_enable(record).await;
        Ok(())
    }

    /// With live restore, take over a still-running process or start a
    /// new one if it is gone.
    async fn adopt_or_enable(&self, record: PluginRecord) {
        let pids = match self.client.pids(record.id()).await {
            Ok(pids) => pids,
            Err(e) => {
                warn!(plugin_id = %record.id(), error = %e, "Failed to list plugin processes");
                Vec::new()
            },
        };

        if pids.is_empty() {
            debug!(plugin_id = %record.id(), "Plugin not running after live restore, starting it");
            if let Err(e) = self.enable_plugin(record.clone(), None, true).await {
                error!(plugin_id = %record.id(), plugin = %record.name(), error = %e, "Failed to enable plugin");
            }
            return;
        }

        {
            let mut controllers = self.controllers.write().await;
            let controller = controllers
                .entry(record.id().clone())
                .or_insert_with(|| Controller::new(self.config.default_timeout_secs));
            let timeout = controller.timeout_secs;
            controller.arm(timeout);
            if let Some(&pid) = pids.first() {
                controller.started(pid);
            }
        }
        info!(plugin_id = %record.id(), pids = ?pids, "Adopted running plugin");
    }
}
