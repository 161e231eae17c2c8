//! Starting and stopping plugin processes.

use std::io::Write;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::controller::{Controller, ExitSignal};
use crate::error::{PluginError, PluginResult};
use crate::executor::{ExecutorError, ProcessSpec, Signal};
use crate::plugin::{PluginId, PluginRecord};

use super::{CONFIG_FILE_NAME, Manager};

impl Manager {
    /// Start a plugin process and mark the plugin enabled.
    ///
    /// `force` is set by automated paths (recovery, crash restart): it
    /// skips the already-enabled check and retries failed starts according
    /// to the configured policy. Operator requests fail on the first error.
    pub(super) async fn enable_plugin(
        &self,
        mut record: PluginRecord,
        timeout_secs: Option<u64>,
        force: bool,
    ) -> PluginResult<PluginRecord> {
        record.derive_rootfs(&self.config.root);
        record.derive_propagated_mount();
        if record.is_enabled() && !force {
            return Err(PluginError::AlreadyEnabled(record.name().to_string()));
        }

        let spec = record.init_spec(&self.config.exec_root)?;

        {
            let mut controllers = self.controllers.write().await;
            let controller = controllers
                .entry(record.id().clone())
                .or_insert_with(|| Controller::new(self.config.default_timeout_secs));
            let timeout = timeout_secs.unwrap_or(controller.timeout_secs);
            controller.arm(timeout);
        }

        let attempts = if force {
            self.config.enable_retries.saturating_add(1)
        } else {
            1
        };
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.start_process(&record, spec.clone()).await {
                Ok(pid) => {
                    if let Some(controller) = self.controllers.write().await.get_mut(record.id()) {
                        controller.started(pid);
                    }
                    debug!(plugin_id = %record.id(), pid, "Plugin process started");
                    break;
                },
                Err(e) if attempt < attempts => {
                    warn!(
                        plugin_id = %record.id(),
                        attempt,
                        attempts,
                        error = %e,
                        "Plugin start failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                },
                Err(e) => {
                    if let Some(controller) = self.controllers.write().await.get_mut(record.id()) {
                        controller.restart = false;
                    }
                    return Err(e);
                },
            }
        }

        self.post_start(record).await
    }

    /// One start attempt: prepare mount propagation and ask the engine
    /// for a process.
    async fn start_process(&self, record: &PluginRecord, spec: ProcessSpec) -> PluginResult<u32> {
        if let Some(mount) = &record.propagated_mount {
            self.config
                .mounter
                .make_rshared(mount)
                .map_err(|source| PluginError::Mount {
                    path: mount.clone(),
                    source,
                })?;
        }

        self.client
            .create(record.id(), spec, self.log_attacher(record.id()))
            .await
            .map_err(|e| {
                if let Some(mount) = &record.propagated_mount
                    && let Err(ue) = self.config.mounter.unmount(mount)
                {
                    warn!(path = %mount.display(), error = %ue, "Could not unmount propagated mount");
                }
                e.into()
            })
    }

    async fn post_start(&self, mut record: PluginRecord) -> PluginResult<PluginRecord> {
        record.enabled = true;
        self.config.store.update(record.clone()).await;
        self.save(&record)?;
        info!(plugin_id = %record.id(), plugin = %record.name(), "Plugin enabled");
        Ok(record)
    }

    /// Stop a plugin's process and mark the plugin disabled.
    pub(super) async fn disable_plugin(&self, record: PluginRecord) -> PluginResult<PluginRecord> {
        if !record.is_enabled() {
            return Err(PluginError::AlreadyDisabled(record.name().to_string()));
        }

        let (exit, timeout) = self.clear_restart(record.id()).await;
        self.shutdown_plugin(record.id(), &exit, timeout).await;

        let record = self.config.store.set_state(record.id(), false).await?;
        self.save(&record)?;
        info!(plugin_id = %record.id(), plugin = %record.name(), "Plugin disabled");
        Ok(record)
    }

    /// Clear the restart intent so the coming exit is not treated as a
    /// crash. Returns the exit signal and grace period to shut down with.
    async fn clear_restart(&self, id: &PluginId) -> (ExitSignal, Duration) {
        let mut controllers = self.controllers.write().await;
        let controller = controllers
            .entry(id.clone())
            .or_insert_with(|| Controller::new(self.config.default_timeout_secs));
        controller.restart = false;
        (controller.exit.clone(), controller.timeout())
    }

    /// Ask the process to terminate, escalating to `SIGKILL` when it has
    /// not exited within `timeout`.
    async fn shutdown_plugin(&self, id: &PluginId, exit: &ExitSignal, timeout: Duration) {
        match self.client.signal(id, Signal::Terminate).await {
            Ok(()) => {},
            Err(ExecutorError::NoSuchProcess(_)) => {
                debug!(plugin_id = %id, "Plugin process already gone");
                return;
            },
            Err(e) => {
                error!(plugin_id = %id, error = %e, "Sending SIGTERM to plugin failed");
                return;
            },
        }
        if exit.wait_timeout(timeout).await {
            debug!(plugin_id = %id, "Clean shutdown of plugin");
            return;
        }
        debug!(plugin_id = %id, "Force shutdown plugin");
        if let Err(e) = self.client.signal(id, Signal::Kill).await {
            error!(plugin_id = %id, error = %e, "Sending SIGKILL to plugin failed");
        }
    }

    /// Stop every running plugin.
    ///
    /// With live restore active, processes are left running for the next
    /// manager to adopt.
    pub async fn shutdown(&self) {
        let running: Vec<PluginRecord> = self
            .config
            .store
            .list()
            .await
            .into_iter()
            .filter(PluginRecord::is_enabled)
            .collect();

        if self.config.live_restore_enabled {
            debug!(count = running.len(), "Plugins active with live restore set, skipping shutdown");
        } else {
            let stops = running.iter().map(|record| async move {
                let (exit, timeout) = self.clear_restart(record.id()).await;
                self.shutdown_plugin(record.id(), &exit, timeout).await;
            });
            join_all(stops).await;
        }
        self.log_tasks.close();
    }

    /// Persist a record to `{root}/{id}/config.json` atomically.
    pub(super) fn save(&self, record: &PluginRecord) -> PluginResult<()> {
        let save_err = |message: String| PluginError::SaveFailed {
            plugin_id: record.id().clone(),
            message,
        };
        let dir = self.plugin_dir(record.id());
        let path = dir.join(CONFIG_FILE_NAME);

        let body = serde_json::to_vec(record).map_err(|e| save_err(format!("encode: {e}")))?;
        std::fs::create_dir_all(&dir).map_err(|e| save_err(format!("create {}: {e}", dir.display())))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| save_err(format!("create temp file: {e}")))?;
        tmp.write_all(&body)
            .map_err(|e| save_err(format!("write temp file: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| save_err(format!("sync temp file: {e}")))?;
        tmp.persist(&path)
            .map_err(|e| save_err(format!("replace {}: {e}", path.display())))?;

        debug!(plugin_id = %record.id(), path = %path.display(), "Saved plugin record");
        Ok(())
    }
}
