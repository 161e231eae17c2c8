//! Process state change handling.

use tracing::{debug, error, info, warn};

use crate::error::PluginResult;
use crate::executor::{ProcessState, StateInfo};

use super::Manager;

impl Manager {
    /// Update plugin internals after a process state change.
    ///
    /// Only exits are acted upon: the exit signal is closed, the plugin's
    /// runtime directory is removed, any propagated mount is unmounted, and
    /// the plugin is started again if its controller still intends to
    /// restart. An exit carrying the PID of an earlier run is dropped, so a
    /// repeated notification never starts a second process.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`](crate::PluginError::NotFound) when
    /// the ID is not in the store; nothing is changed in that case.
    pub async fn state_changed(&self, id: &str, info: StateInfo) -> PluginResult<()> {
        debug!(plugin_id = id, ?info, "Plugin state changed");

        if info.state != ProcessState::Exit {
            return Ok(());
        }

        let mut record = self.config.store.get_by_id(id).await?;

        let (first_exit, restart) = {
            let mut controllers = self.controllers.write().await;
            match controllers.get_mut(record.id()) {
                Some(controller) if !controller.owns_exit(info.pid) => {
                    debug!(
                        plugin_id = %record.id(),
                        pid = ?info.pid,
                        current = ?controller.pid,
                        "Ignoring exit of a previous run"
                    );
                    return Ok(());
                },
                Some(controller) => (controller.exited(info.pid), controller.restart),
                None => (true, false),
            }
        };

        // Per-run state goes on every exit; the persisted record stays.
        record.restore(&self.config.exec_root);
        if let Err(e) = record.remove_from_disk() {
            warn!(
                plugin_id = %record.id(),
                path = %record.runtime_source_path.display(),
                error = %e,
                "Could not remove plugin runtime state"
            );
        }

        if let Some(mount) = &record.propagated_mount
            && let Err(e) = self.config.mounter.unmount(mount)
        {
            warn!(path = %mount.display(), error = %e, "Could not unmount propagated mount");
        }

        if !first_exit {
            debug!(plugin_id = %record.id(), "Duplicate exit notification");
            return Ok(());
        }

        if restart {
            info!(plugin_id = %record.id(), plugin = %record.name(), exit_code = ?info.exit_code, "Restarting plugin after unexpected exit");
            if let Err(e) = self.enable_plugin(record.clone(), None, true).await {
                error!(plugin_id = %record.id(), plugin = %record.name(), error = %e, "Failed to restart plugin");
            }
        }
        Ok(())
    }
}
