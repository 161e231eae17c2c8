//! Plugin directory fixtures.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;

use plugvisor_plugins::{
    CONFIG_FILE_NAME, Manager, ManagerConfig, PluginId, PluginResult, PluginStore,
};

use crate::mocks::{MockExecutor, MockMounter};

/// A full 64-character plugin ID made of the byte `n` repeated.
///
/// # Panics
///
/// Never in practice; the generated string is always a valid ID.
#[must_use]
pub fn test_plugin_id(n: u8) -> PluginId {
    PluginId::new(format!("{n:02x}").repeat(32)).expect("generated id is valid")
}

/// Builder for a persisted plugin record.
#[derive(Debug, Clone)]
pub struct PluginFixture {
    id: PluginId,
    name: String,
    enabled: bool,
    types: Vec<String>,
    propagated_mount: String,
    entrypoint: Vec<String>,
    env: Vec<Value>,
    settings_env: Vec<String>,
}

impl PluginFixture {
    /// A disabled plugin with ID `test_plugin_id(n)` and no capabilities.
    #[must_use]
    pub fn new(n: u8, name: &str) -> Self {
        Self {
            id: test_plugin_id(n),
            name: name.to_string(),
            enabled: false,
            types: Vec::new(),
            propagated_mount: String::new(),
            entrypoint: vec!["/bin/plugin".to_string()],
            env: Vec::new(),
            settings_env: Vec::new(),
        }
    }

    /// Mark the plugin enabled.
    #[must_use]
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    /// Declare an interface type such as `docker.volumedriver/1.0`.
    #[must_use]
    pub fn with_type(mut self, interface_type: &str) -> Self {
        self.types.push(interface_type.to_string());
        self
    }

    /// Set the configured propagated mount path.
    #[must_use]
    pub fn with_propagated_mount(mut self, path: &str) -> Self {
        self.propagated_mount = path.to_string();
        self
    }

    /// Declare an environment variable with a default value.
    #[must_use]
    pub fn with_env(mut self, name: &str, value: &str, settable: bool) -> Self {
        let settable: Vec<&str> = if settable { vec!["value"] } else { Vec::new() };
        self.env.push(json!({
            "Name": name,
            "Description": "",
            "Settable": settable,
            "Value": value,
        }));
        self
    }

    /// Add an operator `KEY=VALUE` setting.
    #[must_use]
    pub fn with_setting(mut self, setting: &str) -> Self {
        self.settings_env.push(setting.to_string());
        self
    }

    /// The fixture's plugin ID.
    #[must_use]
    pub fn id(&self) -> &PluginId {
        &self.id
    }

    /// The persisted JSON form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "Id": self.id.as_str(),
            "Name": self.name,
            "PluginReference": format!("registry.example/{}", self.name),
            "Enabled": self.enabled,
            "Config": {
                "Description": "test plugin",
                "Documentation": "",
                "Interface": {
                    "Types": self.types,
                    "Socket": "plugin.sock",
                },
                "Entrypoint": self.entrypoint,
                "WorkDir": "",
                "Env": self.env,
                "Args": {
                    "Name": "",
                    "Description": "",
                    "Settable": [],
                    "Value": [],
                },
                "PropagatedMount": self.propagated_mount,
            },
            "Settings": {
                "Env": self.settings_env,
                "Args": [],
            },
        })
    }

    /// Write `{root}/{id}/config.json` and return the plugin directory.
    ///
    /// # Panics
    ///
    /// Panics if the files cannot be written.
    pub fn write(&self, root: &Path) -> PathBuf {
        let body = serde_json::to_string_pretty(&self.to_json()).expect("fixture serializes");
        write_raw_config(root, self.id.as_str(), &body)
    }
}

/// Write arbitrary `config.json` content under `{root}/{dir_name}`.
///
/// # Panics
///
/// Panics if the files cannot be written.
pub fn write_raw_config(root: &Path, dir_name: &str, body: &str) -> PathBuf {
    let dir = root.join(dir_name);
    std::fs::create_dir_all(&dir).expect("Failed to create plugin directory");
    std::fs::write(dir.join(CONFIG_FILE_NAME), body).expect("Failed to write config.json");
    dir
}

/// Temporary plugin and exec roots.
#[derive(Debug)]
pub struct TestRoots {
    dir: TempDir,
}

impl TestRoots {
    /// Create fresh roots; both directories exist.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directories cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        std::fs::create_dir_all(dir.path().join("plugins")).expect("Failed to create root");
        std::fs::create_dir_all(dir.path().join("exec")).expect("Failed to create exec root");
        Self { dir }
    }

    /// The plugin root.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    /// The exec root.
    #[must_use]
    pub fn exec_root(&self) -> PathBuf {
        self.dir.path().join("exec")
    }

    /// A manager config with mock backends, fast retries and a one-second
    /// shutdown grace period.
    #[must_use]
    pub fn config(&self, executor: &MockExecutor, mounter: &MockMounter) -> ManagerConfig {
        ManagerConfig::new(
            self.root(),
            self.exec_root(),
            Arc::new(executor.clone()),
            Arc::new(PluginStore::new()),
        )
        .with_mounter(Arc::new(mounter.clone()))
        .with_enable_retries(2, Duration::from_millis(1))
        .with_default_timeout(1)
    }

    /// Construct a manager over these roots with a fresh [`MockMounter`].
    ///
    /// # Errors
    ///
    /// Returns whatever [`Manager::new`] returns.
    pub async fn manager(&self, executor: &MockExecutor) -> PluginResult<Arc<Manager>> {
        Manager::new(self.config(executor, &MockMounter::new())).await
    }
}

impl Default for TestRoots {
    fn default() -> Self {
        Self::new()
    }
}
