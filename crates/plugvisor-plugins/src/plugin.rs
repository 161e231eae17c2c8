//! Plugin record and identity types.
//!
//! A [`PluginRecord`] is the persisted description of one installed plugin,
//! stored as `{root}/{id}/config.json`. The runtime paths (`rootfs`,
//! propagated mount, runtime directory) are derived from the manager's
//! directories and the plugin ID every time the record is loaded; they are
//! never read back from disk.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::executor::ProcessSpec;

/// Length of a full plugin ID in hex characters.
pub const FULL_ID_LEN: usize = 64;

/// Capabilities that need the plugin rootfs propagated back to the host.
const PROPAGATING_CAPABILITIES: [&str; 2] = ["volumedriver", "graphdriver"];

/// Full, immutable plugin identifier: 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PluginId(String);

impl<'de> Deserialize<'de> for PluginId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl PluginId {
    /// Create a new `PluginId`, validating the full-ID format.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidId`] unless `id` is exactly 64
    /// lowercase hex characters.
    pub fn new(id: impl Into<String>) -> PluginResult<Self> {
        let id = id.into();
        if !Self::is_full_id(&id) {
            return Err(PluginError::InvalidId(id));
        }
        Ok(Self(id))
    }

    /// Whether `s` matches the full-ID format.
    ///
    /// Used by reload to decide which directory entries are plugins.
    #[must_use]
    pub fn is_full_id(s: &str) -> bool {
        s.len() == FULL_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Twelve-character prefix used in human-facing messages.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PluginId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One declared plugin capability, e.g. `docker.volumedriver/1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceType {
    /// Capability name (`volumedriver`, `authz`, ...).
    pub capability: String,
    /// Name prefix (`docker` for engine-defined capabilities).
    pub prefix: String,
    /// Capability protocol version.
    pub version: String,
}

impl InterfaceType {
    /// Whether this capability needs rootfs mount propagation.
    ///
    /// Only the legacy `docker` volume and graph driver protocols at a
    /// `1.x` version qualify.
    #[must_use]
    pub fn requires_propagation(&self) -> bool {
        PROPAGATING_CAPABILITIES.contains(&self.capability.as_str())
            && self.prefix == "docker"
            && self.version.starts_with("1.")
    }
}

impl FromStr for InterfaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, version) = match s.split_once('/') {
            Some((head, version)) => (head, version),
            None => (s, ""),
        };
        let (prefix, capability) = head.rsplit_once('.').unwrap_or(("", head));
        if capability.is_empty() {
            return Err(format!("{s:?} is not a plugin interface type"));
        }
        Ok(Self {
            capability: capability.to_string(),
            prefix: prefix.to_string(),
            version: version.to_string(),
        })
    }
}

impl TryFrom<String> for InterfaceType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.prefix.is_empty() {
            write!(f, "{}.", self.prefix)?;
        }
        f.write_str(&self.capability)?;
        if !self.version.is_empty() {
            write!(f, "/{}", self.version)?;
        }
        Ok(())
    }
}

impl From<InterfaceType> for String {
    fn from(value: InterfaceType) -> Self {
        value.to_string()
    }
}

/// Interface section of a plugin config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginInterface {
    /// Declared capabilities, in declaration order.
    #[serde(default)]
    pub types: Vec<InterfaceType>,
    /// Socket file name the plugin listens on inside its runtime directory.
    #[serde(default)]
    pub socket: String,
}

/// An environment variable declared by the plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginEnv {
    /// Variable name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Which attributes an operator may change (`"value"`).
    #[serde(default)]
    pub settable: Vec<String>,
    /// Default value, if any.
    #[serde(default)]
    pub value: Option<String>,
}

impl PluginEnv {
    /// Whether an operator may override the value.
    #[must_use]
    pub fn value_settable(&self) -> bool {
        self.settable.iter().any(|s| s == "value")
    }
}

/// Default command-line arguments declared by the plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginArgs {
    /// Name of the argument set.
    #[serde(default)]
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Which attributes an operator may change.
    #[serde(default)]
    pub settable: Vec<String>,
    /// Default argument values.
    #[serde(default)]
    pub value: Vec<String>,
}

/// The plugin's own configuration, as shipped by its author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginConfig {
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Documentation link.
    #[serde(default)]
    pub documentation: String,
    /// Declared interface.
    #[serde(default)]
    pub interface: PluginInterface,
    /// Process argv prefix.
    #[serde(default)]
    pub entrypoint: Vec<String>,
    /// Working directory inside the rootfs.
    #[serde(default, rename = "WorkDir")]
    pub work_dir: String,
    /// Declared environment.
    #[serde(default)]
    pub env: Vec<PluginEnv>,
    /// Declared default arguments.
    #[serde(default)]
    pub args: PluginArgs,
    /// Path inside the rootfs to propagate back to the host.
    #[serde(default)]
    pub propagated_mount: String,
}

/// Operator-controlled settings layered over [`PluginConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginSettings {
    /// `KEY=VALUE` overrides.
    #[serde(default)]
    pub env: Vec<String>,
    /// Argument overrides; replaces the declared defaults when non-empty.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Persisted description of one installed plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PluginRecord {
    #[serde(rename = "Id")]
    id: PluginId,
    /// Human label (`name:tag`).
    pub name: String,
    /// Reference the plugin was pulled from.
    #[serde(default)]
    pub plugin_reference: String,
    /// Whether the plugin should be running.
    #[serde(default)]
    pub enabled: bool,
    /// Author configuration.
    #[serde(default)]
    pub config: PluginConfig,
    /// Operator settings.
    #[serde(default)]
    pub settings: PluginSettings,
    /// Derived root filesystem, `{root}/{id}/rootfs`.
    #[serde(skip)]
    pub rootfs: PathBuf,
    /// Derived host path of the propagated mount.
    #[serde(skip)]
    pub propagated_mount: Option<PathBuf>,
    /// Derived per-run state directory, `{exec_root}/{id}`.
    #[serde(skip)]
    pub runtime_source_path: PathBuf,
}

impl PluginRecord {
    /// Create a disabled record with an empty config.
    #[must_use]
    pub fn new(id: PluginId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            plugin_reference: String::new(),
            enabled: false,
            config: PluginConfig::default(),
            settings: PluginSettings::default(),
            rootfs: PathBuf::new(),
            propagated_mount: None,
            runtime_source_path: PathBuf::new(),
        }
    }

    /// The plugin's identity.
    #[must_use]
    pub fn id(&self) -> &PluginId {
        &self.id
    }

    /// The plugin's human label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the plugin is marked enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Point the record at its per-run state directory under `exec_root`.
    pub fn restore(&mut self, exec_root: &Path) {
        self.runtime_source_path = exec_root.join(self.id.as_str());
    }

    /// Recompute `rootfs` from the plugin root.
    pub fn derive_rootfs(&mut self, root: &Path) {
        self.rootfs = root.join(self.id.as_str()).join("rootfs");
    }

    /// Whether any declared capability needs a propagated mount.
    #[must_use]
    pub fn requires_propagated_mount(&self) -> bool {
        self.config
            .interface
            .types
            .iter()
            .any(InterfaceType::requires_propagation)
    }

    /// Recompute `propagated_mount` from `rootfs` and the config.
    ///
    /// The configured path is confined to the rootfs: root, prefix and
    /// parent components are dropped before joining. Returns the derived
    /// path, or `None` when no capability requires propagation or the
    /// config names no path.
    pub fn derive_propagated_mount(&mut self) -> Option<&Path> {
        self.propagated_mount = None;
        if !self.requires_propagated_mount() || self.config.propagated_mount.is_empty() {
            return None;
        }
        let relative: PathBuf = Path::new(&self.config.propagated_mount)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        self.propagated_mount = Some(self.rootfs.join(relative));
        self.propagated_mount.as_deref()
    }

    /// Build the process spec for this plugin and create its runtime
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the runtime directory cannot be created.
    pub fn init_spec(&mut self, exec_root: &Path) -> std::io::Result<ProcessSpec> {
        self.restore(exec_root);
        std::fs::create_dir_all(&self.runtime_source_path)?;

        let mut env: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .filter_map(|e| e.value.clone().map(|v| (e.name.clone(), v)))
            .collect();
        for setting in &self.settings.env {
            if let Some((key, value)) = setting.split_once('=') {
                match env.iter_mut().find(|(k, _)| k == key) {
                    Some(slot) => slot.1 = value.to_string(),
                    None => env.push((key.to_string(), value.to_string())),
                }
            }
        }

        let mut args = self.config.entrypoint.clone();
        if self.settings.args.is_empty() {
            args.extend(self.config.args.value.iter().cloned());
        } else {
            args.extend(self.settings.args.iter().cloned());
        }

        let cwd = if self.config.work_dir.is_empty() {
            PathBuf::from("/")
        } else {
            PathBuf::from(&self.config.work_dir)
        };

        Ok(ProcessSpec {
            rootfs: self.rootfs.clone(),
            args,
            env: env.into_iter().map(|(k, v)| format!("{k}={v}")).collect(),
            cwd,
            runtime_dir: self.runtime_source_path.clone(),
            propagated_mount: self.propagated_mount.clone(),
        })
    }

    /// Remove the per-run state directory.
    ///
    /// A missing directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory exists but cannot be removed.
    pub fn remove_from_disk(&self) -> std::io::Result<()> {
        if self.runtime_source_path.as_os_str().is_empty() {
            return Ok(());
        }
        match std::fs::remove_dir_all(&self.runtime_source_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Apply `KEY=VALUE` environment overrides.
    ///
    /// Every key must be declared in the config with a settable value. The
    /// record is left untouched if any argument is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotSettable`] for malformed arguments or keys
    /// that are undeclared or not settable.
    pub fn set(&mut self, args: &[String]) -> PluginResult<()> {
        let mut env = self.settings.env.clone();
        for arg in args {
            let Some((key, _)) = arg.split_once('=') else {
                return Err(PluginError::NotSettable {
                    key: arg.clone(),
                    reason: "expected KEY=VALUE".into(),
                });
            };
            let declared = self.config.env.iter().find(|e| e.name == key);
            match declared {
                None => {
                    return Err(PluginError::NotSettable {
                        key: key.to_string(),
                        reason: "not declared by the plugin".into(),
                    });
                },
                Some(e) if !e.value_settable() => {
                    return Err(PluginError::NotSettable {
                        key: key.to_string(),
                        reason: "declared read-only".into(),
                    });
                },
                Some(_) => {},
            }
            let prefix = format!("{key}=");
            env.retain(|existing| !existing.starts_with(&prefix));
            env.push(arg.clone());
        }
        self.settings.env = env;
        Ok(())
    }
}
