//! Layered configuration loading.
//!
//! 1. Parse embedded `defaults.toml` into a base tree
//! 2. Deep-merge the operator's file, if one is given
//! 3. Apply `PLUGVISOR_*` environment overrides
//! 4. Deserialize the merged tree into [`Config`]
//! 5. Validate

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Environment variables and the dotted field each one overrides.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("PLUGVISOR_ROOT", "plugins.root"),
    ("PLUGVISOR_EXEC_ROOT", "plugins.exec_root"),
    ("PLUGVISOR_LIVE_RESTORE", "plugins.live_restore"),
    ("PLUGVISOR_LOG_LEVEL", "logging.level"),
];

/// Load configuration from defaults, an optional file, and the process
/// environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is unreadable or malformed, an
/// environment override has the wrong type, or validation fails.
pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
    let env_vars: HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| k.starts_with("PLUGVISOR_"))
        .collect();
    load_with_env(path, &env_vars)
}

/// [`load`] with an explicit environment instead of the process one.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    path: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    if let Some(path) = path {
        let overlay = read_file(path)?;
        deep_merge(&mut merged, &overlay);
        info!(path = %path.display(), "loaded config file");
    }

    let env_count = apply_env_overrides(&mut merged, env_vars)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment overrides");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;
    Ok(config)
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

/// Recursively deep-merge `overlay` into `base`.
///
/// Tables merge per key; scalars and arrays from the overlay replace the
/// base value.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;
    for (var_name, field_path) in ENV_OVERRIDES {
        let Some(raw) = env_vars.get(*var_name) else {
            continue;
        };
        debug!(var = var_name, field = field_path, "applying env var override");
        let value = coerce(var_name, field_path, raw)?;
        set_field(merged, field_path, value);
        count = count.saturating_add(1);
    }
    Ok(count)
}

fn coerce(var_name: &str, field_path: &str, raw: &str) -> ConfigResult<toml::Value> {
    if field_path == "plugins.live_restore" {
        return match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(ConfigError::EnvError {
                var_name: var_name.to_owned(),
                message: format!("expected a boolean, got '{raw}'"),
            }),
        };
    }
    Ok(toml::Value::String(raw.to_owned()))
}

/// Set a dotted field, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        if segments.peek().is_none() {
            table.insert(segment.to_owned(), value);
            return;
        }
        current = table
            .entry(segment.to_owned())
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_without_file() {
        let config = load_with_env(None, &no_env()).unwrap();
        assert_eq!(config.plugins.root, PathBuf::from("/var/lib/plugvisor/plugins"));
        assert_eq!(config.plugins.enable_retries, 3);
        assert!(!config.plugins.live_restore);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugvisor.toml");
        std::fs::write(
            &path,
            "[plugins]\nroot = \"/srv/plugins\"\nshutdown_timeout_secs = 30\n",
        )
        .unwrap();

        let config = load_with_env(Some(&path), &no_env()).unwrap();
        assert_eq!(config.plugins.root, PathBuf::from("/srv/plugins"));
        assert_eq!(config.plugins.shutdown_timeout_secs, 30);
        // Untouched keys keep their defaults.
        assert_eq!(config.plugins.exec_root, PathBuf::from("/run/plugvisor/plugins"));
        assert_eq!(config.plugins.retry_backoff_ms, 500);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugvisor.toml");
        std::fs::write(&path, "[plugins]\nroot = \"/srv/plugins\"\n").unwrap();

        let env: HashMap<String, String> = [
            ("PLUGVISOR_ROOT", "/data/plugins"),
            ("PLUGVISOR_LIVE_RESTORE", "true"),
            ("PLUGVISOR_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let config = load_with_env(Some(&path), &env).unwrap();
        assert_eq!(config.plugins.root, PathBuf::from("/data/plugins"));
        assert!(config.plugins.live_restore);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_bad_boolean_env_rejected() {
        let env: HashMap<String, String> =
            [("PLUGVISOR_LIVE_RESTORE".to_owned(), "maybe".to_owned())].into();
        let err = load_with_env(None, &env).unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { .. }));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_with_env(Some(&dir.path().join("absent.toml")), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugvisor.toml");
        std::fs::write(&path, "[plugins\nroot = 1").unwrap();
        assert!(matches!(
            load_with_env(Some(&path), &no_env()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_merged_config_is_validated() {
        let env: HashMap<String, String> =
            [("PLUGVISOR_EXEC_ROOT".to_owned(), "relative/run".to_owned())].into();
        assert!(matches!(
            load_with_env(None, &env),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_deep_merge_replaces_arrays() {
        let mut base: toml::Value = toml::from_str("[logging]\ndirectives = [\"a\"]\nlevel = \"info\"").unwrap();
        let overlay: toml::Value = toml::from_str("[logging]\ndirectives = [\"b\", \"c\"]").unwrap();
        deep_merge(&mut base, &overlay);
        let logging = base.get("logging").unwrap();
        assert_eq!(logging.get("directives").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(logging.get("level").unwrap().as_str(), Some("info"));
    }
}
