//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_plugins(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_plugins(config: &Config) -> ConfigResult<()> {
    let p = &config.plugins;

    for (field, path) in [("plugins.root", &p.root), ("plugins.exec_root", &p.exec_root)] {
        if !path.is_absolute() {
            return Err(ConfigError::ValidationError {
                field: field.to_owned(),
                message: format!("path '{}' must be absolute", path.display()),
            });
        }
    }

    if p.root == p.exec_root {
        return Err(ConfigError::ValidationError {
            field: "plugins.exec_root".to_owned(),
            message: "exec_root must differ from root".to_owned(),
        });
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.level".to_owned(),
            message: format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        });
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::ValidationError {
            field: "logging.format".to_owned(),
            message: format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_relative_root_rejected() {
        let mut config = Config::default();
        config.plugins.root = PathBuf::from("plugins");
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("plugins.root"));
    }

    #[test]
    fn test_shared_roots_rejected() {
        let mut config = Config::default();
        config.plugins.exec_root = config.plugins.root.clone();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::ValidationError { field, .. }) if field == "plugins.exec_root"
        ));
    }

    #[test]
    fn test_unknown_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_owned();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_format_rejected() {
        let mut config = Config::default();
        config.logging.format = "xml".to_owned();
        assert!(validate(&config).is_err());
    }
}
