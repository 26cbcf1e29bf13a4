//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::{OrchestratorConfig, PROJECT_PLACEHOLDER};
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "tpo.toml";

/// Loads and validates `<dir>/tpo.toml`.
///
/// Relative cache/work directories and platform `config_file` paths are
/// resolved against `dir`.
pub fn load_config(dir: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = std::fs::read_to_string(dir.join(CONFIG_FILE))?;
    let mut config = load_config_from_str(&content)?;
    inline_platform_files(&mut config, dir)?;
    config.rebase(dir);
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_or_default(dir: &Path) -> Result<OrchestratorConfig, ConfigError> {
    if dir.join(CONFIG_FILE).is_file() {
        load_config(dir)
    } else {
        let mut config = OrchestratorConfig::default();
        config.rebase(dir);
        Ok(config)
    }
}

/// Parses and validates a `tpo.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies. Directories are left
/// as written.
pub fn load_config_from_str(content: &str) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Reads `[platforms.<name>] config_file` references into inline config text.
fn inline_platform_files(config: &mut OrchestratorConfig, dir: &Path) -> Result<(), ConfigError> {
    for (name, entry) in config.platforms.iter_mut() {
        if entry.config.is_some() {
            continue;
        }
        if let Some(file) = &entry.config_file {
            let text = std::fs::read_to_string(dir.join(file)).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "platform '{name}': cannot read config_file '{file}': {e}"
                ))
            })?;
            entry.config = Some(text);
        }
    }
    Ok(())
}

/// Validates that configuration values are usable.
fn validate_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    if config.toolchain.program.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "toolchain.program must not be empty".to_string(),
        ));
    }
    if !config
        .toolchain
        .args
        .iter()
        .any(|a| a.contains(PROJECT_PLACEHOLDER))
    {
        return Err(ConfigError::ValidationError(format!(
            "toolchain.args must reference {PROJECT_PLACEHOLDER}"
        )));
    }
    if config.toolchain.config_file.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "toolchain.config_file must not be empty".to_string(),
        ));
    }
    if config.cache.max_entries == 0 {
        return Err(ConfigError::ValidationError(
            "cache.max_entries must be at least 1".to_string(),
        ));
    }
    if config.exec.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "exec.timeout_secs must be at least 1".to_string(),
        ));
    }
    for (name, entry) in &config.platforms {
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidPlatform(name.clone()));
        }
        if entry.config.is_none() && entry.config_file.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "platform '{name}' needs either config or config_file"
            )));
        }
    }
    Ok(())
}
