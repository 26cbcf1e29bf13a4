//! Platform resolution: user entries, then presets, then a generic fallback.

use crate::error::ConfigError;
use crate::presets::{generic_config, preset};
use crate::types::OrchestratorConfig;
use tpo_common::PlatformDescriptor;

/// Resolves a platform name to a descriptor.
///
/// A `[platforms.<name>]` entry wins over a built-in preset of the same name.
/// Names with neither get a generic single-environment configuration.
pub fn resolve_platform(
    config: &OrchestratorConfig,
    name: &str,
) -> Result<PlatformDescriptor, ConfigError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::InvalidPlatform(name.to_string()));
    }

    if let Some(entry) = config.platforms.get(name) {
        let text = entry.config.clone().ok_or_else(|| {
            ConfigError::ValidationError(format!("platform '{name}' has no configuration"))
        })?;
        return Ok(match entry.native {
            Some(true) => PlatformDescriptor::host_native(name, text),
            Some(false) => PlatformDescriptor::hardware(name, text),
            None => PlatformDescriptor::new(name, text),
        });
    }

    Ok(preset(name).unwrap_or_else(|| PlatformDescriptor::new(name, generic_config(name))))
}
