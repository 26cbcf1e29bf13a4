//! Shared setup: locating `tpo.toml` and building compiler instances.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tpo_common::PlatformDescriptor;
use tpo_compiler::{CompilerInstance, CompilerOptions};
use tpo_config::{load_or_default, resolve_platform, OrchestratorConfig, CONFIG_FILE};
use tracing::debug;

use crate::GlobalArgs;

/// Platform used when none is given on the command line.
pub const DEFAULT_PLATFORM: &str = "native";

/// Resolves the directory holding the configuration.
///
/// `--config` may name the file itself or its directory; without it the
/// current directory is used.
pub fn config_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match &global.config {
        Some(path) => {
            let p = PathBuf::from(path);
            if p.is_file() {
                if p.file_name().is_some_and(|n| n != CONFIG_FILE) {
                    return Err(format!("config file must be named {CONFIG_FILE}: {}", p.display()).into());
                }
                Ok(p.parent()
                    .filter(|d| !d.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")))
            } else {
                Ok(p)
            }
        }
        None => Ok(std::env::current_dir()?),
    }
}

/// Loads the configuration, falling back to defaults when no file exists.
pub fn load(global: &GlobalArgs) -> Result<OrchestratorConfig, Box<dyn std::error::Error>> {
    let root = config_root(global)?;
    let config = load_or_default(&root)?;
    debug!(root = %root.display(), "configuration loaded");
    Ok(config)
}

/// Resolves platform names, defaulting to [`DEFAULT_PLATFORM`]. A platform
/// named more than once is kept at its first position only.
pub fn platforms(
    config: &OrchestratorConfig,
    names: &[String],
) -> Result<Vec<PlatformDescriptor>, Box<dyn std::error::Error>> {
    if names.is_empty() {
        return Ok(vec![resolve_platform(config, DEFAULT_PLATFORM)?]);
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let platform = resolve_platform(config, name)?;
        if seen.insert(platform.name().to_string()) {
            out.push(platform);
        } else {
            debug!(platform = %name, "duplicate platform ignored");
        }
    }
    Ok(out)
}

/// Creates and initializes one instance per platform.
///
/// An instance that fails to initialize is kept; its compiles report
/// the failure as results.
pub fn instances(
    platforms: Vec<PlatformDescriptor>,
    options: &CompilerOptions,
    global: &GlobalArgs,
) -> Vec<CompilerInstance> {
    platforms
        .into_iter()
        .map(|platform| {
            let instance = CompilerInstance::new(platform, options.clone());
            if let Err(e) = instance.initialize() {
                if !global.quiet {
                    eprintln!("warning: {e}");
                }
            }
            instance
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(config: Option<String>) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            config,
        }
    }

    #[test]
    fn config_file_resolves_to_parent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE);
        std::fs::write(&file, "").unwrap();
        let root = config_root(&global(Some(file.display().to_string()))).unwrap();
        assert_eq!(root, dir.path());
    }

    #[test]
    fn config_dir_is_used_directly() {
        let dir = tempfile::tempdir().unwrap();
        let root = config_root(&global(Some(dir.path().display().to_string()))).unwrap();
        assert_eq!(root, dir.path());
    }

    #[test]
    fn misnamed_config_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("other.toml");
        std::fs::write(&file, "").unwrap();
        assert!(config_root(&global(Some(file.display().to_string()))).is_err());
    }

    #[test]
    fn default_platform_is_native() {
        let config = OrchestratorConfig::default();
        let resolved = platforms(&config, &[]).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name(), DEFAULT_PLATFORM);
        assert!(resolved[0].is_host_native());
    }

    #[test]
    fn platforms_keep_order() {
        let config = OrchestratorConfig::default();
        let names = vec!["uno".to_string(), "native".to_string()];
        let resolved = platforms(&config, &names).unwrap();
        let got: Vec<_> = resolved.iter().map(|p| p.name()).collect();
        assert_eq!(got, vec!["uno", "native"]);
    }

    #[test]
    fn repeated_platform_resolved_once() {
        let config = OrchestratorConfig::default();
        let names: Vec<String> = ["native", "uno", "native"].iter().map(|s| s.to_string()).collect();
        let resolved = platforms(&config, &names).unwrap();
        let got: Vec<_> = resolved.iter().map(|p| p.name()).collect();
        assert_eq!(got, vec!["native", "uno"]);
    }

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&global(Some(dir.path().display().to_string()))).unwrap();
        assert!(config.platforms.is_empty());
        assert!(config.cache.dir.starts_with(dir.path()));
    }
}
