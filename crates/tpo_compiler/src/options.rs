//! Runtime options shared by the instances of one run.

use std::path::PathBuf;
use std::time::Duration;

use tpo_cache::CacheSettings;
use tpo_config::{OrchestratorConfig, ToolchainConfig};
use tpo_exec::DEFAULT_MAX_OUTPUT_BYTES;

/// Everything a [`CompilerInstance`](crate::CompilerInstance) needs besides
/// its platform.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Toolchain invocation settings.
    pub toolchain: ToolchainConfig,
    /// Build cache; `None` disables caching.
    pub cache: Option<CacheSettings>,
    /// Per-compile time limit.
    pub timeout: Duration,
    /// Per-stream output capture limit.
    pub max_output_bytes: usize,
    /// Batch worker count; `0` means the host's available parallelism.
    pub workers: usize,
    /// Root of the per-platform project skeletons.
    pub work_dir: PathBuf,
    /// Skip cache lookups and clean before building.
    pub force_rebuild: bool,
}

impl CompilerOptions {
    /// Derives options from a loaded configuration.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            toolchain: config.toolchain.clone(),
            cache: Some(CacheSettings {
                dir: config.cache.dir.clone(),
                max_bytes: config.cache.max_bytes,
                max_entries: config.cache.max_entries,
                lock_wait: config.cache.lock_wait(),
            }),
            timeout: config.exec.timeout(),
            max_output_bytes: config.exec.max_output_bytes,
            workers: config.batch.workers,
            work_dir: config.work.dir.clone(),
            force_rebuild: false,
        }
    }

    /// Options with default toolchain settings rooted at `work_dir`, caching
    /// under `work_dir/cache`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            toolchain: ToolchainConfig::default(),
            cache: Some(CacheSettings::new(work_dir.join("cache"))),
            timeout: Duration::from_secs(600),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            workers: 0,
            work_dir,
            force_rebuild: false,
        }
    }

    /// Resolves `workers == 0` to the host's available parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_copies_sections() {
        let mut config = tpo_config::load_config_from_str(
            r#"
            [cache]
            dir = "/c"
            max_entries = 3
            [exec]
            timeout_secs = 9
            [batch]
            workers = 2
            [work]
            dir = "/w"
            "#,
        )
        .unwrap();
        config.rebase(std::path::Path::new("/base"));
        let opts = CompilerOptions::from_config(&config);
        let cache = opts.cache.as_ref().unwrap();
        assert_eq!(cache.dir, PathBuf::from("/c"));
        assert_eq!(cache.max_entries, 3);
        assert_eq!(opts.timeout, Duration::from_secs(9));
        assert_eq!(opts.effective_workers(), 2);
        assert_eq!(opts.work_dir, PathBuf::from("/w"));
        assert!(!opts.force_rebuild);
    }

    #[test]
    fn zero_workers_uses_host_parallelism() {
        let opts = CompilerOptions::new("/tmp/w");
        assert!(opts.effective_workers() >= 1);
        assert_eq!(opts.cache.unwrap().dir, PathBuf::from("/tmp/w/cache"));
    }
}
