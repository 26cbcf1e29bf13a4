//! Configuration types deserialized from `tpo.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder replaced with the project directory in toolchain arguments.
pub const PROJECT_PLACEHOLDER: &str = "{project}";

/// Placeholder replaced with the platform name in toolchain arguments.
pub const PLATFORM_PLACEHOLDER: &str = "{platform}";

/// The top-level configuration parsed from `tpo.toml`.
///
/// Every section is optional; a missing file is equivalent to
/// [`OrchestratorConfig::default`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrchestratorConfig {
    /// How to invoke the external build toolchain.
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    /// Build cache location and budgets.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Subprocess limits.
    #[serde(default)]
    pub exec: ExecConfig,
    /// Batch concurrency.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Where per-platform project skeletons are staged.
    #[serde(default)]
    pub work: WorkConfig,
    /// User-defined platforms, overriding built-in presets of the same name.
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformEntry>,
}

impl OrchestratorConfig {
    /// Makes relative cache and work directories absolute against `base`.
    pub fn rebase(&mut self, base: &Path) {
        if self.cache.dir.is_relative() {
            self.cache.dir = base.join(&self.cache.dir);
        }
        if self.work.dir.is_relative() {
            self.work.dir = base.join(&self.work.dir);
        }
    }
}

/// External toolchain invocation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Executable name or path.
    pub program: String,
    /// Build arguments; `{project}` and `{platform}` are substituted.
    pub args: Vec<String>,
    /// Arguments for the environment probe that reports the toolchain version.
    pub version_args: Vec<String>,
    /// Arguments for a clean run, used when a rebuild is forced.
    pub clean_args: Vec<String>,
    /// File name the platform configuration is written to inside a project.
    pub config_file: String,
    /// Directory, relative to the project, where the toolchain leaves artifacts.
    pub artifact_dir: String,
    /// Environment variable pointing the toolchain at a per-project home.
    pub home_env: Option<String>,
    /// Extra environment variables for every toolchain invocation.
    pub env: BTreeMap<String, String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: "platformio".to_string(),
            args: vec![
                "run".to_string(),
                "-d".to_string(),
                PROJECT_PLACEHOLDER.to_string(),
                "--disable-auto-clean".to_string(),
            ],
            version_args: vec!["--version".to_string()],
            clean_args: vec![
                "run".to_string(),
                "-d".to_string(),
                PROJECT_PLACEHOLDER.to_string(),
                "--target".to_string(),
                "clean".to_string(),
            ],
            config_file: "platformio.ini".to_string(),
            artifact_dir: ".pio/build".to_string(),
            home_env: Some("PLATFORMIO_CORE_DIR".to_string()),
            env: BTreeMap::new(),
        }
    }
}

/// Substitutes the project and platform placeholders in an argument list.
pub fn expand_args(args: &[String], project: &Path, platform: &str) -> Vec<String> {
    let project = project.display().to_string();
    args.iter()
        .map(|a| {
            a.replace(PROJECT_PLACEHOLDER, &project)
                .replace(PLATFORM_PLACEHOLDER, platform)
        })
        .collect()
}

/// Build cache location and eviction budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root holding the index, lock file, and artifact store.
    pub dir: PathBuf,
    /// Total artifact byte budget.
    pub max_bytes: u64,
    /// Maximum number of cached builds.
    pub max_entries: usize,
    /// Bounded wait for one lock acquisition attempt, in milliseconds.
    pub lock_wait_ms: u64,
}

impl CacheConfig {
    /// The per-attempt lock wait as a [`Duration`].
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".tpo/cache"),
            max_bytes: 2 * 1024 * 1024 * 1024,
            max_entries: 64,
            lock_wait_ms: 2_000,
        }
    }
}

/// Subprocess limits applied to every toolchain invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Per-compile wall-clock timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum captured bytes per output stream.
    pub max_output_bytes: usize,
}

impl ExecConfig {
    /// The per-compile timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            max_output_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Batch worker pool sizing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker count; `0` means the host's available parallelism.
    pub workers: usize,
}

impl BatchConfig {
    /// Resolves `0` to the host's available parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Staging area for generated projects.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkConfig {
    /// Root directory; each platform gets a subdirectory.
    pub dir: PathBuf,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".tpo/work"),
        }
    }
}

/// A user-defined platform in `[platforms.<name>]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformEntry {
    /// Inline toolchain configuration text.
    pub config: Option<String>,
    /// Path to a file holding the toolchain configuration, relative to `tpo.toml`.
    pub config_file: Option<String>,
    /// Explicit host-native designation; inferred from the name when absent.
    pub native: Option<bool>,
}
