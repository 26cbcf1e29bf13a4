//! Compile outcomes as plain data.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tpo_common::TargetKind;

/// Classification of a failed compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// `compile` was called before a successful `initialize`.
    NotInitialized,
    /// The instance could not be set up; it is unusable.
    InitializationFailed,
    /// The toolchain ran and exited non-zero.
    BuildFailed,
    /// The toolchain exceeded its time limit and was killed.
    Timeout,
    /// The cache index was unreadable. Only ever logged; lookups recover by
    /// treating the cache as empty.
    CacheCorrupt,
    /// The toolchain could not be launched or died from a signal.
    ToolchainCrashed,
    /// The batch was cancelled before or while this compile ran.
    Cancelled,
    /// The example is not a sketch, sketch directory, or project.
    InvalidExample,
    /// Staging the project directory failed.
    ProjectSetup,
    /// The compile panicked; the batch contained the fault.
    Internal,
}

impl ErrorKind {
    /// The stable name used in logs and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotInitialized => "not_initialized",
            ErrorKind::InitializationFailed => "initialization_failed",
            ErrorKind::BuildFailed => "build_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CacheCorrupt => "cache_corrupt",
            ErrorKind::ToolchainCrashed => "toolchain_crashed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidExample => "invalid_example",
            ErrorKind::ProjectSetup => "project_setup",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error half of a failed [`CompileResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Toolchain and environment metadata for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    /// Platform name.
    pub platform: String,
    /// Hardware or host-native.
    pub target: TargetKind,
    /// Toolchain executable.
    pub toolchain: String,
    /// First line of the toolchain's version probe.
    pub toolchain_version: String,
    /// The platform's skeleton directory.
    pub work_dir: PathBuf,
    /// Whether the skeleton's toolchain config file exists.
    pub config_file_exists: bool,
    /// Shim version, for host-native platforms.
    pub shim_version: Option<String>,
    /// When the probe ran, milliseconds since the epoch.
    pub probed_at_ms: u64,
}

impl BuildInfo {
    /// Renders the record as pretty JSON text.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// The outcome of compiling one example for one platform.
///
/// Exactly one of "ok" and [`error`](Self::error) holds: the constructors and
/// [`fail`](Self::fail) keep them consistent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResult {
    ok: bool,
    /// Platform name.
    pub platform: String,
    /// The example as requested.
    pub example: PathBuf,
    /// Toolchain standard output.
    pub stdout: String,
    /// Toolchain standard error.
    pub stderr: String,
    /// Instance metadata, absent when the instance never initialized.
    pub build_info: Option<BuildInfo>,
    error: Option<CompileError>,
    /// Whether the result was replayed from the build cache.
    pub from_cache: bool,
    /// Build fingerprint, once computed.
    pub fingerprint: Option<String>,
    /// Directory holding build outputs, when any exist.
    pub artifacts: Option<PathBuf>,
    /// Wall-clock time spent on this request.
    pub duration: Duration,
}

impl CompileResult {
    /// A successful result with no output yet.
    pub fn success(platform: &str, example: &Path) -> Self {
        Self {
            ok: true,
            platform: platform.to_string(),
            example: example.to_path_buf(),
            stdout: String::new(),
            stderr: String::new(),
            build_info: None,
            error: None,
            from_cache: false,
            fingerprint: None,
            artifacts: None,
            duration: Duration::ZERO,
        }
    }

    /// A failed result.
    pub fn failure(platform: &str, example: &Path, kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut result = Self::success(platform, example);
        result.fail(kind, message);
        result
    }

    /// Marks the result failed.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.ok = false;
        self.error = Some(CompileError {
            kind,
            message: message.into(),
        });
    }

    /// Whether the compile succeeded.
    pub fn ok(&self) -> bool {
        self.ok
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&CompileError> {
        self.error.as_ref()
    }

    /// Shorthand for the failure kind.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// One-line summary for terminal output.
    pub fn summary(&self) -> String {
        let status = match &self.error {
            None if self.from_cache => "ok (cached)".to_string(),
            None => "ok".to_string(),
            Some(e) => format!("FAILED [{}] {}", e.kind, e.message),
        };
        format!(
            "{} {}: {} ({:.2}s)",
            self.platform,
            self.example.display(),
            status,
            self.duration.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_error() {
        let r = CompileResult::success("native", Path::new("Blink"));
        assert!(r.ok());
        assert!(r.error().is_none());
        assert!(r.summary().contains("native Blink: ok"));
    }

    #[test]
    fn fail_sets_both_fields() {
        let mut r = CompileResult::success("uno", Path::new("Blink"));
        r.fail(ErrorKind::BuildFailed, "exit code 1");
        assert!(!r.ok());
        assert_eq!(r.error_kind(), Some(ErrorKind::BuildFailed));
        assert!(r.summary().contains("FAILED [build_failed] exit code 1"));
    }

    #[test]
    fn json_uses_snake_case_kinds() {
        let r = CompileResult::failure("native", Path::new("x.ino"), ErrorKind::ToolchainCrashed, "signal 9");
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("\"toolchain_crashed\""));
        let back: CompileResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn build_info_json() {
        let info = BuildInfo {
            platform: "native".to_string(),
            target: TargetKind::HostNative,
            toolchain: "platformio".to_string(),
            toolchain_version: "PlatformIO Core, version 6.1.15".to_string(),
            work_dir: PathBuf::from("/w/native"),
            config_file_exists: true,
            shim_version: Some("1".to_string()),
            probed_at_ms: 0,
        };
        let json = info.to_json();
        assert!(json.contains("\"host_native\""));
        assert!(json.contains("6.1.15"));
    }
}
