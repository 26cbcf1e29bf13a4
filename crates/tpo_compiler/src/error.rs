//! Errors surfaced outside the per-example result channel.
//!
//! Only instance setup and metadata queries return these; compile failures
//! are reported through [`CompileResult`](crate::CompileResult).

use std::path::PathBuf;

/// Errors raised by compiler instances.
#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    /// The instance has not completed `initialize`.
    #[error("compiler for '{platform}' is not initialized")]
    NotInitialized {
        /// Platform name.
        platform: String,
    },

    /// Setup failed; the instance is permanently unusable.
    #[error("initialization of '{platform}' failed: {reason}")]
    InitializationFailed {
        /// Platform name.
        platform: String,
        /// What went wrong.
        reason: String,
    },

    /// The toolchain version probe ran but reported failure.
    #[error("toolchain probe '{command}' exited with {status}: {stderr}")]
    ProbeFailed {
        /// The probe command line.
        command: String,
        /// Exit code or signal description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// A filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Subprocess execution failed.
    #[error(transparent)]
    Exec(#[from] tpo_exec::ExecError),

    /// Shim provisioning failed.
    #[error(transparent)]
    Shim(#[from] tpo_shim::ShimError),

    /// A cache operation failed.
    #[error(transparent)]
    Cache(#[from] tpo_cache::CacheError),
}

impl CompilerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompilerError::Io {
            path: path.into(),
            source,
        }
    }
}
