//! Error types for subprocess execution.

use std::time::Duration;

use crate::executor::ProcessOutput;

/// Ways a subprocess run can fail to produce a normal exit.
///
/// A non-zero exit code is not represented here; it is reported through
/// [`ProcessOutput::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The program could not be launched at all.
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Waiting on the child failed.
    #[error("failed to wait for '{program}': {source}")]
    Wait {
        /// The program being waited on.
        program: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The child exceeded its time limit and was killed with its process group.
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout {
        /// The program that timed out.
        program: String,
        /// The limit that was exceeded.
        timeout: Duration,
        /// Output captured before the kill.
        partial: Box<ProcessOutput>,
    },

    /// The run was cancelled and the child was killed with its process group.
    #[error("'{program}' was cancelled")]
    Cancelled {
        /// The program that was cancelled.
        program: String,
        /// Output captured before the kill, if the child had started.
        partial: Option<Box<ProcessOutput>>,
    },
}

impl ExecError {
    /// Output captured before the failure, when any exists.
    pub fn partial_output(&self) -> Option<&ProcessOutput> {
        match self {
            ExecError::Timeout { partial, .. } => Some(partial),
            ExecError::Cancelled { partial, .. } => partial.as_deref(),
            ExecError::Spawn { .. } | ExecError::Wait { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_display() {
        let err = ExecError::Spawn {
            program: "nope".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed to launch 'nope'"));
        assert!(err.partial_output().is_none());
    }

    #[test]
    fn timeout_display_and_partial() {
        let err = ExecError::Timeout {
            program: "sleep".to_string(),
            timeout: Duration::from_secs(2),
            partial: Box::new(ProcessOutput {
                stdout: "started".to_string(),
                ..ProcessOutput::default()
            }),
        };
        assert!(err.to_string().contains("timed out after 2s"));
        assert_eq!(err.partial_output().unwrap().stdout, "started");
    }

    #[test]
    fn cancelled_without_child() {
        let err = ExecError::Cancelled {
            program: "pio".to_string(),
            partial: None,
        };
        assert!(err.to_string().contains("cancelled"));
        assert!(err.partial_output().is_none());
    }
}
