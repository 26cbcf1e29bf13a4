//! Error types for shim provisioning.

use std::path::PathBuf;

/// Errors raised while writing shim files or sketch wrappers.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    /// A filesystem operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being read or written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The sketch directory contained no `.ino` file to wrap.
    #[error("no sketch found in {path}")]
    NoSketch {
        /// The directory that was searched.
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_display_names_path() {
        let err = ShimError::Io {
            path: PathBuf::from("/p/lib/Arduino.h"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/p/lib/Arduino.h"));
    }
}
