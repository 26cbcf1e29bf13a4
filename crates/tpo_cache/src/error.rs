//! Build cache failures.

use std::path::PathBuf;

/// Why a build cache operation failed.
///
/// `lookup` swallows all of these and reports a miss. `store`, `insert` and
/// the maintenance operations return them; the compiler logs them and moves on.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem access under the cache directory failed.
    #[error("build cache I/O failed at {path}: {source}")]
    Io {
        /// File or directory being accessed.
        path: PathBuf,
        /// OS error.
        source: std::io::Error,
    },

    /// `index.json` is not a readable index of the current format.
    #[error("unreadable build cache index: {reason}")]
    IndexParse {
        /// What the parser rejected.
        reason: String,
    },

    /// A `record.bin` file is too short or lacks the record magic.
    #[error("bad build record header in {path}: {reason}")]
    InvalidHeader {
        /// Record file.
        path: PathBuf,
        /// What was wrong with the header.
        reason: String,
    },

    /// A build record's payload does not hash to the checksum in its header.
    #[error("build record {path} is damaged: header checksum {expected}, payload checksum {actual}")]
    ChecksumMismatch {
        /// Record file.
        path: PathBuf,
        /// Checksum stored in the header.
        expected: String,
        /// Checksum of the payload as read.
        actual: String,
    },

    /// A build record was written by an incompatible format version.
    #[error("build record {path} has format v{actual}, this build reads v{expected}")]
    VersionMismatch {
        /// Record file.
        path: PathBuf,
        /// Format version this build writes.
        expected: u32,
        /// Format version in the file.
        actual: u32,
    },

    /// Encoding or decoding a record or the index failed.
    #[error("cache encoding failed: {reason}")]
    Serialization {
        /// Encoder or decoder message.
        reason: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
