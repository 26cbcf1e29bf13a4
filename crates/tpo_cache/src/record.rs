//! Binary build records stored next to cached artifacts.
//!
//! Each record file is a 4-byte little-endian header length, a bincode
//! header (magic, format version, writer version, payload checksum), and the
//! bincode-encoded [`BuildRecord`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tpo_common::ContentHash;

use crate::error::CacheError;

/// File name of the record within an entry directory.
pub const RECORD_FILE: &str = "record.bin";

const RECORD_MAGIC: [u8; 4] = *b"TPOC";

/// Current record format version. Increment on breaking changes to the
/// header or payload layout.
const RECORD_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordHeader {
    magic: [u8; 4],
    format_version: u32,
    writer_version: String,
    checksum: ContentHash,
}

/// Captured outcome of a successful build, replayed on cache hits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Platform name the build ran for.
    pub platform: String,
    /// Toolchain standard output.
    pub stdout: String,
    /// Toolchain standard error.
    pub stderr: String,
    /// Serialized build info of the instance that produced the build.
    pub build_info: String,
    /// Whether build outputs were copied alongside the record.
    pub has_artifacts: bool,
    /// Original build duration in milliseconds.
    pub duration_ms: u64,
}

impl BuildRecord {
    /// Writes the record to `path`.
    pub fn write(&self, path: &Path) -> Result<(), CacheError> {
        let config = bincode::config::standard();
        let payload = bincode::serde::encode_to_vec(self, config).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;
        let header = RecordHeader {
            magic: RECORD_MAGIC,
            format_version: RECORD_FORMAT_VERSION,
            writer_version: env!("CARGO_PKG_VERSION").to_string(),
            checksum: ContentHash::from_bytes(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, config).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;

        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);
        fs::write(path, output).map_err(|e| CacheError::io(path, e))
    }

    /// Reads and validates a record.
    pub fn read(path: &Path) -> Result<Self, CacheError> {
        let raw = fs::read(path).map_err(|e| CacheError::io(path, e))?;
        let invalid = |reason: &str| CacheError::InvalidHeader {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let len_bytes: [u8; 4] = raw
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| invalid("file too short"))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_end = 4usize
            .checked_add(header_len)
            .filter(|end| *end <= raw.len())
            .ok_or_else(|| invalid("truncated header"))?;

        let config = bincode::config::standard();
        let (header, _): (RecordHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..header_end], config)
                .map_err(|e| invalid(&e.to_string()))?;
        if header.magic != RECORD_MAGIC {
            return Err(invalid("bad magic bytes"));
        }
        if header.format_version != RECORD_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                path: path.to_path_buf(),
                expected: RECORD_FORMAT_VERSION,
                actual: header.format_version,
            });
        }

        let payload = &raw[header_end..];
        let actual = ContentHash::from_bytes(payload);
        if actual != header.checksum {
            return Err(CacheError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: header.checksum.to_string(),
                actual: actual.to_string(),
            });
        }

        let (record, _) = bincode::serde::decode_from_slice(payload, config).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BuildRecord {
        BuildRecord {
            platform: "native".to_string(),
            stdout: "Compiling .pio/build/native/src/main.o\nSUCCESS".to_string(),
            stderr: String::new(),
            build_info: "{\"platform\":\"native\"}".to_string(),
            has_artifacts: true,
            duration_ms: 1234,
        }
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RECORD_FILE);
        sample().write(&path).unwrap();
        assert_eq!(BuildRecord::read(&path).unwrap(), sample());
    }

    #[test]
    fn corrupted_payload_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RECORD_FILE);
        sample().write(&path).unwrap();
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(&path, raw).unwrap();
        assert!(matches!(
            BuildRecord::read(&path),
            Err(CacheError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn short_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RECORD_FILE);
        fs::write(&path, [1u8, 0]).unwrap();
        assert!(matches!(
            BuildRecord::read(&path),
            Err(CacheError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn oversized_header_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(RECORD_FILE);
        let mut raw = u32::MAX.to_le_bytes().to_vec();
        raw.extend_from_slice(b"junk");
        fs::write(&path, raw).unwrap();
        assert!(BuildRecord::read(&path).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BuildRecord::read(&dir.path().join("none.bin")),
            Err(CacheError::Io { .. })
        ));
    }
}
