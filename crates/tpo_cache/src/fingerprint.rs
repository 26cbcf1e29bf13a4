//! Build fingerprints: the cache key for one (platform, config, source, toolchain) tuple.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tpo_common::fsutil::{to_slash, walk_files};
use tpo_common::{ContentHash, ContentHasher};

use crate::error::CacheError;

/// Content-derived identity of a build.
///
/// Two builds with equal fingerprints are interchangeable: same platform name,
/// same configuration bytes, same source tree, same toolchain identity.
/// Absolute paths never participate, so moving an example directory does not
/// invalidate its cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildFingerprint(ContentHash);

/// Everything that determines a [`BuildFingerprint`].
#[derive(Debug, Clone, Copy)]
pub struct FingerprintInput<'a> {
    /// Platform name.
    pub platform: &'a str,
    /// Platform configuration text, hashed verbatim.
    pub config: &'a str,
    /// Example source: a directory or a single file.
    pub source: &'a Path,
    /// Toolchain identity (version string plus shim version where relevant).
    pub toolchain: &'a str,
}

impl BuildFingerprint {
    /// Computes the fingerprint for `input`, reading the source tree.
    pub fn compute(input: &FingerprintInput<'_>) -> Result<Self, CacheError> {
        let source = hash_source_tree(input.source)?;
        let mut hasher = ContentHasher::new();
        hasher
            .update(b"tpo-fingerprint-v1")
            .update(input.platform.as_bytes())
            .update(ContentHash::from_bytes(input.config.as_bytes()).as_bytes())
            .update(source.as_bytes())
            .update(input.toolchain.as_bytes());
        Ok(Self(hasher.finish()))
    }

    /// Wraps an existing hash.
    pub fn from_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Parses the 32-character hex form.
    pub fn from_hex(s: &str) -> Option<Self> {
        ContentHash::from_hex(s).map(Self)
    }

    /// The underlying content hash.
    pub fn hash(&self) -> ContentHash {
        self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl fmt::Display for BuildFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Hashes an example's source: every non-hidden file's relative path
/// (with `/` separators) and contents, in sorted order.
///
/// A single file hashes as its file name and contents.
pub fn hash_source_tree(source: &Path) -> Result<ContentHash, CacheError> {
    let mut hasher = ContentHasher::new();
    if source.is_file() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = fs::read(source).map_err(|e| CacheError::io(source, e))?;
        hasher.update(name.as_bytes()).update(&bytes);
        return Ok(hasher.finish());
    }

    let files = walk_files(source, true).map_err(|e| CacheError::io(source, e))?;
    for rel in files {
        let path = source.join(&rel);
        let bytes = fs::read(&path).map_err(|e| CacheError::io(&path, e))?;
        hasher.update(to_slash(&rel).as_bytes()).update(&bytes);
    }
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch_dir(body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Blink.ino"), body).unwrap();
        dir
    }

    fn fp(platform: &str, config: &str, source: &Path, toolchain: &str) -> BuildFingerprint {
        BuildFingerprint::compute(&FingerprintInput {
            platform,
            config,
            source,
            toolchain,
        })
        .unwrap()
    }

    #[test]
    fn stable_for_same_inputs() {
        let dir = sketch_dir("void setup(){}");
        let a = fp("native", "[env:native]", dir.path(), "6.1");
        let b = fp("native", "[env:native]", dir.path(), "6.1");
        assert_eq!(a, b);
    }

    #[test]
    fn independent_of_location() {
        let a = sketch_dir("void setup(){}");
        let b = sketch_dir("void setup(){}");
        assert_eq!(
            fp("native", "cfg", a.path(), "t"),
            fp("native", "cfg", b.path(), "t")
        );
    }

    #[test]
    fn every_component_matters() {
        let dir = sketch_dir("void setup(){}");
        let base = fp("native", "cfg", dir.path(), "t");
        assert_ne!(base, fp("uno", "cfg", dir.path(), "t"));
        assert_ne!(base, fp("native", "cfg2", dir.path(), "t"));
        assert_ne!(base, fp("native", "cfg", dir.path(), "t2"));
        fs::write(dir.path().join("Blink.ino"), "void setup(){ }").unwrap();
        assert_ne!(base, fp("native", "cfg", dir.path(), "t"));
    }

    #[test]
    fn renaming_a_file_changes_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.h"), "x").unwrap();
        let before = hash_source_tree(dir.path()).unwrap();
        fs::rename(dir.path().join("a.h"), dir.path().join("b.h")).unwrap();
        assert_ne!(before, hash_source_tree(dir.path()).unwrap());
    }

    #[test]
    fn hidden_build_output_ignored() {
        let dir = sketch_dir("void setup(){}");
        let before = hash_source_tree(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join(".pio/build")).unwrap();
        fs::write(dir.path().join(".pio/build/firmware.bin"), "bin").unwrap();
        assert_eq!(before, hash_source_tree(dir.path()).unwrap());
    }

    #[test]
    fn hex_roundtrip() {
        let dir = sketch_dir("x");
        let f = fp("native", "c", dir.path(), "t");
        assert_eq!(BuildFingerprint::from_hex(&f.to_string()), Some(f));
        assert_eq!(f.short().len(), 8);
    }

    #[test]
    fn missing_source_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(hash_source_tree(&dir.path().join("missing")).is_err());
    }
}
