//! The on-disk cache index.
//!
//! Stored as `index.json` in the cache directory and only ever mutated while
//! holding the [`CacheLock`](crate::lock::CacheLock). Saves go through a
//! temporary file and a rename so concurrent readers see either the old or
//! the new index, never a partial one.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::fingerprint::BuildFingerprint;

/// Name of the index file within the cache directory.
pub const INDEX_FILE: &str = "index.json";

/// Current index schema version. An index with any other version is
/// discarded and rebuilt from scratch.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// One cached build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The build's fingerprint.
    pub fingerprint: BuildFingerprint,
    /// Platform the build targeted, for listings.
    pub platform: String,
    /// Bytes occupied by the entry directory.
    pub size_bytes: u64,
    /// Wall-clock insertion time, milliseconds since the epoch.
    pub created_ms: u64,
    /// Wall-clock time of the last hit or insert.
    pub last_access_ms: u64,
    /// Logical access counter; strictly increasing across all accesses and
    /// used to order eviction, so clock skew never reorders entries.
    pub last_access_seq: u64,
}

/// The full index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Schema version.
    pub format_version: u32,
    /// Last issued access sequence number.
    pub access_seq: u64,
    /// Entries keyed by fingerprint hex.
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            format_version: INDEX_FORMAT_VERSION,
            access_seq: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl CacheIndex {
    /// Path of the index within `cache_dir`.
    pub fn path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(INDEX_FILE)
    }

    /// Loads the index from `cache_dir`.
    ///
    /// A missing file yields an empty index. An unreadable or unparsable file,
    /// or one written with another schema version, is reported as
    /// [`CacheError::IndexParse`] so the caller can log it and start empty.
    pub fn load(cache_dir: &Path) -> Result<Self, CacheError> {
        let path = Self::path(cache_dir);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(CacheError::IndexParse {
                    reason: format!("{}: {e}", path.display()),
                })
            }
        };
        let index: CacheIndex = serde_json::from_str(&content).map_err(|e| CacheError::IndexParse {
            reason: e.to_string(),
        })?;
        if index.format_version != INDEX_FORMAT_VERSION {
            return Err(CacheError::IndexParse {
                reason: format!(
                    "unsupported index version {} (expected {INDEX_FORMAT_VERSION})",
                    index.format_version
                ),
            });
        }
        Ok(index)
    }

    /// Atomically replaces the index in `cache_dir`.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        let path = Self::path(cache_dir);
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let tmp = cache_dir.join(format!("{INDEX_FILE}.tmp.{}", std::process::id()));
        fs::write(&tmp, json).map_err(|e| CacheError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            CacheError::io(&path, e)
        })
    }

    /// Looks up an entry without touching it.
    pub fn get(&self, fingerprint: &BuildFingerprint) -> Option<&CacheEntry> {
        self.entries.get(&fingerprint.to_string())
    }

    /// Whether `fingerprint` has an entry.
    pub fn contains(&self, fingerprint: &BuildFingerprint) -> bool {
        self.entries.contains_key(&fingerprint.to_string())
    }

    /// Issues the next access sequence number.
    pub fn next_seq(&mut self) -> u64 {
        self.access_seq += 1;
        self.access_seq
    }

    /// Marks an entry as just used. Returns `false` if it does not exist.
    pub fn touch(&mut self, fingerprint: &BuildFingerprint, now_ms: u64) -> bool {
        let seq = self.next_seq();
        match self.entries.get_mut(&fingerprint.to_string()) {
            Some(entry) => {
                entry.last_access_seq = seq;
                entry.last_access_ms = now_ms;
                true
            }
            None => false,
        }
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.fingerprint.to_string(), entry);
    }

    /// Removes an entry, returning it.
    pub fn remove(&mut self, fingerprint: &BuildFingerprint) -> Option<CacheEntry> {
        self.entries.remove(&fingerprint.to_string())
    }

    /// Sum of all entry sizes.
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// The least recently used entry, if any.
    pub fn least_recent(&self) -> Option<&CacheEntry> {
        self.entries.values().min_by_key(|e| e.last_access_seq)
    }

    /// Entries ordered most recently used first.
    pub fn by_recency(&self) -> Vec<&CacheEntry> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| b.last_access_seq.cmp(&a.last_access_seq));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpo_common::ContentHash;

    fn fp(tag: &str) -> BuildFingerprint {
        BuildFingerprint::from_hash(ContentHash::from_bytes(tag.as_bytes()))
    }

    fn entry(index: &mut CacheIndex, tag: &str, size: u64) -> CacheEntry {
        let seq = index.next_seq();
        CacheEntry {
            fingerprint: fp(tag),
            platform: "native".to_string(),
            size_bytes: size,
            created_ms: 1,
            last_access_ms: 1,
            last_access_seq: seq,
        }
    }

    #[test]
    fn missing_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = CacheIndex::load(dir.path()).unwrap();
        assert!(index.entries.is_empty());
        assert_eq!(index.format_version, INDEX_FORMAT_VERSION);
    }

    #[test]
    fn save_and_load_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::default();
        let e = entry(&mut index, "a", 10);
        index.insert(e.clone());
        index.save(dir.path()).unwrap();

        let loaded = CacheIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.get(&fp("a")), Some(&e));
        assert_eq!(loaded.access_seq, 1);
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(CacheIndex::path(dir.path()), "{ not json").unwrap();
        assert!(matches!(
            CacheIndex::load(dir.path()),
            Err(CacheError::IndexParse { .. })
        ));
    }

    #[test]
    fn other_version_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CacheIndex::default();
        index.format_version = 99;
        index.save(dir.path()).unwrap();
        assert!(CacheIndex::load(dir.path()).is_err());
    }

    #[test]
    fn touch_reorders_recency() {
        let mut index = CacheIndex::default();
        let a = entry(&mut index, "a", 1);
        let b = entry(&mut index, "b", 2);
        index.insert(a);
        index.insert(b);
        assert_eq!(index.least_recent().unwrap().fingerprint, fp("a"));

        assert!(index.touch(&fp("a"), 5));
        assert_eq!(index.least_recent().unwrap().fingerprint, fp("b"));
        assert_eq!(index.by_recency()[0].fingerprint, fp("a"));
        assert_eq!(index.total_bytes(), 3);
        assert!(!index.touch(&fp("zzz"), 5));
    }

    #[test]
    fn remove_entry() {
        let mut index = CacheIndex::default();
        let a = entry(&mut index, "a", 1);
        index.insert(a);
        assert!(index.contains(&fp("a")));
        assert!(index.remove(&fp("a")).is_some());
        assert!(!index.contains(&fp("a")));
    }
}
