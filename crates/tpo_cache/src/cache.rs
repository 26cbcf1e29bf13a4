//! The build cache proper: lookup, insert, eviction and maintenance.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tpo_common::fsutil::{copy_tree, now_millis, remove_path, tree_size};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::fingerprint::BuildFingerprint;
use crate::index::{CacheEntry, CacheIndex};
use crate::lock::CacheLock;
use crate::record::{BuildRecord, RECORD_FILE};

/// Directory holding one subdirectory per cached fingerprint.
const ENTRIES_DIR: &str = "artifacts";
/// Staging area for entries being prepared outside the lock.
const TEMP_DIR: &str = "tmp";
/// Subdirectory of an entry that holds the copied build outputs.
const OUTPUTS_DIR: &str = "outputs";
/// Temp directories older than this are considered abandoned by `gc`.
const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Location and budgets of a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Cache root directory.
    pub dir: PathBuf,
    /// Byte budget across all entries.
    pub max_bytes: u64,
    /// Entry-count budget.
    pub max_entries: usize,
    /// How long one lock attempt slice lasts before logging contention.
    pub lock_wait: Duration,
}

impl CacheSettings {
    /// Settings for `dir` with default budgets (2 GiB, 64 entries).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: 2 * 1024 * 1024 * 1024,
            max_entries: 64,
            lock_wait: Duration::from_secs(2),
        }
    }
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBuild {
    /// The fingerprint that hit.
    pub fingerprint: BuildFingerprint,
    /// The entry directory.
    pub location: PathBuf,
    /// Copied build outputs, when the build produced any.
    pub outputs: Option<PathBuf>,
    /// The captured build record.
    pub record: BuildRecord,
}

/// Result of an [`BuildCache::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry was added after evicting `evicted` older entries.
    Inserted {
        /// Number of entries evicted to make room.
        evicted: usize,
    },
    /// An entry for this fingerprint already existed; nothing changed.
    AlreadyPresent,
    /// The entry alone exceeds the byte budget and was not cached.
    TooLarge,
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries.
    pub entries: usize,
    /// Bytes used by all entries.
    pub total_bytes: u64,
    /// Configured byte budget.
    pub max_bytes: u64,
    /// Configured entry budget.
    pub max_entries: usize,
}

/// What [`BuildCache::gc`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Entry directories with no index entry.
    pub orphans_removed: usize,
    /// Index entries whose directory had vanished.
    pub dangling_removed: usize,
    /// Abandoned staging directories.
    pub temp_removed: usize,
}

/// Disk-backed LRU cache of build results, shareable between processes.
///
/// Every operation takes the cross-process [`CacheLock`] for its duration and
/// re-reads the index from disk, so the index file is the only source of
/// truth and no in-memory copy can go stale.
#[derive(Debug, Clone)]
pub struct BuildCache {
    settings: CacheSettings,
}

impl BuildCache {
    /// Opens (creating if needed) the cache described by `settings`.
    pub fn open(settings: CacheSettings) -> Result<Self, CacheError> {
        for dir in [
            settings.dir.clone(),
            settings.dir.join(ENTRIES_DIR),
            settings.dir.join(TEMP_DIR),
        ] {
            fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        }
        Ok(Self { settings })
    }

    /// The cache root directory.
    pub fn dir(&self) -> &Path {
        &self.settings.dir
    }

    /// The settings this cache was opened with.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Looks up `fingerprint`, marking it most recently used on a hit.
    ///
    /// Never fails: lock, index or record problems are logged and reported
    /// as a miss. An entry whose record cannot be read is dropped.
    pub fn lookup(&self, fingerprint: &BuildFingerprint) -> Option<CachedBuild> {
        let _lock = match self.lock() {
            Ok(lock) => lock,
            Err(e) => {
                warn!(error = %e, "cache lock unavailable, treating as miss");
                return None;
            }
        };
        let mut index = self.load_index();
        index.get(fingerprint)?;

        let location = self.entry_dir(fingerprint);
        let record = match BuildRecord::read(&location.join(RECORD_FILE)) {
            Ok(record) => record,
            Err(e) => {
                warn!(fingerprint = %fingerprint.short(), error = %e, "dropping unreadable cache entry");
                index.remove(fingerprint);
                if let Err(e) = remove_path(&location) {
                    debug!(path = %location.display(), error = %e, "failed to remove entry directory");
                }
                self.save_logged(&index);
                return None;
            }
        };

        index.touch(fingerprint, now_millis());
        self.save_logged(&index);

        let outputs = Some(location.join(OUTPUTS_DIR))
            .filter(|p| record.has_artifacts && p.is_dir());
        debug!(fingerprint = %fingerprint.short(), "cache hit");
        Some(CachedBuild {
            fingerprint: *fingerprint,
            location,
            outputs,
            record,
        })
    }

    /// Records the build described by `record`, copying `outputs` if given.
    ///
    /// The entry is staged outside the lock and then handed to
    /// [`insert`](Self::insert).
    pub fn store(
        &self,
        fingerprint: &BuildFingerprint,
        record: &BuildRecord,
        outputs: Option<&Path>,
    ) -> Result<InsertOutcome, CacheError> {
        let staging = self.staging_dir(fingerprint);
        let prepared = self.prepare(&staging, record, outputs);
        let size = match prepared {
            Ok(size) => size,
            Err(e) => {
                let _ = remove_path(&staging);
                return Err(e);
            }
        };
        self.insert(fingerprint, &staging, size).inspect_err(|_| {
            let _ = remove_path(&staging);
        })
    }

    fn prepare(
        &self,
        staging: &Path,
        record: &BuildRecord,
        outputs: Option<&Path>,
    ) -> Result<u64, CacheError> {
        fs::create_dir_all(staging).map_err(|e| CacheError::io(staging, e))?;
        let mut record = record.clone();
        record.has_artifacts = false;
        if let Some(src) = outputs.filter(|p| p.exists()) {
            let dst = staging.join(OUTPUTS_DIR);
            copy_tree(src, &dst).map_err(|e| CacheError::io(src, e))?;
            record.has_artifacts = true;
        }
        record.write(&staging.join(RECORD_FILE))?;
        tree_size(staging).map_err(|e| CacheError::io(staging, e))
    }

    /// Takes ownership of the prepared entry directory at `location` and
    /// files it under `fingerprint`.
    ///
    /// Idempotent: if the fingerprint is already cached the new copy is
    /// discarded. Evicts least recently used entries until both budgets hold,
    /// never the entry being inserted. An entry larger than the whole byte
    /// budget is discarded without evicting anything.
    pub fn insert(
        &self,
        fingerprint: &BuildFingerprint,
        location: &Path,
        size_bytes: u64,
    ) -> Result<InsertOutcome, CacheError> {
        let _lock = self.lock()?;
        let mut index = self.load_index();
        let target = self.entry_dir(fingerprint);

        if index.contains(fingerprint) {
            if target.is_dir() {
                debug!(fingerprint = %fingerprint.short(), "already cached, discarding duplicate");
                remove_path(location).map_err(|e| CacheError::io(location, e))?;
                return Ok(InsertOutcome::AlreadyPresent);
            }
            index.remove(fingerprint);
        }

        if size_bytes > self.settings.max_bytes {
            warn!(
                fingerprint = %fingerprint.short(),
                size_bytes,
                max_bytes = self.settings.max_bytes,
                "build larger than cache budget, not cached"
            );
            remove_path(location).map_err(|e| CacheError::io(location, e))?;
            return Ok(InsertOutcome::TooLarge);
        }

        let mut evicted = 0;
        while index.entries.len() + 1 > self.settings.max_entries.max(1)
            || index.total_bytes() + size_bytes > self.settings.max_bytes
        {
            let Some(victim) = index.least_recent().map(|e| e.fingerprint) else {
                break;
            };
            index.remove(&victim);
            let dir = self.entry_dir(&victim);
            remove_path(&dir).map_err(|e| CacheError::io(&dir, e))?;
            debug!(fingerprint = %victim.short(), "evicted");
            evicted += 1;
        }

        remove_path(&target).map_err(|e| CacheError::io(&target, e))?;
        move_dir(location, &target)?;

        let platform = BuildRecord::read(&target.join(RECORD_FILE))
            .map(|r| r.platform)
            .unwrap_or_default();
        let now = now_millis();
        let seq = index.next_seq();
        index.insert(CacheEntry {
            fingerprint: *fingerprint,
            platform,
            size_bytes,
            created_ms: now,
            last_access_ms: now,
            last_access_seq: seq,
        });
        index.save(&self.settings.dir)?;

        info!(fingerprint = %fingerprint.short(), size_bytes, evicted, "cached build");
        Ok(InsertOutcome::Inserted { evicted })
    }

    /// Removes `fingerprint` from the cache. Returns whether it was present.
    pub fn invalidate(&self, fingerprint: &BuildFingerprint) -> Result<bool, CacheError> {
        let _lock = self.lock()?;
        let mut index = self.load_index();
        let existed = index.remove(fingerprint).is_some();
        let dir = self.entry_dir(fingerprint);
        remove_path(&dir).map_err(|e| CacheError::io(&dir, e))?;
        if existed {
            index.save(&self.settings.dir)?;
            debug!(fingerprint = %fingerprint.short(), "invalidated");
        }
        Ok(existed)
    }

    /// Current occupancy.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let _lock = self.lock()?;
        let index = self.load_index();
        Ok(CacheStats {
            entries: index.entries.len(),
            total_bytes: index.total_bytes(),
            max_bytes: self.settings.max_bytes,
            max_entries: self.settings.max_entries,
        })
    }

    /// All entries, most recently used first.
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let _lock = self.lock()?;
        let index = self.load_index();
        Ok(index.by_recency().into_iter().cloned().collect())
    }

    /// Reconciles the index with the directory contents.
    pub fn gc(&self) -> Result<GcReport, CacheError> {
        let _lock = self.lock()?;
        let mut index = self.load_index();
        let mut report = GcReport::default();

        let dangling: Vec<BuildFingerprint> = index
            .entries
            .values()
            .map(|e| e.fingerprint)
            .filter(|fp| !self.entry_dir(fp).is_dir())
            .collect();
        for fp in &dangling {
            index.remove(fp);
        }
        report.dangling_removed = dangling.len();

        let entries_dir = self.settings.dir.join(ENTRIES_DIR);
        for entry in read_dir_entries(&entries_dir)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let live = BuildFingerprint::from_hex(&name).is_some_and(|fp| index.contains(&fp));
            if !live {
                remove_path(&entry.path()).map_err(|e| CacheError::io(entry.path(), e))?;
                report.orphans_removed += 1;
            }
        }

        let temp_dir = self.settings.dir.join(TEMP_DIR);
        for entry in read_dir_entries(&temp_dir)? {
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .map_or(true, |age| age >= STALE_TEMP_AGE);
            if stale {
                remove_path(&entry.path()).map_err(|e| CacheError::io(entry.path(), e))?;
                report.temp_removed += 1;
            }
        }

        if report.dangling_removed > 0 {
            index.save(&self.settings.dir)?;
        }
        info!(?report, "cache gc finished");
        Ok(report)
    }

    /// Removes every entry. Returns the number of entries removed.
    pub fn purge(&self) -> Result<usize, CacheError> {
        let _lock = self.lock()?;
        let removed = self.load_index().entries.len();
        for name in [ENTRIES_DIR, TEMP_DIR] {
            let dir = self.settings.dir.join(name);
            remove_path(&dir).map_err(|e| CacheError::io(&dir, e))?;
            fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        }
        CacheIndex::default().save(&self.settings.dir)?;
        info!(removed, "cache purged");
        Ok(removed)
    }

    fn lock(&self) -> Result<CacheLock, CacheError> {
        CacheLock::acquire(&self.settings.dir, self.settings.lock_wait)
    }

    fn load_index(&self) -> CacheIndex {
        match CacheIndex::load(&self.settings.dir) {
            Ok(index) => index,
            Err(e) => {
                warn!(dir = %self.settings.dir.display(), error = %e, "cache index corrupt, treating cache as empty");
                CacheIndex::default()
            }
        }
    }

    fn save_logged(&self, index: &CacheIndex) {
        if let Err(e) = index.save(&self.settings.dir) {
            warn!(error = %e, "failed to update cache index");
        }
    }

    fn entry_dir(&self, fingerprint: &BuildFingerprint) -> PathBuf {
        self.settings.dir.join(ENTRIES_DIR).join(fingerprint.to_string())
    }

    fn staging_dir(&self, fingerprint: &BuildFingerprint) -> PathBuf {
        let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.settings.dir.join(TEMP_DIR).join(format!(
            "{}-{}-{n}",
            fingerprint.short(),
            std::process::id()
        ))
    }
}

fn read_dir_entries(dir: &Path) -> Result<Vec<fs::DirEntry>, CacheError> {
    match fs::read_dir(dir) {
        Ok(rd) => Ok(rd.filter_map(|e| e.ok()).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(CacheError::io(dir, e)),
    }
}

fn move_dir(from: &Path, to: &Path) -> Result<(), CacheError> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Cross-device: copy then delete.
    copy_tree(from, to).map_err(|e| CacheError::io(from, e))?;
    remove_path(from).map_err(|e| CacheError::io(from, e))
}
