//! Cross-process exclusive lock on the cache directory.
//!
//! On unix this is an advisory `flock(2)` on `index.lock`. Each acquisition
//! opens its own file description, so the lock also serializes threads within
//! one process. Elsewhere a `create_new` marker file stands in.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::CacheError;

/// Name of the lock file within the cache directory.
pub const LOCK_FILE: &str = "index.lock";

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// RAII guard for the cache lock. Released on drop.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
}

impl CacheLock {
    /// Acquires the lock for `cache_dir`, blocking until it is available.
    ///
    /// Contention is never an error: after each `wait` slice without success a
    /// warning is logged and acquisition continues. Only failure to open the
    /// lock file is reported.
    pub fn acquire(cache_dir: &Path, wait: Duration) -> Result<Self, CacheError> {
        let path = cache_dir.join(LOCK_FILE);
        let mut slice_start = Instant::now();
        let mut rounds = 0u32;
        loop {
            if let Some(lock) = Self::try_acquire(&path)? {
                if rounds > 0 {
                    debug!(path = %path.display(), rounds, "cache lock acquired after contention");
                }
                return Ok(lock);
            }
            if slice_start.elapsed() >= wait {
                rounds += 1;
                warn!(path = %path.display(), waited = ?wait, rounds, "cache lock contended, still waiting");
                slice_start = Instant::now();
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_acquire(path: &Path) -> Result<Option<Self>, CacheError> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| CacheError::io(path, e))?;
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(Self {
                path: path.to_path_buf(),
                file,
            }));
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(None),
            _ => Err(CacheError::io(path, err)),
        }
    }

    #[cfg(not(unix))]
    fn try_acquire(path: &Path) -> Result<Option<Self>, CacheError> {
        let marker = path.with_extension("held");
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(file) => Ok(Some(Self { path: marker, file })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(CacheError::io(marker, e)),
        }
    }
}

impl Drop for CacheLock {
    #[cfg(unix)]
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }

    #[cfg(not(unix))]
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
