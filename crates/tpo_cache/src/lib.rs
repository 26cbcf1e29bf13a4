//! Persistent, cross-process build cache.
//!
//! A cache directory holds an `index.json` describing every cached build, an
//! `index.lock` file used for cross-process mutual exclusion, and one
//! directory per fingerprint under `artifacts/` containing the copied build
//! outputs plus a binary record of the build's captured output.
//!
//! Reads are fail-safe: a corrupt index or record is treated as a miss.

#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod lock;
pub mod record;

pub use cache::{BuildCache, CacheSettings, CacheStats, CachedBuild, GcReport, InsertOutcome};
pub use error::CacheError;
pub use fingerprint::{hash_source_tree, BuildFingerprint, FingerprintInput};
pub use index::{CacheEntry, CacheIndex};
pub use lock::CacheLock;
pub use record::BuildRecord;
