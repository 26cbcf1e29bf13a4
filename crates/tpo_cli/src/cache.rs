//! `tpo cache`: build cache statistics and maintenance.

use tpo_cache::{BuildCache, CacheSettings};

use crate::context;
use crate::{CacheAction, GlobalArgs};

/// Runs a `tpo cache` subcommand.
pub fn run(action: CacheAction, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = context::load(global)?;
    let cache = BuildCache::open(CacheSettings {
        dir: config.cache.dir.clone(),
        max_bytes: config.cache.max_bytes,
        max_entries: config.cache.max_entries,
        lock_wait: config.cache.lock_wait(),
    })?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            println!("cache:   {}", cache.dir().display());
            println!("entries: {} / {}", stats.entries, stats.max_entries);
            println!("bytes:   {} / {}", stats.total_bytes, stats.max_bytes);
            if global.verbose {
                for entry in cache.entries()? {
                    println!(
                        "  {}  {:<20} {:>10} bytes",
                        entry.fingerprint.short(),
                        entry.platform,
                        entry.size_bytes
                    );
                }
            }
        }
        CacheAction::Gc => {
            let report = cache.gc()?;
            if !global.quiet {
                println!(
                    "removed {} orphaned, {} dangling, {} temporary",
                    report.orphans_removed, report.dangling_removed, report.temp_removed
                );
            }
        }
        CacheAction::Purge => {
            let removed = cache.purge()?;
            if !global.quiet {
                println!("removed {removed} cached build(s)");
            }
        }
    }
    Ok(0)
}
