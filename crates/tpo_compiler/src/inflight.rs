//! Per-fingerprint single-flight coordination.
//!
//! The first request for a fingerprint becomes the leader and builds; any
//! request for the same fingerprint that arrives while the leader is running
//! waits on the leader's slot and receives a copy of its result.
//!
//! Instances that stage into the same work directory share one registry (see
//! [`InFlightRegistry::shared`]), so two instances for the same platform never
//! build the same fingerprint side by side. Across processes the cache's
//! idempotent insert settles duplicate work.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex};
use tpo_cache::BuildFingerprint;

use crate::result::CompileResult;

enum SlotState {
    Pending,
    Done(CompileResult),
    Abandoned,
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }
}

/// Registry of builds currently in progress, keyed by fingerprint.
#[derive(Default)]
pub struct InFlightRegistry {
    slots: Mutex<HashMap<BuildFingerprint, Arc<Slot>>>,
}

/// The outcome of [`InFlightRegistry::claim`].
pub enum Claim<'a> {
    /// The caller must build and then publish.
    Leader(LeaderGuard<'a>),
    /// Another caller is building; wait for its result.
    Follower(Waiter),
}

impl InFlightRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry for every instance staging under `work_dir` in this
    /// process. Repeated calls with the same directory return the same
    /// registry.
    pub fn shared(work_dir: &Path) -> Arc<InFlightRegistry> {
        static SHARED: OnceLock<Mutex<HashMap<PathBuf, Arc<InFlightRegistry>>>> = OnceLock::new();
        let key = std::path::absolute(work_dir).unwrap_or_else(|_| work_dir.to_path_buf());
        let mut registries = SHARED.get_or_init(Default::default).lock();
        Arc::clone(registries.entry(key).or_default())
    }

    /// Becomes the leader for `fingerprint`, or joins the running leader.
    pub fn claim(&self, fingerprint: BuildFingerprint) -> Claim<'_> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&fingerprint) {
            return Claim::Follower(Waiter {
                slot: Arc::clone(slot),
            });
        }
        let slot = Arc::new(Slot::new());
        slots.insert(fingerprint, Arc::clone(&slot));
        Claim::Leader(LeaderGuard {
            registry: self,
            fingerprint,
            slot,
            published: false,
        })
    }

    /// Number of builds currently in flight.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, fingerprint: &BuildFingerprint, slot: &Arc<Slot>, state: SlotState) {
        *slot.state.lock() = state;
        slot.ready.notify_all();
        let mut slots = self.slots.lock();
        if slots.get(fingerprint).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(fingerprint);
        }
    }
}

/// Held by the leader while it builds. Publishing hands the result to every
/// waiter; dropping without publishing (for example on panic) releases the
/// waiters empty-handed so they never block forever.
pub struct LeaderGuard<'a> {
    registry: &'a InFlightRegistry,
    fingerprint: BuildFingerprint,
    slot: Arc<Slot>,
    published: bool,
}

impl LeaderGuard<'_> {
    /// Shares `result` with all waiters and leaves the registry.
    pub fn publish(mut self, result: &CompileResult) {
        self.published = true;
        self.registry
            .release(&self.fingerprint, &self.slot, SlotState::Done(result.clone()));
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.registry
                .release(&self.fingerprint, &self.slot, SlotState::Abandoned);
        }
    }
}

/// A follower's handle on a running build.
pub struct Waiter {
    slot: Arc<Slot>,
}

impl Waiter {
    /// Blocks until the leader finishes. `None` means the leader gave up
    /// without a result.
    pub fn wait(self) -> Option<CompileResult> {
        let mut state = self.slot.state.lock();
        loop {
            match &*state {
                SlotState::Pending => self.slot.ready.wait(&mut state),
                SlotState::Done(result) => return Some(result.clone()),
                SlotState::Abandoned => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tpo_common::ContentHash;

    fn fp(tag: &str) -> BuildFingerprint {
        BuildFingerprint::from_hash(ContentHash::from_bytes(tag.as_bytes()))
    }

    #[test]
    fn first_claim_leads_second_follows() {
        let registry = InFlightRegistry::new();
        let leader = match registry.claim(fp("a")) {
            Claim::Leader(g) => g,
            Claim::Follower(_) => panic!("expected leader"),
        };
        assert!(matches!(registry.claim(fp("a")), Claim::Follower(_)));
        assert!(matches!(registry.claim(fp("b")), Claim::Leader(_)));
        leader.publish(&CompileResult::success("native", Path::new("a")));
        assert!(registry.is_empty());
    }

    #[test]
    fn followers_receive_leader_result() {
        let registry = Arc::new(InFlightRegistry::new());
        let Claim::Leader(leader) = registry.claim(fp("a")) else {
            panic!("expected leader");
        };

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let Claim::Follower(w) = registry.claim(fp("a")) else {
                    panic!("expected follower");
                };
                std::thread::spawn(move || w.wait())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(50));
        let mut result = CompileResult::success("native", Path::new("a"));
        result.stdout = "hello".to_string();
        leader.publish(&result);

        for w in waiters {
            assert_eq!(w.join().unwrap().unwrap().stdout, "hello");
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_leader_releases_waiters() {
        let registry = InFlightRegistry::new();
        let leader = registry.claim(fp("a"));
        let Claim::Follower(waiter) = registry.claim(fp("a")) else {
            panic!("expected follower");
        };
        drop(leader);
        assert!(waiter.wait().is_none());
        assert!(matches!(registry.claim(fp("a")), Claim::Leader(_)));
    }

    #[test]
    fn shared_registry_is_per_work_dir() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let first = InFlightRegistry::shared(a.path());
        assert!(Arc::ptr_eq(&first, &InFlightRegistry::shared(a.path())));
        assert!(!Arc::ptr_eq(&first, &InFlightRegistry::shared(b.path())));

        let Claim::Leader(leader) = first.claim(fp("shared")) else {
            panic!("expected leader");
        };
        let other = InFlightRegistry::shared(a.path());
        assert!(matches!(other.claim(fp("shared")), Claim::Follower(_)));
        leader.publish(&CompileResult::success("native", Path::new("a")));
    }

    #[test]
    fn late_waiter_sees_published_result() {
        let registry = InFlightRegistry::new();
        let Claim::Leader(leader) = registry.claim(fp("a")) else {
            panic!("expected leader");
        };
        let Claim::Follower(waiter) = registry.claim(fp("a")) else {
            panic!("expected follower");
        };
        leader.publish(&CompileResult::success("native", Path::new("a")));
        assert!(waiter.wait().unwrap().ok());
    }
}
