//! Single-flight build cache.
//!
//! Maps cache keys to artifacts. At most one build per key runs at a time:
//! the first caller for a key becomes the leader and builds; later callers
//! block on that key's slot until the leader resolves it. The slot map lock
//! is held only for lookup, insert and removal; builds run outside it.
//!
//! A successful build stays memoized for the lifetime of the cache. A failed
//! build is reported to every caller that was waiting on it and the slot is
//! dropped, so the next request retries instead of inheriting the failure.

use std::collections::HashMap;
use std::sync::Arc;

use kreduce_core::{CacheKey, ContentHash};
use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::artifact::{check_library, Artifact};
use crate::error::{BuildError, Result};
use crate::store::ArtifactStore;

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from memory (including waiters on a shared build).
    pub hits: usize,
    /// Requests that had to resolve a key (adopt or build).
    pub misses: usize,
    /// Artifacts adopted from the store without building.
    pub adoptions: usize,
    /// Build functions invoked.
    pub builds: usize,
    /// Resolutions that ended in an error.
    pub failures: usize,
}

enum SlotState {
    Building,
    Ready(Artifact),
    Failed(BuildError),
}

/// Resolution state of one key.
struct Slot {
    state: Mutex<SlotState>,
    resolved: Condvar,
}

impl Slot {
    fn new() -> Self {
        Slot {
            state: Mutex::new(SlotState::Building),
            resolved: Condvar::new(),
        }
    }

    fn resolve(&self, outcome: &Result<Artifact>) {
        let mut state = self.state.lock();
        *state = match outcome {
            Ok(artifact) => SlotState::Ready(artifact.clone()),
            Err(e) => SlotState::Failed(e.clone()),
        };
        self.resolved.notify_all();
    }

    /// Block until the slot is resolved.
    fn wait(&self) -> Result<Artifact> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                SlotState::Ready(artifact) => return Ok(artifact.clone()),
                SlotState::Failed(e) => return Err(e.clone()),
                SlotState::Building => {}
            }
            self.resolved.wait(&mut state);
        }
    }
}

/// Build cache over an [`ArtifactStore`].
///
/// Construct one per process and share it (e.g. behind an `Arc`); there is
/// no global instance.
pub struct BuildCache {
    store: ArtifactStore,
    slots: Mutex<HashMap<ContentHash, Arc<Slot>>>,
    stats: Mutex<CacheStats>,
}

impl std::fmt::Debug for BuildCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCache")
            .field("store", &self.store)
            .field("entries", &self.slots.lock().len())
            .finish()
    }
}

impl BuildCache {
    /// Create an empty cache over `store`.
    pub fn new(store: ArtifactStore) -> Self {
        BuildCache {
            store,
            slots: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Return the artifact for `key`, building it with `build` if neither
    /// memory nor the store has it.
    ///
    /// `build` runs at most once per in-flight attempt; concurrent callers
    /// for the same key share its outcome. A caller that stops waiting does
    /// not cancel the build.
    pub fn get_or_build<F>(&self, key: &CacheKey, build: F) -> Result<Artifact>
    where
        F: FnOnce() -> Result<Artifact>,
    {
        let digest = key.digest();
        let (slot, leader) = {
            let mut slots = self.slots.lock();
            match slots.get(&digest) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::new());
                    slots.insert(digest.clone(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !leader {
            let outcome = slot.wait();
            if outcome.is_ok() {
                self.bump(|s| s.hits += 1);
            }
            return outcome;
        }

        self.bump(|s| s.misses += 1);
        let mut guard = LeaderGuard {
            cache: self,
            digest,
            slot,
            key_description: key.describe(),
            finished: false,
        };
        let outcome = self.resolve(key, build);
        guard.finish(&outcome);
        outcome
    }

    /// Adopt from the store or build, then validate and record.
    fn resolve<F>(&self, key: &CacheKey, build: F) -> Result<Artifact>
    where
        F: FnOnce() -> Result<Artifact>,
    {
        if let Some(artifact) = self.store.lookup(key) {
            self.bump(|s| s.adoptions += 1);
            info!(
                event = "artifact_adopted",
                key = %key.describe(),
                path = %artifact.path.display(),
            );
            return Ok(artifact);
        }

        self.bump(|s| s.builds += 1);
        let artifact = build()?;

        check_library(&artifact.path).map_err(|detail| BuildError::ArtifactUnloadable {
            key: key.describe(),
            path: artifact.path.clone(),
            detail,
        })?;
        self.store.record(key, &artifact)?;
        Ok(artifact)
    }

    /// Whether `key` currently has a resolved artifact in memory.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let slot = match self.slots.lock().get(&key.digest()) {
            Some(slot) => Arc::clone(slot),
            None => return false,
        };
        let state = slot.state.lock();
        matches!(*state, SlotState::Ready(_))
    }

    /// Forget `key` in memory and delete its stored artifact, so the next
    /// request rebuilds it. An in-flight build for the key is left alone.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let digest = key.digest();
        {
            let mut slots = self.slots.lock();
            let in_flight = slots
                .get(&digest)
                .is_some_and(|slot| matches!(&*slot.state.lock(), SlotState::Building));
            if in_flight {
                return Ok(false);
            }
            slots.remove(&digest);
        }
        warn!(event = "artifact_invalidated", key = %key.describe());
        self.store.remove(key)
    }

    /// Number of resolved or in-flight keys held in memory.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return cache usage statistics.
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        f(&mut self.stats.lock());
    }
}

/// Resolves the leader's slot even if the build panics, so waiters never
/// block forever.
struct LeaderGuard<'a> {
    cache: &'a BuildCache,
    digest: ContentHash,
    slot: Arc<Slot>,
    key_description: String,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(&mut self, outcome: &Result<Artifact>) {
        if outcome.is_err() {
            self.cache.bump(|s| s.failures += 1);
            self.detach();
        }
        self.slot.resolve(outcome);
        self.finished = true;
    }

    /// Drop the slot from the map so later requests start a fresh attempt.
    fn detach(&self) {
        let mut slots = self.cache.slots.lock();
        if slots
            .get(&self.digest)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            slots.remove(&self.digest);
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let outcome = Err(BuildError::BuildFailed {
                key: self.key_description.clone(),
                diagnostic: "build aborted before completion".to_string(),
            });
            self.finish(&outcome);
        }
    }
}
