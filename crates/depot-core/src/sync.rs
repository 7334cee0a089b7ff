//! Mutual exclusion over coordinate sets.
//!
//! Every high-level operation (resolve, install, deploy) acquires a sync
//! context over the artifacts and metadata it touches so that concurrent
//! sessions sharing a lock manager do not interleave on the same files.
//! Acquisition is all-or-nothing: keys are sorted globally before locking,
//! so two contexts can never hold complementary halves of each other's sets.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use depot_util::errors::DepotResult;

use crate::artifact::Artifact;
use crate::metadata::Metadata;

/// Process-wide table of named locks, keyed by coordinate string.
///
/// Bound to the repository system instance rather than global state so tests
/// can substitute their own.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

/// Holds locks over a set of coordinates for the duration of an operation.
///
/// Dropping the context releases everything; dropping without ever acquiring
/// is fine.
pub trait SyncContext {
    fn acquire(&mut self, artifacts: &[Artifact], metadata: &[Metadata]) -> DepotResult<()>;
}

/// Context for single-process single-threaded callers.
#[derive(Default)]
pub struct NoopSyncContext;

impl SyncContext for NoopSyncContext {
    fn acquire(&mut self, _artifacts: &[Artifact], _metadata: &[Metadata]) -> DepotResult<()> {
        Ok(())
    }
}

enum Guard {
    Shared(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Context backed by named locks from a [`LockManager`].
pub struct NamedLockSyncContext {
    manager: Arc<LockManager>,
    shared: bool,
    held: HashSet<String>,
    guards: Vec<Guard>,
}

impl NamedLockSyncContext {
    pub fn new(manager: Arc<LockManager>, shared: bool) -> Self {
        Self {
            manager,
            shared,
            held: HashSet::new(),
            guards: Vec::new(),
        }
    }
}

impl SyncContext for NamedLockSyncContext {
    fn acquire(&mut self, artifacts: &[Artifact], metadata: &[Metadata]) -> DepotResult<()> {
        // Sorted + deduplicated keys give a global lock order.
        let mut keys = BTreeSet::new();
        for artifact in artifacts {
            keys.insert(format!("artifact:{}", artifact.id()));
        }
        for meta in metadata {
            keys.insert(format!("metadata:{}", meta.key()));
        }
        for key in keys {
            if !self.held.insert(key.clone()) {
                continue;
            }
            let lock = self.manager.handle(&key);
            let guard = if self.shared {
                Guard::Shared(lock.read_arc())
            } else {
                Guard::Exclusive(lock.write_arc())
            };
            self.guards.push(guard);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn artifact(version: &str) -> Artifact {
        Artifact::new("g", "a", "jar", version)
    }

    #[test]
    fn noop_context_is_drop_safe() {
        let _ctx = NoopSyncContext;
    }

    #[test]
    fn exclusive_contexts_serialize() {
        let manager = Arc::new(LockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let manager = manager.clone();
                let inside = inside.clone();
                let completed = completed.clone();
                scope.spawn(move || {
                    let mut ctx = NamedLockSyncContext::new(manager, false);
                    ctx.acquire(&[artifact("1.0")], &[]).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    std::thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    drop(ctx);
                    completed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });
        assert_eq!(completed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn shared_contexts_overlap() {
        let manager = Arc::new(LockManager::new());
        let mut first = NamedLockSyncContext::new(manager.clone(), true);
        first.acquire(&[artifact("1.0")], &[]).unwrap();

        let mut second = NamedLockSyncContext::new(manager, true);
        // Would deadlock if shared acquisition were exclusive.
        second.acquire(&[artifact("1.0")], &[]).unwrap();
    }

    #[test]
    fn repeated_acquire_of_same_key_is_idempotent() {
        let manager = Arc::new(LockManager::new());
        let mut ctx = NamedLockSyncContext::new(manager, false);
        ctx.acquire(&[artifact("1.0")], &[]).unwrap();
        // A second acquire of the same coordinate must not self-deadlock.
        ctx.acquire(&[artifact("1.0")], &[]).unwrap();
    }

    #[test]
    fn artifact_and_metadata_keys_are_disjoint() {
        let manager = Arc::new(LockManager::new());
        let mut ctx = NamedLockSyncContext::new(manager.clone(), false);
        ctx.acquire(&[artifact("1.0")], &[]).unwrap();

        let meta = Metadata::new("g", "a", "1.0", "maven-metadata.xml", crate::metadata::Nature::Release);
        let mut other = NamedLockSyncContext::new(manager, false);
        other.acquire(&[], &[meta]).unwrap();
    }
}
