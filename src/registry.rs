//! Interning, reference counting, and the locking discipline that makes
//! the rest of the engine safe.
//!
//! Acquisition order is always registry-first, then record. Where an
//! operation here needs two record locks at once (`rename`) they are
//! taken in path order to avoid an ABBA deadlock. Where an operation
//! hands a record to the [`crate::queue::CompressionQueue`]
//! (`drain_force`), the registry lock is held for the duration and the
//! record lock is always released before the queue lock is taken, so the
//! three never nest in any order but 1 (registry) -> 2 (queue) -> 3 (record).
//!
//! `acquire` does not return a held lock guard: unlike the original's
//! pthread-mutex record, `tokio::sync::Mutex`'s guard borrows its `Mutex`,
//! and returning one tied to an `Arc<FileState>` the caller also owns would
//! make `FileState` self-referential. Callers lock `state.inner` themselves
//! immediately after `acquire` returns; every call site in this crate does
//! so without any intervening `.await`, which is the same "held on return"
//! contract in practice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::policy::Policy;
use crate::queue::CompressionQueue;
use crate::state::{hash_path, FileSize, FileState};

pub struct FileStateRegistry {
    states: Mutex<HashMap<PathBuf, Arc<FileState>>>,
}

impl Default for FileStateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStateRegistry {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Number of interned records; used by the shutdown drain loop.
    pub async fn len(&self) -> usize {
        self.states.lock().await.len()
    }

    /// Returns a locked-on-return record for `path` (see module docs for
    /// what "locked on return" means here). If `create` is false and no
    /// record exists, a transient record scoped to this call is returned
    /// without being interned.
    pub async fn acquire(&self, path: &Path, create: bool) -> Arc<FileState> {
        let mut map = self.states.lock().await;
        if let Some(existing) = map.get(path) {
            let state = existing.clone();
            drop(map);
            state.inner.lock().await.accesses += 1;
            return state;
        }
        let state = Arc::new(FileState::new(path.to_path_buf()));
        state.inner.lock().await.accesses += 1;
        if create {
            map.insert(path.to_path_buf(), state.clone());
        }
        state
    }

    /// Unlocks; if the record is now idle (`accesses == 0`) and the policy
    /// deems it background-compressible, hands it to `queue` instead of
    /// evicting it immediately.
    pub async fn release(&self, state: &Arc<FileState>, queue: &CompressionQueue, policy: &Policy) {
        let mut inner = state.inner.lock().await;
        inner.accesses = inner.accesses.saturating_sub(1);
        if inner.accesses != 0 {
            return;
        }
        let backgroundable = !inner.deleted
            && !inner.queued
            && inner.codec.is_none()
            && !inner.dontcompress
            && matches!(
                inner.size,
                FileSize::Known(size) if size >= policy.min_background_size(&inner.path)
            );
        if backgroundable {
            inner.queued = true;
            drop(inner);
            queue.push(state.clone()).await;
            return;
        }
        let path = inner.path.clone();
        drop(inner);
        self.evict_if_current(&path, state).await;
    }

    /// Sets the tombstone; a subsequent `acquire` on the same path creates
    /// a fresh record, independent of this one.
    pub async fn mark_deleted(&self, state: &Arc<FileState>) {
        let path = {
            let mut inner = state.inner.lock().await;
            inner.deleted = true;
            inner.path.clone()
        };
        self.evict_if_current(&path, state).await;
    }

    /// Atomically transfers `src`'s identity into `dst_path`'s slot. Any
    /// record currently occupying `dst_path` is tombstoned in place.
    pub async fn rename(&self, src: Arc<FileState>, dst_path: &Path) -> Arc<FileState> {
        let mut map = self.states.lock().await;
        let src_path = src.inner.lock().await.path.clone();
        let dst_existing = map.remove(dst_path);
        map.remove(&src_path);

        // Lock order follows path order: whichever of src/dst sorts first
        // is locked as the outer guard, the other nested inside.
        if src_path <= *dst_path {
            let mut src_inner = src.inner.lock().await;
            if let Some(dst_state) = &dst_existing {
                dst_state.inner.lock().await.deleted = true;
            }
            src_inner.path = dst_path.to_path_buf();
            src_inner.path_hash = hash_path(dst_path);
        } else {
            let mut dst_guard = None;
            if let Some(dst_state) = &dst_existing {
                dst_guard = Some(dst_state.inner.lock().await);
            }
            let mut src_inner = src.inner.lock().await;
            src_inner.path = dst_path.to_path_buf();
            src_inner.path_hash = hash_path(dst_path);
            if let Some(mut dst_inner) = dst_guard {
                dst_inner.deleted = true;
            }
        }

        map.insert(dst_path.to_path_buf(), src.clone());
        src
    }

    /// Pushes every idle, non-tombstoned, not-yet-compressed record onto
    /// `queue`, used by the shutdown drain loop. Returns the number of
    /// records pushed.
    pub async fn drain_force(&self, queue: &CompressionQueue) -> usize {
        let map = self.states.lock().await;
        let mut pushed = 0;
        for state in map.values() {
            let mut inner = state.inner.lock().await;
            if inner.deleted || inner.queued || inner.accesses != 0 || inner.codec.is_some() {
                continue;
            }
            inner.queued = true;
            drop(inner);
            queue.push(state.clone()).await;
            pushed += 1;
        }
        pushed
    }

    /// Clears the `queued` flag after a background compression attempt
    /// (success, skip, or cancellation) and evicts the record if it is
    /// still idle.
    pub async fn finish_background(&self, state: &Arc<FileState>) {
        let (evict, path) = {
            let mut inner = state.inner.lock().await;
            inner.queued = false;
            (inner.accesses == 0 && !inner.deleted, inner.path.clone())
        };
        if evict {
            self.evict_if_current(&path, state).await;
        }
    }

    async fn evict_if_current(&self, path: &Path, state: &Arc<FileState>) {
        let mut map = self.states.lock().await;
        if let Some(current) = map.get(path) {
            if Arc::ptr_eq(current, state) {
                map.remove(path);
            }
        }
    }
}
