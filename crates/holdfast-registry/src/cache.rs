//! Per-thread lookup cache.
//!
//! Resolving a Rust `TypeId` to its registered [`TypeHash`] happens on every
//! polymorphic cast, so each thread memoizes the answers it has seen. Entries
//! are keyed by registry id, which is never reused, and only successful
//! lookups are stored, so an entry stays correct for the registry's lifetime.
//!
//! [`invalidate_thread_caches`] bumps a process-wide epoch; every thread drops
//! its cache on its next lookup. Session teardown calls it so caches never
//! outlive the registries they describe.

use std::any::TypeId;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use holdfast_core::TypeHash;
use rustc_hash::FxHashMap;
use tracing::debug;

static CACHE_EPOCH: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
struct ThreadCache {
    epoch: u64,
    entries: FxHashMap<(u64, TypeId), TypeHash>,
}

impl ThreadCache {
    fn current(&mut self) -> &mut FxHashMap<(u64, TypeId), TypeHash> {
        let epoch = CACHE_EPOCH.load(Ordering::Acquire);
        if self.epoch != epoch {
            self.entries.clear();
            self.epoch = epoch;
        }
        &mut self.entries
    }
}

thread_local! {
    static TYPE_CACHE: RefCell<ThreadCache> = RefCell::new(ThreadCache::default());
}

/// Invalidate the lookup caches of every thread.
pub fn invalidate_thread_caches() {
    let epoch = CACHE_EPOCH.fetch_add(1, Ordering::AcqRel) + 1;
    debug!(epoch, "thread-local type caches invalidated");
}

/// Current cache epoch.
pub fn cache_epoch() -> u64 {
    CACHE_EPOCH.load(Ordering::Acquire)
}

pub(crate) fn lookup(registry: u64, type_id: TypeId) -> Option<TypeHash> {
    TYPE_CACHE
        .try_with(|cache| cache.borrow_mut().current().get(&(registry, type_id)).copied())
        .ok()
        .flatten()
}

pub(crate) fn remember(registry: u64, type_id: TypeId, hash: TypeHash) {
    let _ = TYPE_CACHE.try_with(|cache| {
        cache.borrow_mut().current().insert((registry, type_id), hash);
    });
}

/// Number of entries in this thread's cache for the current epoch.
pub fn cached_entries() -> usize {
    TYPE_CACHE
        .try_with(|cache| cache.borrow_mut().current().len())
        .unwrap_or(0)
}
