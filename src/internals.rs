//! Session-local state and the slot that indirects to it.
//!
//! The host never hands out the session state directly. It keeps an
//! [`InternalsSlot`] (a pointer to the pointer) so teardown can detach and
//! destroy the state exactly once, and the next session starts from a fresh
//! one.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use holdfast_registry::TypeRegistry;
use tracing::{trace, warn};

/// State that lives exactly as long as one interpreter session.
#[derive(Debug)]
pub struct SessionInternals {
    epoch: u64,
    registry: RwLock<TypeRegistry>,
}

impl SessionInternals {
    pub(crate) fn new(epoch: u64) -> Self {
        Self {
            epoch,
            registry: RwLock::new(TypeRegistry::new()),
        }
    }

    /// Session this state belongs to.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Read access to the session's type registry.
    pub fn registry(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the session's type registry.
    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, TypeRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replaceable indirection to shared session state.
#[derive(Debug)]
pub struct InternalsSlot<T> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T> Default for InternalsSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InternalsSlot<T> {
    pub const fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Current state, if any.
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current state, creating it with `create` if the slot is empty.
    pub fn get_or_create(&self, create: impl FnOnce() -> T) -> Arc<T> {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slot.get_or_insert_with(|| Arc::new(create())))
    }

    /// Detach the state without destroying it.
    ///
    /// Later lookups see an empty slot; the caller decides when the detached
    /// state is dropped.
    pub fn unref(&self) -> Option<Arc<T>> {
        let detached = self.inner.write().unwrap_or_else(PoisonError::into_inner).take();
        if detached.is_some() {
            trace!("session internals detached");
        }
        detached
    }

    /// Drop the state held by the slot.
    pub fn destroy(&self) {
        if let Some(state) = self.unref() {
            Self::dispose(state);
        }
    }

    /// Drop detached state, warning if something still holds it.
    pub fn dispose(state: Arc<T>) {
        let holders = Arc::strong_count(&state) - 1;
        if holders > 0 {
            warn!(holders, "session internals destroyed while still referenced");
        }
        drop(state);
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
