//! The ownership cell.
//!
//! [`OwnershipCell`] holds one native object under exactly one of three
//! disciplines, or nothing:
//!
//! - **exclusive-owned**: the cell is the sole owner; release runs the
//!   destructor (or a custom deleter).
//! - **shared-owned**: the cell holds one strong count on an `Arc` block that
//!   may be aliased by native code and by other cells; the last release runs
//!   the destructor.
//! - **unowned-reference**: the cell observes memory owned elsewhere and never
//!   destroys it.
//!
//! Every conversion checks its preconditions before touching the state, so a
//! failed request always leaves the cell exactly as it was.
//!
//! ```
//! use std::sync::Arc;
//! use holdfast_core::{impl_native, OwnershipCell};
//!
//! struct Counter(u32);
//! impl_native!(Counter => "Counter");
//!
//! let mut cell = OwnershipCell::new();
//! cell.store_exclusive(Box::new(Counter(7))).unwrap();
//! assert_eq!(cell.as_ref::<Counter>().unwrap().0, 7);
//!
//! // One-time promotion of the exclusive claim into a shared block.
//! let shared: Arc<Counter> = cell.as_shared().unwrap();
//! assert_eq!(Arc::strong_count(&shared), 2);
//! assert!(cell.take_exclusive::<Counter>().is_err());
//! ```

use std::fmt;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::trace;

use crate::error::{BridgeError, Result};
use crate::{Native, NativeObject, ValueCategory};

/// Type-erased custom destructor for an exclusive-owned object.
pub type Deleter = Box<dyn FnOnce(Box<NativeObject>) + Send + Sync>;

/// Erase a typed deleter for `T`.
///
/// The erased deleter ignores objects of any other type; they are dropped.
pub fn erase_deleter<T, D>(deleter: D) -> Deleter
where
    T: Native,
    D: FnOnce(Box<T>) + Send + Sync + 'static,
{
    Box::new(move |object: Box<NativeObject>| {
        if let Ok(typed) = object.downcast::<T>() {
            deleter(typed);
        }
    })
}

fn run_deleter<T: Native>(value: Box<T>, deleter: Option<Deleter>) {
    match deleter {
        Some(deleter) => {
            let object: Box<NativeObject> = value;
            deleter(object);
        }
        None => drop(value),
    }
}

/// An exclusive claim moved out of a cell, still bound to its destructor.
///
/// Dropping the owner runs the custom deleter if there is one, otherwise it
/// drops the value. Handing it back through
/// [`store_exclusive_erased`](OwnershipCell::store_exclusive_erased) moves
/// the deleter along, so it runs once on whichever side holds the value last.
pub struct ExclusiveOwner<T: Native> {
    value: ManuallyDrop<Box<T>>,
    deleter: Option<Deleter>,
}

impl<T: Native> ExclusiveOwner<T> {
    pub fn new(value: Box<T>, deleter: Option<Deleter>) -> Self {
        Self {
            value: ManuallyDrop::new(value),
            deleter,
        }
    }

    /// Own `value` with a typed custom deleter.
    pub fn with_deleter<D>(value: Box<T>, deleter: D) -> Self
    where
        D: FnOnce(Box<T>) + Send + Sync + 'static,
    {
        Self::new(value, Some(erase_deleter(deleter)))
    }

    pub fn has_custom_deleter(&self) -> bool {
        self.deleter.is_some()
    }

    /// Split into the value and its deleter without running either.
    pub fn into_parts(self) -> (Box<T>, Option<Deleter>) {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the value is taken exactly once.
        let value = unsafe { ManuallyDrop::take(&mut this.value) };
        (value, this.deleter.take())
    }
}

impl<T: Native> Deref for ExclusiveOwner<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Native> DerefMut for ExclusiveOwner<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Native> Drop for ExclusiveOwner<T> {
    fn drop(&mut self) {
        // SAFETY: the value is not touched again after drop.
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        run_deleter(value, self.deleter.take());
    }
}

impl<T: Native + fmt::Debug> fmt::Debug for ExclusiveOwner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveOwner")
            .field("value", &**self)
            .field("custom_deleter", &self.has_custom_deleter())
            .finish()
    }
}

/// Observable state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Holds nothing.
    Empty,
    /// Sole owner of the object.
    Exclusive,
    /// One owner among many sharing a reference-counted block.
    Shared,
    /// Observer of memory owned elsewhere.
    Unowned,
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellKind::Empty => "empty",
            CellKind::Exclusive => "exclusive-owned",
            CellKind::Shared => "shared-owned",
            CellKind::Unowned => "unowned-reference",
        };
        f.write_str(name)
    }
}

enum CellState {
    Empty {
        disowned: bool,
    },
    Exclusive {
        value: Box<NativeObject>,
        deleter: Option<Deleter>,
    },
    Shared {
        block: Arc<NativeObject>,
        /// Set when the block was installed by promoting an exclusive claim.
        promoted: bool,
    },
    Unowned {
        ptr: NonNull<NativeObject>,
        mutable: bool,
    },
}

/// A tagged holder for one native object crossing the boundary.
pub struct OwnershipCell {
    state: CellState,
    type_name: &'static str,
}

// SAFETY: every object a cell can reach is `Send + Sync` (the `NativeObject`
// bound). The only non-thread-safe member is the unowned pointer, and the
// caller of `store_unowned*` guarantees the referent outlives the cell; all
// access happens under the interpreter's execution lock.
unsafe impl Send for OwnershipCell {}
// SAFETY: see above.
unsafe impl Sync for OwnershipCell {}

impl Default for OwnershipCell {
    fn default() -> Self {
        Self::new()
    }
}

impl OwnershipCell {
    /// Create an empty cell.
    pub const fn new() -> Self {
        Self {
            state: CellState::Empty { disowned: false },
            type_name: "<empty>",
        }
    }

    /// Current ownership discipline.
    pub fn kind(&self) -> CellKind {
        match self.state {
            CellState::Empty { .. } => CellKind::Empty,
            CellState::Exclusive { .. } => CellKind::Exclusive,
            CellState::Shared { .. } => CellKind::Shared,
            CellState::Unowned { .. } => CellKind::Unowned,
        }
    }

    /// True unless the cell is empty.
    pub fn is_populated(&self) -> bool {
        !matches!(self.state, CellState::Empty { .. })
    }

    /// True when the cell was emptied by handing its exclusive claim out.
    pub fn is_disowned(&self) -> bool {
        matches!(self.state, CellState::Empty { disowned: true })
    }

    /// True when the shared block was created by promotion.
    pub fn is_promoted(&self) -> bool {
        matches!(self.state, CellState::Shared { promoted: true, .. })
    }

    /// True when the cell may hand out mutable access.
    pub fn is_mutable(&self) -> bool {
        match &self.state {
            CellState::Empty { .. } => false,
            CellState::Exclusive { .. } => true,
            CellState::Shared { block, .. } => Arc::strong_count(block) == 1,
            CellState::Unowned { mutable, .. } => *mutable,
        }
    }

    /// Exposed name of the stored type, `"<empty>"` before the first store.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Address of the stored object, for identity comparisons.
    pub fn address(&self) -> Option<usize> {
        self.erased_view()
            .map(|view| view as *const NativeObject as *const () as usize)
    }

    // ==========================================================================
    // Population
    // ==========================================================================

    /// Take sole ownership of `value`; release drops it.
    pub fn store_exclusive<T: Native>(&mut self, value: Box<T>) -> Result<()> {
        self.ensure_empty()?;
        self.install::<T>(CellState::Exclusive {
            value,
            deleter: None,
        });
        Ok(())
    }

    /// Take sole ownership of `value`; release hands it to `deleter`.
    ///
    /// A cell with a custom deleter can neither be promoted to shared
    /// ownership nor give up its claim as a plain `Box`; use
    /// [`take_exclusive_with_deleter`](Self::take_exclusive_with_deleter).
    pub fn store_exclusive_with_deleter<T, D>(&mut self, value: Box<T>, deleter: D) -> Result<()>
    where
        T: Native,
        D: FnOnce(Box<T>) + Send + Sync + 'static,
    {
        self.store_exclusive_erased(value, erase_deleter(deleter))
    }

    /// Take sole ownership of `value` with an already type-erased deleter.
    pub fn store_exclusive_erased<T: Native>(&mut self, value: Box<T>, deleter: Deleter) -> Result<()> {
        self.ensure_empty()?;
        self.install::<T>(CellState::Exclusive {
            value,
            deleter: Some(deleter),
        });
        Ok(())
    }

    /// Join the owners of `block`, incrementing its reference count.
    pub fn store_shared<T: Native>(&mut self, block: &Arc<T>) -> Result<()> {
        self.ensure_empty()?;
        let block: Arc<NativeObject> = block.clone();
        self.install::<T>(CellState::Shared {
            block,
            promoted: false,
        });
        Ok(())
    }

    /// Observe `value` without owning it.
    ///
    /// # Safety
    ///
    /// `value` must outlive every use of this cell, and must not be mutated
    /// through another path while the cell can observe it.
    pub unsafe fn store_unowned<T: Native>(&mut self, value: &T) -> Result<()> {
        // SAFETY: forwarded to the caller.
        unsafe { self.store_unowned_ptr(NonNull::from(value), false) }
    }

    /// Observe `value` mutably without owning it.
    ///
    /// # Safety
    ///
    /// `value` must outlive every use of this cell, and no other reference to
    /// it may be used while the cell hands out access.
    pub unsafe fn store_unowned_mut<T: Native>(&mut self, value: &mut T) -> Result<()> {
        // SAFETY: forwarded to the caller.
        unsafe { self.store_unowned_ptr(NonNull::from(value), true) }
    }

    /// Observe the object behind a raw pointer without owning it.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads (and writes, if `mutable`) for as long
    /// as the cell can observe it.
    pub unsafe fn store_unowned_ptr<T: Native>(&mut self, ptr: NonNull<T>, mutable: bool) -> Result<()> {
        self.ensure_empty()?;
        let ptr: NonNull<NativeObject> = ptr;
        self.install::<T>(CellState::Unowned { ptr, mutable });
        Ok(())
    }

    fn ensure_empty(&self) -> Result<()> {
        if self.is_populated() {
            return Err(BridgeError::InvalidTransition {
                type_name: self.type_name,
                held: self.kind(),
            });
        }
        Ok(())
    }

    fn install<T: Native>(&mut self, state: CellState) {
        self.state = state;
        self.type_name = T::type_name();
        trace!(type_name = self.type_name, kind = %self.kind(), "cell populated");
    }

    // ==========================================================================
    // Access
    // ==========================================================================

    fn erased_view(&self) -> Option<&NativeObject> {
        match &self.state {
            CellState::Empty { .. } => None,
            CellState::Exclusive { value, .. } => Some(&**value),
            CellState::Shared { block, .. } => Some(&**block),
            // SAFETY: the `store_unowned*` contract keeps the referent alive.
            CellState::Unowned { ptr, .. } => Some(unsafe { ptr.as_ref() }),
        }
    }

    /// Type-erased read access; valid in every populated state.
    ///
    /// `wanted` and `requested` only feed the error when the cell is empty.
    pub fn erased(&self, wanted: &'static str, requested: ValueCategory) -> Result<&NativeObject> {
        self.erased_view()
            .ok_or_else(|| self.empty_error(wanted, requested))
    }

    /// Type-erased write access.
    ///
    /// Exclusive cells and mutable references always allow it; shared cells
    /// only while no other owner aliases the block.
    pub fn erased_mut(
        &mut self,
        wanted: &'static str,
        requested: ValueCategory,
    ) -> Result<&mut NativeObject> {
        let held = self.kind();
        let conflict = |reason| BridgeError::OwnershipConflict {
            type_name: wanted,
            requested,
            held,
            reason,
        };
        match &mut self.state {
            CellState::Empty { disowned } => Err(BridgeError::EmptyCell {
                type_name: wanted,
                requested,
                disowned: *disowned,
            }),
            CellState::Exclusive { value, .. } => Ok(&mut **value),
            CellState::Shared { block, .. } => {
                Arc::get_mut(block).ok_or_else(|| conflict("the shared block is aliased by other owners"))
            }
            CellState::Unowned { ptr, mutable } => {
                if *mutable {
                    // SAFETY: the `store_unowned_mut` contract grants unique access.
                    Ok(unsafe { ptr.as_mut() })
                } else {
                    Err(conflict("the cell observes a read-only reference"))
                }
            }
        }
    }

    /// Borrow the object as `&T` (the raw-reference conversion).
    pub fn as_ref<T: Native>(&self) -> Result<&T> {
        let view = self.erased(T::type_name(), ValueCategory::Reference)?;
        view.downcast_ref::<T>().ok_or(BridgeError::TypeMismatch {
            expected: T::type_name(),
            actual: self.type_name,
        })
    }

    /// Borrow the object as `&mut T`.
    pub fn as_mut<T: Native>(&mut self) -> Result<&mut T> {
        let actual = self.type_name;
        let view = self.erased_mut(T::type_name(), ValueCategory::MutReference)?;
        view.downcast_mut::<T>().ok_or(BridgeError::TypeMismatch {
            expected: T::type_name(),
            actual,
        })
    }

    /// Address of the object as a read-only `NonNull<T>` (the raw-pointer conversion).
    pub fn as_ptr<T: Native>(&self) -> Result<NonNull<T>> {
        let view = self.erased(T::type_name(), ValueCategory::Pointer)?;
        view.downcast_ref::<T>()
            .map(NonNull::from)
            .ok_or(BridgeError::TypeMismatch {
                expected: T::type_name(),
                actual: self.type_name,
            })
    }

    /// Address of the object as a writable `NonNull<T>`.
    pub fn as_mut_ptr<T: Native>(&mut self) -> Result<NonNull<T>> {
        let actual = self.type_name;
        let view = self.erased_mut(T::type_name(), ValueCategory::MutPointer)?;
        view.downcast_mut::<T>()
            .map(NonNull::from)
            .ok_or(BridgeError::TypeMismatch {
                expected: T::type_name(),
                actual,
            })
    }

    // ==========================================================================
    // Ownership transfer
    // ==========================================================================

    /// Convert the exclusive claim into a fresh shared block, once.
    pub fn promote(&mut self) -> Result<()> {
        let reason = match &self.state {
            CellState::Empty { .. } => {
                return Err(self.empty_error(self.type_name, ValueCategory::Shared));
            }
            CellState::Exclusive { deleter: None, .. } => None,
            CellState::Exclusive { deleter: Some(_), .. } => {
                Some("a custom deleter cannot be carried by a shared block")
            }
            CellState::Shared { promoted: true, .. } => Some("the cell was already promoted"),
            CellState::Shared { promoted: false, .. } => Some("the cell already shares ownership"),
            CellState::Unowned { .. } => Some("ownership cannot be fabricated from a reference"),
        };
        if let Some(reason) = reason {
            return Err(self.conflict(self.type_name, ValueCategory::Shared, reason));
        }

        let state = mem::replace(&mut self.state, CellState::Empty { disowned: false });
        self.state = match state {
            CellState::Exclusive { value, .. } => CellState::Shared {
                block: Arc::from(value),
                promoted: true,
            },
            other => other,
        };
        trace!(type_name = self.type_name, "cell promoted to shared ownership");
        Ok(())
    }

    /// Obtain a shared owner, promoting an exclusive claim if needed.
    pub fn as_shared<T: Native>(&mut self) -> Result<Arc<T>> {
        let view = self.erased(T::type_name(), ValueCategory::Shared)?;
        if !view.is::<T>() {
            return Err(BridgeError::TypeMismatch {
                expected: T::type_name(),
                actual: self.type_name,
            });
        }
        match &self.state {
            CellState::Exclusive { .. } => self.promote()?,
            CellState::Unowned { .. } => {
                return Err(self.conflict(
                    T::type_name(),
                    ValueCategory::Shared,
                    "ownership cannot be fabricated from a reference",
                ));
            }
            CellState::Shared { .. } | CellState::Empty { .. } => {}
        }
        match &self.state {
            CellState::Shared { block, .. } => {
                Arc::clone(block)
                    .downcast::<T>()
                    .map_err(|_| BridgeError::TypeMismatch {
                        expected: T::type_name(),
                        actual: self.type_name,
                    })
            }
            _ => Err(self.conflict(T::type_name(), ValueCategory::Shared, "no shared block")),
        }
    }

    /// Move the exclusive claim out, leaving the cell empty (disowned).
    pub fn take_exclusive<T: Native>(&mut self) -> Result<Box<T>> {
        let reason = match &self.state {
            CellState::Empty { .. } => {
                return Err(self.empty_error(T::type_name(), ValueCategory::Exclusive));
            }
            CellState::Exclusive { deleter: Some(_), .. } => {
                Some("a custom deleter cannot travel with a plain Box")
            }
            CellState::Exclusive { value, deleter: None } => {
                if !value.is::<T>() {
                    return Err(BridgeError::TypeMismatch {
                        expected: T::type_name(),
                        actual: self.type_name,
                    });
                }
                None
            }
            CellState::Shared { .. } => Some("other owners may still alias the object"),
            CellState::Unowned { .. } => Some("a non-owning reference cannot be disowned"),
        };
        if let Some(reason) = reason {
            return Err(self.conflict(T::type_name(), ValueCategory::Exclusive, reason));
        }

        match mem::replace(&mut self.state, CellState::Empty { disowned: true }) {
            CellState::Exclusive { value, .. } => {
                trace!(type_name = self.type_name, "exclusive ownership moved out of cell");
                value.downcast::<T>().map_err(|_| BridgeError::TypeMismatch {
                    expected: T::type_name(),
                    actual: self.type_name,
                })
            }
            other => {
                self.state = other;
                Err(self.conflict(T::type_name(), ValueCategory::Exclusive, "no exclusive claim"))
            }
        }
    }

    /// Move the exclusive claim out together with its custom deleter.
    ///
    /// Works for exclusive cells with or without a deleter; the returned
    /// owner destroys the value the same way the cell would have.
    pub fn take_exclusive_with_deleter<T: Native>(&mut self) -> Result<ExclusiveOwner<T>> {
        let reason = match &self.state {
            CellState::Empty { .. } => {
                return Err(self.empty_error(T::type_name(), ValueCategory::Exclusive));
            }
            CellState::Exclusive { value, .. } => {
                if !value.is::<T>() {
                    return Err(BridgeError::TypeMismatch {
                        expected: T::type_name(),
                        actual: self.type_name,
                    });
                }
                None
            }
            CellState::Shared { .. } => Some("other owners may still alias the object"),
            CellState::Unowned { .. } => Some("a non-owning reference cannot be disowned"),
        };
        if let Some(reason) = reason {
            return Err(self.conflict(T::type_name(), ValueCategory::Exclusive, reason));
        }

        match mem::replace(&mut self.state, CellState::Empty { disowned: true }) {
            CellState::Exclusive { value, deleter } => match value.downcast::<T>() {
                Ok(value) => {
                    trace!(
                        type_name = self.type_name,
                        custom_deleter = deleter.is_some(),
                        "exclusive ownership moved out of cell"
                    );
                    Ok(ExclusiveOwner::new(value, deleter))
                }
                Err(value) => {
                    self.state = CellState::Exclusive { value, deleter };
                    Err(BridgeError::TypeMismatch {
                        expected: T::type_name(),
                        actual: self.type_name,
                    })
                }
            },
            other => {
                self.state = other;
                Err(self.conflict(T::type_name(), ValueCategory::Exclusive, "no exclusive claim"))
            }
        }
    }

    /// Give up whatever the cell holds. Idempotent.
    pub fn release(&mut self) {
        if !self.is_populated() {
            return;
        }
        let kind = self.kind();
        match mem::replace(&mut self.state, CellState::Empty { disowned: false }) {
            CellState::Exclusive {
                value,
                deleter: Some(deleter),
            } => deleter(value),
            CellState::Exclusive { value, deleter: None } => drop(value),
            CellState::Shared { block, .. } => drop(block),
            CellState::Unowned { .. } | CellState::Empty { .. } => {}
        }
        trace!(type_name = self.type_name, %kind, "cell released");
    }

    fn empty_error(&self, wanted: &'static str, requested: ValueCategory) -> BridgeError {
        BridgeError::EmptyCell {
            type_name: wanted,
            requested,
            disowned: self.is_disowned(),
        }
    }

    fn conflict(&self, wanted: &'static str, requested: ValueCategory, reason: &'static str) -> BridgeError {
        BridgeError::OwnershipConflict {
            type_name: wanted,
            requested,
            held: self.kind(),
            reason,
        }
    }
}

impl Drop for OwnershipCell {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for OwnershipCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipCell")
            .field("kind", &self.kind())
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::impl_native;

    #[derive(Debug)]
    struct Tracked {
        value: i32,
        drops: Arc<AtomicUsize>,
    }
    impl_native!(Tracked => "Tracked");

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct Other;
    impl_native!(Other => "Other");

    fn tracked(value: i32) -> (Tracked, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (
            Tracked {
                value,
                drops: drops.clone(),
            },
            drops,
        )
    }

    #[test]
    fn new_cell_is_empty() {
        let cell = OwnershipCell::new();
        assert_eq!(cell.kind(), CellKind::Empty);
        assert!(!cell.is_populated());
        assert!(cell.address().is_none());
    }

    #[test]
    fn empty_cell_refuses_every_access() {
        let mut cell = OwnershipCell::new();
        assert!(matches!(
            cell.as_ref::<Other>(),
            Err(BridgeError::EmptyCell { disowned: false, .. })
        ));
        assert!(matches!(cell.as_ptr::<Other>(), Err(BridgeError::EmptyCell { .. })));
        assert!(matches!(cell.as_mut::<Other>(), Err(BridgeError::EmptyCell { .. })));
        assert!(matches!(cell.as_shared::<Other>(), Err(BridgeError::EmptyCell { .. })));
        assert!(matches!(cell.take_exclusive::<Other>(), Err(BridgeError::EmptyCell { .. })));
    }

    #[test]
    fn second_store_is_invalid_transition() {
        let mut cell = OwnershipCell::new();
        cell.store_exclusive(Box::new(Other)).unwrap();
        let err = cell.store_shared(&Arc::new(Other)).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidTransition {
                held: CellKind::Exclusive,
                ..
            }
        ));
        assert_eq!(cell.kind(), CellKind::Exclusive);
    }

    #[test]
    fn exclusive_release_runs_destructor_once() {
        let (value, drops) = tracked(1);
        let mut cell = OwnershipCell::new();
        cell.store_exclusive(Box::new(value)).unwrap();
        cell.release();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        cell.release();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_cell() {
        let (value, drops) = tracked(1);
        {
            let mut cell = OwnershipCell::new();
            cell.store_exclusive(Box::new(value)).unwrap();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_deleter_runs_instead_of_drop() {
        let (value, drops) = tracked(5);
        let deleted = Arc::new(AtomicUsize::new(0));
        let seen = deleted.clone();
        let mut cell = OwnershipCell::new();
        cell.store_exclusive_with_deleter(Box::new(value), move |obj: Box<Tracked>| {
            seen.fetch_add(obj.value as usize, Ordering::SeqCst);
        })
        .unwrap();
        cell.release();
        assert_eq!(deleted.load(Ordering::SeqCst), 5);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_deleter_blocks_transfer() {
        let mut cell = OwnershipCell::new();
        cell.store_exclusive_with_deleter(Box::new(Other), drop).unwrap();
        assert!(matches!(
            cell.take_exclusive::<Other>(),
            Err(BridgeError::OwnershipConflict { .. })
        ));
        assert!(matches!(cell.promote(), Err(BridgeError::OwnershipConflict { .. })));
        assert_eq!(cell.kind(), CellKind::Exclusive);
    }

    #[test]
    fn deleter_travels_with_exclusive_claim() {
        let (value, drops) = tracked(3);
        let deleted = Arc::new(AtomicUsize::new(0));
        let seen = deleted.clone();
        let mut cell = OwnershipCell::new();
        cell.store_exclusive_with_deleter(Box::new(value), move |_: Box<Tracked>| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let mut owner = cell.take_exclusive_with_deleter::<Tracked>().unwrap();
        assert!(cell.is_disowned());
        assert!(owner.has_custom_deleter());
        (*owner).value += 1;
        assert_eq!((*owner).value, 4);
        cell.release();
        assert_eq!(deleted.load(Ordering::SeqCst), 0);

        let (value, deleter) = owner.into_parts();
        let mut back = OwnershipCell::new();
        back.store_exclusive_erased(value, deleter.unwrap()).unwrap();
        assert_eq!(deleted.load(Ordering::SeqCst), 0);
        drop(back);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exclusive_owner_runs_deleter_on_drop() {
        let deleted = Arc::new(AtomicUsize::new(0));
        let seen = deleted.clone();
        let (value, drops) = tracked(1);
        let owner = ExclusiveOwner::with_deleter(Box::new(value), move |_: Box<Tracked>| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        drop(owner);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        let mut cell = OwnershipCell::new();
        let (plain, plain_drops) = tracked(2);
        cell.store_exclusive(Box::new(plain)).unwrap();
        let owner = cell.take_exclusive_with_deleter::<Tracked>().unwrap();
        assert!(!owner.has_custom_deleter());
        drop(owner);
        assert_eq!(plain_drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deleter_take_refuses_shared_and_wrong_type() {
        let mut cell = OwnershipCell::new();
        cell.store_exclusive_with_deleter(Box::new(Other), drop).unwrap();
        assert!(matches!(
            cell.take_exclusive_with_deleter::<Tracked>(),
            Err(BridgeError::TypeMismatch { .. })
        ));
        assert_eq!(cell.kind(), CellKind::Exclusive);

        let mut shared = OwnershipCell::new();
        shared.store_shared(&Arc::new(Other)).unwrap();
        assert!(matches!(
            shared.take_exclusive_with_deleter::<Other>(),
            Err(BridgeError::OwnershipConflict { .. })
        ));
    }

    #[test]
    fn take_exclusive_leaves_disowned_cell() {
        let (value, drops) = tracked(9);
        let mut cell = OwnershipCell::new();
        cell.store_exclusive(Box::new(value)).unwrap();
        let owned = cell.take_exclusive::<Tracked>().unwrap();
        assert_eq!(owned.value, 9);
        assert!(cell.is_disowned());
        assert!(matches!(
            cell.as_ref::<Tracked>(),
            Err(BridgeError::EmptyCell { disowned: true, .. })
        ));
        cell.release();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(owned);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn take_exclusive_wrong_type_leaves_cell_unchanged() {
        let mut cell = OwnershipCell::new();
        cell.store_exclusive(Box::new(Other)).unwrap();
        assert!(matches!(
            cell.take_exclusive::<Tracked>(),
            Err(BridgeError::TypeMismatch { .. })
        ));
        assert_eq!(cell.kind(), CellKind::Exclusive);
        assert!(cell.as_ref::<Other>().is_ok());
    }

    #[test]
    fn shared_cell_refuses_exclusive() {
        let (value, drops) = tracked(3);
        let block = Arc::new(value);
        let mut cell = OwnershipCell::new();
        cell.store_shared(&block).unwrap();
        assert_eq!(Arc::strong_count(&block), 2);
        assert!(matches!(
            cell.take_exclusive::<Tracked>(),
            Err(BridgeError::OwnershipConflict {
                held: CellKind::Shared,
                ..
            })
        ));
        assert_eq!(cell.kind(), CellKind::Shared);
        drop(cell);
        assert_eq!(Arc::strong_count(&block), 1);
        drop(block);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unowned_cell_never_destroys() {
        let (value, drops) = tracked(4);
        let mut cell = OwnershipCell::new();
        unsafe { cell.store_unowned(&value).unwrap() };
        assert_eq!(cell.as_ref::<Tracked>().unwrap().value, 4);
        assert!(matches!(
            cell.take_exclusive::<Tracked>(),
            Err(BridgeError::OwnershipConflict { .. })
        ));
        assert!(matches!(
            cell.as_shared::<Tracked>(),
            Err(BridgeError::OwnershipConflict { .. })
        ));
        assert!(matches!(
            cell.as_mut::<Tracked>(),
            Err(BridgeError::OwnershipConflict { .. })
        ));
        cell.release();
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(value.value, 4);
    }

    #[test]
    fn unowned_mut_writes_through() {
        let (mut value, _drops) = tracked(1);
        {
            let mut cell = OwnershipCell::new();
            unsafe { cell.store_unowned_mut(&mut value).unwrap() };
            cell.as_mut::<Tracked>().unwrap().value = 42;
        }
        assert_eq!(value.value, 42);
    }

    #[test]
    fn pointer_matches_reference_address() {
        let value = Other;
        let mut cell = OwnershipCell::new();
        unsafe { cell.store_unowned(&value).unwrap() };
        let ptr = cell.as_ptr::<Other>().unwrap();
        assert_eq!(ptr.as_ptr() as *const Other, &value as *const Other);
        assert_eq!(cell.address(), Some(&value as *const Other as usize));
    }

    #[test]
    fn promotion_happens_once() {
        let (value, drops) = tracked(2);
        let mut cell = OwnershipCell::new();
        cell.store_exclusive(Box::new(value)).unwrap();
        cell.promote().unwrap();
        assert!(cell.is_promoted());
        assert!(matches!(
            cell.promote(),
            Err(BridgeError::OwnershipConflict { .. })
        ));
        cell.release();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn as_shared_promotes_and_outlives_cell() {
        let (value, drops) = tracked(11);
        let longer_living = {
            let mut cell = OwnershipCell::new();
            cell.store_exclusive(Box::new(value)).unwrap();
            let shared = cell.as_shared::<Tracked>().unwrap();
            assert_eq!(cell.kind(), CellKind::Shared);
            shared
        };
        assert_eq!(longer_living.value, 11);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(longer_living);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_mutation_requires_unique_block() {
        let mut cell = OwnershipCell::new();
        cell.store_exclusive(Box::new(tracked(1).0)).unwrap();
        let alias = cell.as_shared::<Tracked>().unwrap();
        assert!(!cell.is_mutable());
        assert!(matches!(
            cell.as_mut::<Tracked>(),
            Err(BridgeError::OwnershipConflict { .. })
        ));
        drop(alias);
        assert!(cell.is_mutable());
        cell.as_mut::<Tracked>().unwrap().value = 8;
        assert_eq!(cell.as_ref::<Tracked>().unwrap().value, 8);
    }

    #[test]
    fn wrong_type_reports_mismatch() {
        let mut cell = OwnershipCell::new();
        cell.store_exclusive(Box::new(Other)).unwrap();
        let err = cell.as_ref::<Tracked>().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::TypeMismatch {
                expected: "Tracked",
                actual: "Other"
            }
        ));
    }
}
