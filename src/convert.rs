//! Conversion adapter between native values and instance records.
//!
//! ## Outbound (native to dynamic)
//!
//! An [`Outbound`] value carries the category the native side declared, and
//! [`Interpreter::cast`] turns it into a fresh instance record:
//!
//! | Declared                | Cell                                  |
//! |-------------------------|---------------------------------------|
//! | by value, `Box<T>`      | exclusive-owned; dynamic side destroys |
//! | `Box<T>` with a deleter | exclusive-owned; deleter destroys     |
//! | `Arc<T>`                | shared-owned; last owner destroys     |
//! | `&T`, `&mut T`, pointer | unowned; never destroyed here         |
//!
//! ## Inbound (dynamic to native)
//!
//! The `load_*` family reads a record in the category the native parameter
//! declares. Borrowing (`load_ref`, `load_ptr`, `load_value`) works from any
//! populated cell; `load_mut` needs write access; `load_exclusive` and
//! `load_shared` transfer ownership and are subject to the cell's rules.
//!
//! Loads that name a type other than the one stored go through the registry:
//! polymorphic hooks reach the most-derived value and base layouts reach
//! embedded bases. Ownership transfers never project, since a base cannot
//! be moved out of its derived value.

use std::any::TypeId;
use std::ptr::NonNull;
use std::sync::Arc;

use holdfast_core::{
    erase_deleter, BridgeError, Deleter, Dynamic, ExclusiveOwner, InstanceRecord, Native,
    NativeObject, OwnershipCell, Result, ValueCategory,
};
use holdfast_registry::TypeRegistry;
use tracing::trace;

use crate::interpreter::Interpreter;

enum Repr<T> {
    Value(T),
    Exclusive(Box<T>),
    ExclusiveWithDeleter {
        value: Box<T>,
        deleter: Deleter,
    },
    Shared(Arc<T>),
    Borrowed {
        ptr: NonNull<T>,
        category: ValueCategory,
    },
}

/// A native value on its way to the dynamic side, tagged with its category.
pub struct Outbound<T: Native> {
    repr: Repr<T>,
}

impl<T: Native> Outbound<T> {
    /// Pass by value; the dynamic side owns the moved value.
    pub fn value(value: T) -> Self {
        Self {
            repr: Repr::Value(value),
        }
    }

    /// Pass by value from a borrow; the dynamic side owns a copy.
    pub fn copied(value: &T) -> Self
    where
        T: Clone,
    {
        Self::value(value.clone())
    }

    /// Hand over an exclusive owner.
    pub fn exclusive(value: Box<T>) -> Self {
        Self {
            repr: Repr::Exclusive(value),
        }
    }

    /// Hand over an exclusive owner that must be destroyed by `deleter`.
    ///
    /// The deleter runs once, on whichever side releases the value last.
    pub fn exclusive_with_deleter<D>(value: Box<T>, deleter: D) -> Self
    where
        D: FnOnce(Box<T>) + Send + Sync + 'static,
    {
        Self {
            repr: Repr::ExclusiveWithDeleter {
                value,
                deleter: erase_deleter(deleter),
            },
        }
    }

    /// Share ownership with the dynamic side.
    pub fn shared(value: Arc<T>) -> Self {
        Self {
            repr: Repr::Shared(value),
        }
    }

    /// Expose a read-only reference.
    ///
    /// # Safety
    ///
    /// `value` must outlive every dynamic-side use of the resulting record.
    pub unsafe fn reference(value: &T) -> Self {
        Self::borrowed(NonNull::from(value), ValueCategory::Reference)
    }

    /// Expose a mutable reference.
    ///
    /// # Safety
    ///
    /// `value` must outlive every dynamic-side use of the resulting record,
    /// and must not be accessed through another path meanwhile.
    pub unsafe fn mut_reference(value: &mut T) -> Self {
        Self::borrowed(NonNull::from(value), ValueCategory::MutReference)
    }

    /// Expose a read-only raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads for every dynamic-side use of the record.
    pub unsafe fn pointer(ptr: NonNull<T>) -> Self {
        Self::borrowed(ptr, ValueCategory::Pointer)
    }

    /// Expose a mutable raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes for every dynamic-side use of
    /// the record.
    pub unsafe fn mut_pointer(ptr: NonNull<T>) -> Self {
        Self::borrowed(ptr, ValueCategory::MutPointer)
    }

    fn borrowed(ptr: NonNull<T>, category: ValueCategory) -> Self {
        Self {
            repr: Repr::Borrowed { ptr, category },
        }
    }

    /// Category the native side declared.
    pub fn category(&self) -> ValueCategory {
        match &self.repr {
            Repr::Value(_) => ValueCategory::Value,
            Repr::Exclusive(_) | Repr::ExclusiveWithDeleter { .. } => ValueCategory::Exclusive,
            Repr::Shared(_) => ValueCategory::Shared,
            Repr::Borrowed { category, .. } => *category,
        }
    }

    fn view(&self) -> &NativeObject {
        match &self.repr {
            Repr::Value(value) => value,
            Repr::Exclusive(value) | Repr::ExclusiveWithDeleter { value, .. } => &**value,
            Repr::Shared(value) => &**value,
            // SAFETY: the unsafe constructors require the referent to be live.
            Repr::Borrowed { ptr, .. } => unsafe { ptr.as_ref() },
        }
    }

    /// Populate `cell` with the discipline matching the category.
    pub(crate) fn store(self, cell: &mut OwnershipCell) -> Result<()> {
        match self.repr {
            Repr::Value(value) => cell.store_exclusive(Box::new(value)),
            Repr::Exclusive(value) => cell.store_exclusive(value),
            Repr::ExclusiveWithDeleter { value, deleter } => {
                cell.store_exclusive_erased(value, deleter)
            }
            Repr::Shared(value) => cell.store_shared(&value),
            Repr::Borrowed { ptr, category } => {
                // SAFETY: the unsafe constructors carry the lifetime contract.
                unsafe { cell.store_unowned_ptr(ptr, category.is_mutable()) }
            }
        }
    }
}

impl<T: Native> From<Box<T>> for Outbound<T> {
    fn from(value: Box<T>) -> Self {
        Self::exclusive(value)
    }
}

impl<T: Native> From<ExclusiveOwner<T>> for Outbound<T> {
    fn from(owner: ExclusiveOwner<T>) -> Self {
        match owner.into_parts() {
            (value, Some(deleter)) => Self {
                repr: Repr::ExclusiveWithDeleter { value, deleter },
            },
            (value, None) => Self::exclusive(value),
        }
    }
}

impl<T: Native> From<Arc<T>> for Outbound<T> {
    fn from(value: Arc<T>) -> Self {
        Self::shared(value)
    }
}

/// Index of the first populated layer that can produce a `target` view.
fn locate_layer(
    registry: &TypeRegistry,
    record: &InstanceRecord,
    target: TypeId,
    wanted: &'static str,
    requested: ValueCategory,
) -> Result<usize> {
    let found = record.layers().iter().position(|layer| {
        layer
            .cell()
            .erased(wanted, requested)
            .ok()
            .and_then(|view| registry.resolve_path(layer.type_hash(), view, target))
            .is_some()
    });
    if let Some(index) = found {
        return Ok(index);
    }

    // An unpopulated layer of the wanted type, or a record with nothing in it.
    let own_layer = registry
        .hash_of(target)
        .and_then(|hash| record.layer_index(hash))
        .and_then(|index| record.layer(index))
        .filter(|layer| !layer.cell().is_populated());
    let empty = match own_layer {
        Some(layer) => Some(layer.cell().is_disowned()),
        None if record.populated_count() == 0 => {
            Some(record.layers().iter().any(|layer| layer.cell().is_disowned()))
        }
        None => None,
    };
    Err(match empty {
        Some(disowned) => BridgeError::EmptyCell {
            type_name: wanted,
            requested,
            disowned,
        },
        None => BridgeError::TypeMismatch {
            expected: wanted,
            actual: record.type_name(),
        },
    })
}

/// Index of the layer storing exactly `T`, for ownership transfers.
fn owning_layer<T: Native>(record: &InstanceRecord, requested: ValueCategory) -> Result<usize> {
    let index = record
        .layer_index(T::type_hash())
        .ok_or(BridgeError::TypeMismatch {
            expected: T::type_name(),
            actual: record.type_name(),
        })?;
    if record.populated_count() == 0 {
        let disowned = record.layers().iter().any(|layer| layer.cell().is_disowned());
        return Err(BridgeError::EmptyCell {
            type_name: T::type_name(),
            requested,
            disowned,
        });
    }
    Ok(index)
}

impl Interpreter {
    /// Convert a native value into a new instance record.
    ///
    /// The returned object has a reference count of one, owned by the caller.
    /// If the stored type has a polymorphic hook, the record is exposed as
    /// the most-derived registered type.
    ///
    /// # Errors
    ///
    /// `UnregisteredType` if `T` is not registered in this session.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn cast<T: Native>(&mut self, value: Outbound<T>) -> Result<Dynamic> {
        let internals = Arc::clone(self.internals());
        let registry = internals.registry();
        if !registry.contains(T::type_hash()) {
            return Err(BridgeError::UnregisteredType {
                type_name: T::type_name().to_string(),
            });
        }

        let exposed = registry.most_derived(T::type_hash(), value.view());
        let exposed_name = registry.get(exposed).map_or(T::type_name(), |entry| entry.name);
        let category = value.category();
        let mut record =
            InstanceRecord::single(exposed, exposed_name, (T::type_hash(), T::type_name()));
        record.populate(0, |cell| value.store(cell))?;

        let handle = self.heap_mut().allocate(record);
        trace!(type_name = exposed_name, %category, index = handle.index, "native value cast");
        Ok(Dynamic::Object(handle))
    }

    /// Allocate an empty record for a registered (usually composite) type.
    pub fn allocate(&mut self, type_hash: holdfast_core::TypeHash) -> Result<Dynamic> {
        let internals = Arc::clone(self.internals());
        let registry = internals.registry();
        let entry = registry
            .get(type_hash)
            .ok_or_else(|| BridgeError::UnregisteredType {
                type_name: type_hash.to_string(),
            })?;
        let layers: Vec<_> = entry
            .layers
            .iter()
            .map(|layer| {
                let name = registry.get(*layer).map_or("<unregistered>", |e| e.name);
                (*layer, name)
            })
            .collect();
        let record = InstanceRecord::new(entry.hash, entry.name, layers);
        let handle = self.heap_mut().allocate(record);
        trace!(type_name = entry.name, index = handle.index, "instance allocated");
        Ok(Dynamic::Object(handle))
    }

    /// Populate the layer of `obj` that stores `T`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if that layer is already populated, `TypeMismatch`
    /// if the record has no layer for `T`.
    pub fn init_layer<T: Native>(&mut self, obj: &Dynamic, value: Outbound<T>) -> Result<()> {
        let record = self.record_mut(obj)?;
        let index = record
            .layer_index(T::type_hash())
            .ok_or(BridgeError::TypeMismatch {
                expected: T::type_name(),
                actual: record.type_name(),
            })?;
        record.populate(index, |cell| value.store(cell))
    }

    /// Borrow the native value of `obj` as `&T`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load_ref<T: Native>(&self, obj: &Dynamic) -> Result<&T> {
        let record = self.record(obj)?;
        let registry = self.internals().registry();
        let target = TypeId::of::<T>();
        let index = locate_layer(&registry, record, target, T::type_name(), ValueCategory::Reference)?;
        let mismatch = BridgeError::TypeMismatch {
            expected: T::type_name(),
            actual: record.type_name(),
        };
        let Some(layer) = record.layer(index) else {
            return Err(mismatch);
        };
        let view = layer.cell().erased(T::type_name(), ValueCategory::Reference)?;
        registry
            .project(layer.type_hash(), view, target)
            .and_then(|found| found.downcast_ref::<T>())
            .ok_or(mismatch)
    }

    /// Address of the native value of `obj`, as a read-only pointer.
    pub fn load_ptr<T: Native>(&self, obj: &Dynamic) -> Result<NonNull<T>> {
        self.load_ref::<T>(obj).map(NonNull::from)
    }

    /// Copy the native value of `obj`.
    pub fn load_value<T: Native + Clone>(&self, obj: &Dynamic) -> Result<T> {
        self.load_ref::<T>(obj).cloned()
    }

    /// Borrow the native value of `obj` as `&mut T`.
    ///
    /// # Errors
    ///
    /// `OwnershipConflict` if the cell observes a read-only reference or
    /// shares its block with other owners.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load_mut<T: Native>(&mut self, obj: &Dynamic) -> Result<&mut T> {
        let internals = Arc::clone(self.internals());
        let registry = internals.registry();
        let target = TypeId::of::<T>();
        let record = self.record_mut(obj)?;
        let index = locate_layer(&registry, record, target, T::type_name(), ValueCategory::MutReference)?;
        let mismatch = BridgeError::TypeMismatch {
            expected: T::type_name(),
            actual: record.type_name(),
        };
        let Some(layer) = record.layer_mut(index) else {
            return Err(mismatch);
        };
        let from = layer.type_hash();
        let view = layer
            .cell_mut()
            .erased_mut(T::type_name(), ValueCategory::MutReference)?;
        registry
            .project_mut(from, view, target)
            .and_then(|found| found.downcast_mut::<T>())
            .ok_or(mismatch)
    }

    /// Address of the native value of `obj`, as a writable pointer.
    pub fn load_mut_ptr<T: Native>(&mut self, obj: &Dynamic) -> Result<NonNull<T>> {
        self.load_mut::<T>(obj).map(NonNull::from)
    }

    /// Move the exclusive claim on the native value out of `obj`.
    ///
    /// The record stays alive but disowned: later loads report an empty cell.
    ///
    /// # Errors
    ///
    /// `OwnershipConflict` unless the layer storing `T` is exclusive-owned.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load_exclusive<T: Native>(&mut self, obj: &Dynamic) -> Result<Box<T>> {
        let record = self.record_mut(obj)?;
        let index = owning_layer::<T>(record, ValueCategory::Exclusive)?;
        let actual = record.type_name();
        let layer = record
            .layer_mut(index)
            .ok_or(BridgeError::NoSuchLayer { type_name: actual, index })?;
        let owned = layer.cell_mut().take_exclusive::<T>()?;
        trace!(type_name = T::type_name(), "exclusive ownership moved to native side");
        Ok(owned)
    }

    /// Move the exclusive claim out of `obj` together with its custom deleter.
    ///
    /// Unlike [`load_exclusive`](Self::load_exclusive) this accepts cells
    /// that carry a deleter; the returned owner runs it when dropped.
    ///
    /// # Errors
    ///
    /// `OwnershipConflict` unless the layer storing `T` is exclusive-owned.
    pub fn load_exclusive_with_deleter<T: Native>(
        &mut self,
        obj: &Dynamic,
    ) -> Result<ExclusiveOwner<T>> {
        let record = self.record_mut(obj)?;
        let index = owning_layer::<T>(record, ValueCategory::Exclusive)?;
        let actual = record.type_name();
        let layer = record
            .layer_mut(index)
            .ok_or(BridgeError::NoSuchLayer { type_name: actual, index })?;
        let owned = layer.cell_mut().take_exclusive_with_deleter::<T>()?;
        trace!(
            type_name = T::type_name(),
            custom_deleter = owned.has_custom_deleter(),
            "exclusive ownership moved to native side"
        );
        Ok(owned)
    }

    /// Obtain a shared owner of the native value of `obj`.
    ///
    /// An exclusive-owned cell is promoted on first request.
    ///
    /// # Errors
    ///
    /// `OwnershipConflict` if the layer storing `T` is an unowned reference.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn load_shared<T: Native>(&mut self, obj: &Dynamic) -> Result<Arc<T>> {
        let record = self.record_mut(obj)?;
        let index = owning_layer::<T>(record, ValueCategory::Shared)?;
        let actual = record.type_name();
        let layer = record
            .layer_mut(index)
            .ok_or(BridgeError::NoSuchLayer { type_name: actual, index })?;
        layer.cell_mut().as_shared::<T>()
    }
}
