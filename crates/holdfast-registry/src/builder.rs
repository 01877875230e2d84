//! Builder for native type registrations.
//!
//! ```
//! use holdfast_core::{impl_native, Native};
//! use holdfast_registry::{ClassBuilder, TypeRegistry};
//!
//! struct Animal {
//!     legs: u32,
//! }
//! impl_native!(Animal => "Animal");
//!
//! struct Dog {
//!     animal: Animal,
//! }
//! impl_native!(Dog => "Dog");
//!
//! let mut registry = TypeRegistry::new();
//! registry.register(ClassBuilder::<Animal>::new()).unwrap();
//! registry
//!     .register(ClassBuilder::<Dog>::new().base(|d: &Dog| &d.animal, |d: &mut Dog| &mut d.animal))
//!     .unwrap();
//!
//! let dog = Dog { animal: Animal { legs: 4 } };
//! let animal = registry.project_ref::<Animal>(Dog::type_hash(), &dog).unwrap();
//! assert_eq!(animal.legs, 4);
//! ```

use std::any::TypeId;
use std::marker::PhantomData;

use holdfast_core::{Native, NativeObject};

use crate::entry::{
    projection, projection_mut, BaseLayout, PolymorphicHook, TypeEntry, TypeFlags, TypeKind,
};

/// Describes how a native type `T` is exposed.
pub struct ClassBuilder<T: Native> {
    bases: Vec<BaseLayout>,
    polymorphic: Option<PolymorphicHook>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Native> Default for ClassBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Native> ClassBuilder<T> {
    pub fn new() -> Self {
        Self {
            bases: Vec::new(),
            polymorphic: None,
            _marker: PhantomData,
        }
    }

    /// Declare that `T` embeds the registered type `B`.
    pub fn base<B: Native>(mut self, upcast: fn(&T) -> &B, upcast_mut: fn(&mut T) -> &mut B) -> Self {
        self.bases.push(BaseLayout {
            base: B::type_hash(),
            upcast: projection(move |view: &NativeObject| {
                view.downcast_ref::<T>()
                    .map(|derived| upcast(derived) as &NativeObject)
            }),
            upcast_mut: projection_mut(move |view: &mut NativeObject| {
                view.downcast_mut::<T>()
                    .map(|derived| upcast_mut(derived) as &mut NativeObject)
            }),
        });
        self
    }

    /// Install the downcast hook revealing the concrete value behind `T`.
    pub fn polymorphic(
        mut self,
        resolve: fn(&T) -> &NativeObject,
        resolve_mut: fn(&mut T) -> &mut NativeObject,
    ) -> Self {
        self.polymorphic = Some(PolymorphicHook {
            resolve: projection(move |view: &NativeObject| view.downcast_ref::<T>().map(resolve)),
            resolve_mut: projection_mut(move |view: &mut NativeObject| {
                view.downcast_mut::<T>().map(resolve_mut)
            }),
        });
        self
    }

    /// Finish the registration record.
    pub fn build(self) -> TypeEntry {
        let mut flags = TypeFlags::empty();
        if self.polymorphic.is_some() {
            flags |= TypeFlags::POLYMORPHIC;
        }
        if !self.bases.is_empty() {
            flags |= TypeFlags::HAS_BASES;
        }
        TypeEntry {
            hash: T::type_hash(),
            name: T::type_name(),
            type_id: Some(TypeId::of::<T>()),
            kind: TypeKind::Native,
            layers: vec![T::type_hash()],
            bases: self.bases,
            polymorphic: self.polymorphic,
            flags,
        }
    }
}

impl<T: Native> From<ClassBuilder<T>> for TypeEntry {
    fn from(builder: ClassBuilder<T>) -> Self {
        builder.build()
    }
}
