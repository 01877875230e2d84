//! TypeRegistry - per-session table of exposed types.
//!
//! [`TypeRegistry`] maps a native type identity to its [`TypeEntry`]: layer
//! list, base layout table, and optional polymorphic hook. Entries are
//! immutable once registered.
//!
//! # Thread Safety
//!
//! `TypeRegistry` is **not** internally synchronized. Registration happens
//! while modules initialize; afterwards the registry is effectively read-only.
//! The interpreter session wraps it in an `RwLock` so that registration
//! completes-before any lookup of the registered entry.
//!
//! # Projection
//!
//! A cell stores a value of its layer type. Loading a different type from it
//! means finding a path through the layout graph: polymorphic hooks lead to
//! the most-derived runtime value, base layouts lead to embedded base values.
//! [`TypeRegistry::project`] and [`TypeRegistry::project_mut`] walk that path.

use std::any::TypeId;
use std::sync::atomic::{AtomicU64, Ordering};

use holdfast_core::{BridgeError, Native, NativeObject, Result, TypeHash};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::cache;
use crate::entry::TypeEntry;

/// Bound on hook and base hops while searching for a projection path.
const MAX_PROJECTION_DEPTH: usize = 16;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// One hop of a projection path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Apply the polymorphic hook of the type.
    Resolve(TypeHash),
    /// Apply the base layout at this index of the type.
    Upcast(TypeHash, usize),
}

/// Table of exposed types for one interpreter session.
#[derive(Debug)]
pub struct TypeRegistry {
    id: u64,
    types: FxHashMap<TypeHash, TypeEntry>,
    by_type_id: FxHashMap<TypeId, TypeHash>,
    by_name: FxHashMap<&'static str, TypeHash>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            types: FxHashMap::default(),
            by_type_id: FxHashMap::default(),
            by_name: FxHashMap::default(),
        }
    }

    /// Process-unique identity of this registry.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    // ==========================================================================
    // Registration
    // ==========================================================================

    /// Register a type.
    ///
    /// # Errors
    ///
    /// `DuplicateRegistration` if the hash or exposed name is taken,
    /// `UnregisteredType` if a composite layer or declared base is unknown,
    /// `InsufficientResources` if the tables cannot grow.
    pub fn register(&mut self, entry: impl Into<TypeEntry>) -> Result<TypeHash> {
        let entry = entry.into();
        if self.types.contains_key(&entry.hash) || self.by_name.contains_key(entry.name) {
            return Err(BridgeError::DuplicateRegistration {
                name: entry.name.to_string(),
                kind: "type",
            });
        }
        let dependencies = entry.bases.iter().map(|layout| layout.base);
        let dependencies = dependencies.chain(if entry.is_composite() {
            entry.layers.clone()
        } else {
            Vec::new()
        });
        for dependency in dependencies {
            if !self.types.contains_key(&dependency) {
                return Err(BridgeError::UnregisteredType {
                    type_name: format!("{dependency} (required by {})", entry.name),
                });
            }
        }

        let exhausted = |_| BridgeError::InsufficientResources {
            what: format!("type {}", entry.name),
        };
        self.types.try_reserve(1).map_err(exhausted)?;
        self.by_name.try_reserve(1).map_err(exhausted)?;
        if entry.type_id.is_some() {
            self.by_type_id.try_reserve(1).map_err(exhausted)?;
        }

        let hash = entry.hash;
        debug!(name = entry.name, %hash, kind = ?entry.kind, "type registered");
        if let Some(type_id) = entry.type_id {
            self.by_type_id.insert(type_id, hash);
        }
        self.by_name.insert(entry.name, hash);
        self.types.insert(hash, entry);
        Ok(hash)
    }

    /// Register a composite type whose instances hold one cell per layer.
    pub fn register_composite(&mut self, name: &'static str, layers: &[TypeHash]) -> Result<TypeHash> {
        self.register(TypeEntry::composite(name, layers.to_vec()))
    }

    // ==========================================================================
    // Lookup
    // ==========================================================================

    pub fn get(&self, hash: TypeHash) -> Option<&TypeEntry> {
        self.types.get(&hash)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&TypeEntry> {
        self.by_name.get(name).and_then(|hash| self.types.get(hash))
    }

    /// Entry for the native type `T`.
    pub fn lookup<T: Native>(&self) -> Option<&TypeEntry> {
        self.get(T::type_hash())
    }

    pub fn contains(&self, hash: TypeHash) -> bool {
        self.types.contains_key(&hash)
    }

    /// Registered hash of a Rust type, through the thread-local cache.
    pub fn hash_of(&self, type_id: TypeId) -> Option<TypeHash> {
        if let Some(hash) = cache::lookup(self.id, type_id) {
            return Some(hash);
        }
        let hash = self.by_type_id.get(&type_id).copied()?;
        cache::remember(self.id, type_id, hash);
        Some(hash)
    }

    /// Iterate over all registered entries.
    pub fn entries(&self) -> impl Iterator<Item = &TypeEntry> {
        self.types.values()
    }

    // ==========================================================================
    // Projection
    // ==========================================================================

    /// Registered type of the most-derived value reachable through hooks.
    pub fn most_derived(&self, declared: TypeHash, view: &NativeObject) -> TypeHash {
        let mut current = declared;
        let mut view = view;
        for _ in 0..MAX_PROJECTION_DEPTH {
            let Some(hook) = self.get(current).and_then(|entry| entry.polymorphic.as_ref()) else {
                break;
            };
            let Some(inner) = hook.resolve(view) else {
                break;
            };
            match self.hash_of((*inner).type_id()) {
                Some(next) if next != current => {
                    current = next;
                    view = inner;
                }
                _ => break,
            }
        }
        current
    }

    /// Path from a value stored as `from` to a value of Rust type `target`.
    pub fn resolve_path(&self, from: TypeHash, view: &NativeObject, target: TypeId) -> Option<Vec<Step>> {
        let mut path = Vec::new();
        self.search(from, view, target, &mut path).then_some(path)
    }

    fn search(&self, current: TypeHash, view: &NativeObject, target: TypeId, path: &mut Vec<Step>) -> bool {
        if (*view).type_id() == target {
            return true;
        }
        if path.len() >= MAX_PROJECTION_DEPTH {
            return false;
        }
        let Some(entry) = self.get(current) else {
            return false;
        };

        if let Some(inner) = entry.polymorphic.as_ref().and_then(|hook| hook.resolve(view)) {
            let next = self.hash_of((*inner).type_id()).unwrap_or(TypeHash::EMPTY);
            path.push(Step::Resolve(current));
            if self.search(next, inner, target, path) {
                return true;
            }
            path.pop();
        }

        for (index, layout) in entry.bases.iter().enumerate() {
            if let Some(base) = layout.upcast(view) {
                path.push(Step::Upcast(current, index));
                if self.search(layout.base, base, target, path) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    /// Project a stored value onto the Rust type `target`.
    pub fn project<'a>(&self, from: TypeHash, view: &'a NativeObject, target: TypeId) -> Option<&'a NativeObject> {
        let path = self.resolve_path(from, view, target)?;
        let mut current = view;
        for step in path {
            current = match step {
                Step::Resolve(hash) => self.get(hash)?.polymorphic.as_ref()?.resolve(current)?,
                Step::Upcast(hash, index) => self.get(hash)?.bases.get(index)?.upcast(current)?,
            };
        }
        Some(current)
    }

    /// Project a stored value onto the Rust type `target` for writing.
    pub fn project_mut<'a>(
        &self,
        from: TypeHash,
        view: &'a mut NativeObject,
        target: TypeId,
    ) -> Option<&'a mut NativeObject> {
        let path = self.resolve_path(from, &*view, target)?;
        let mut current = view;
        for step in path {
            current = match step {
                Step::Resolve(hash) => self.get(hash)?.polymorphic.as_ref()?.resolve_mut(current)?,
                Step::Upcast(hash, index) => self.get(hash)?.bases.get(index)?.upcast_mut(current)?,
            };
        }
        Some(current)
    }

    /// Typed form of [`project`](Self::project).
    pub fn project_ref<'a, T: Native>(&self, from: TypeHash, view: &'a NativeObject) -> Option<&'a T> {
        self.project(from, view, TypeId::of::<T>())?.downcast_ref::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClassBuilder;
    use holdfast_core::impl_native;

    struct Animal {
        legs: u32,
    }
    impl_native!(Animal => "Animal");

    struct Dog {
        animal: Animal,
        name: &'static str,
    }
    impl_native!(Dog => "Dog");

    trait Shape: Send + Sync + 'static {
        fn as_native(&self) -> &NativeObject;
        fn as_native_mut(&mut self) -> &mut NativeObject;
    }

    struct Circle {
        radius: f64,
    }
    impl_native!(Circle => "Circle");

    impl Shape for Circle {
        fn as_native(&self) -> &NativeObject {
            self
        }
        fn as_native_mut(&mut self) -> &mut NativeObject {
            self
        }
    }

    struct AnyShape(Box<dyn Shape>);
    impl_native!(AnyShape => "Shape");

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register(ClassBuilder::<Animal>::new()).unwrap();
        registry
            .register(ClassBuilder::<Dog>::new().base(|d: &Dog| &d.animal, |d: &mut Dog| &mut d.animal))
            .unwrap();
        registry.register(ClassBuilder::<Circle>::new()).unwrap();
        registry
            .register(ClassBuilder::<AnyShape>::new().polymorphic(
                |s: &AnyShape| s.0.as_native(),
                |s: &mut AnyShape| s.0.as_native_mut(),
            ))
            .unwrap();
        registry
    }

    #[test]
    fn register_and_lookup() {
        let registry = registry();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.lookup::<Dog>().unwrap().name, "Dog");
        assert_eq!(registry.get_by_name("Shape").unwrap().hash, AnyShape::type_hash());
        assert_eq!(registry.hash_of(TypeId::of::<Circle>()), Some(Circle::type_hash()));
        assert_eq!(registry.hash_of(TypeId::of::<u8>()), None);
    }

    #[test]
    fn duplicate_registration() {
        let mut registry = registry();
        let err = registry.register(ClassBuilder::<Dog>::new()).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::DuplicateRegistration { ref name, kind: "type" } if name == "Dog"
        ));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn unknown_base_is_rejected() {
        let mut registry = TypeRegistry::new();
        let err = registry
            .register(ClassBuilder::<Dog>::new().base(|d: &Dog| &d.animal, |d: &mut Dog| &mut d.animal))
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnregisteredType { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn composite_registration() {
        let mut registry = registry();
        let hash = registry
            .register_composite("Kennel", &[Dog::type_hash(), Circle::type_hash()])
            .unwrap();
        let entry = registry.get(hash).unwrap();
        assert!(entry.is_composite());
        assert_eq!(entry.layers.len(), 2);
        assert!(matches!(
            registry.register_composite("Broken", &[TypeHash::from_name("Nope")]),
            Err(BridgeError::UnregisteredType { .. })
        ));
    }

    #[test]
    fn base_projection_reads_and_writes() {
        let registry = registry();
        let mut dog = Dog {
            animal: Animal { legs: 4 },
            name: "rex",
        };
        let animal = registry.project_ref::<Animal>(Dog::type_hash(), &dog).unwrap();
        assert_eq!(animal.legs, 4);

        let view = registry
            .project_mut(Dog::type_hash(), &mut dog, TypeId::of::<Animal>())
            .unwrap();
        view.downcast_mut::<Animal>().unwrap().legs = 3;
        assert_eq!(dog.animal.legs, 3);
        assert_eq!(dog.name, "rex");
    }

    #[test]
    fn projection_to_unrelated_type_fails() {
        let registry = registry();
        let animal = Animal { legs: 2 };
        assert!(registry.project_ref::<Dog>(Animal::type_hash(), &animal).is_none());
    }

    #[test]
    fn polymorphic_hook_finds_most_derived() {
        let registry = registry();
        let shape = AnyShape(Box::new(Circle { radius: 2.0 }));
        assert_eq!(registry.most_derived(AnyShape::type_hash(), &shape), Circle::type_hash());

        let circle = registry.project_ref::<Circle>(AnyShape::type_hash(), &shape).unwrap();
        assert_eq!(circle.radius, 2.0);
        assert_eq!(
            registry.resolve_path(AnyShape::type_hash(), &shape, TypeId::of::<Circle>()),
            Some(vec![Step::Resolve(AnyShape::type_hash())])
        );
    }

    #[test]
    fn most_derived_without_hook_is_declared() {
        let registry = registry();
        let dog = Dog {
            animal: Animal { legs: 4 },
            name: "rex",
        };
        assert_eq!(registry.most_derived(Dog::type_hash(), &dog), Dog::type_hash());
    }

    #[test]
    fn registries_have_distinct_ids() {
        assert_ne!(TypeRegistry::new().id(), TypeRegistry::new().id());
    }
}
