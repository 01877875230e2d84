//! Registered type metadata.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use holdfast_core::{NativeObject, TypeHash};

/// Read-only projection from one stored view to another.
pub type Projection =
    Arc<dyn for<'a> Fn(&'a NativeObject) -> Option<&'a NativeObject> + Send + Sync>;

/// Mutable projection from one stored view to another.
pub type ProjectionMut =
    Arc<dyn for<'a> Fn(&'a mut NativeObject) -> Option<&'a mut NativeObject> + Send + Sync>;

pub(crate) fn projection<F>(f: F) -> Projection
where
    F: for<'a> Fn(&'a NativeObject) -> Option<&'a NativeObject> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn projection_mut<F>(f: F) -> ProjectionMut
where
    F: for<'a> Fn(&'a mut NativeObject) -> Option<&'a mut NativeObject> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Kind of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// A Rust type stored directly in a single cell.
    Native,
    /// A dynamic-side type built from several native layers.
    Composite,
}

bitflags! {
    /// Properties of a registered type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeFlags: u8 {
        /// Has a hook revealing a more-derived runtime type.
        const POLYMORPHIC = 1 << 0;
        /// Embeds at least one registered base type.
        const HAS_BASES = 1 << 1;
        /// Built from native layers on the dynamic side.
        const COMPOSITE = 1 << 2;
    }
}

/// Layout entry for one base type embedded in a derived type.
///
/// Rust has no byte-offset casts between related types, so the layout table
/// stores projections: given the derived view, they produce the embedded base.
#[derive(Clone)]
pub struct BaseLayout {
    pub base: TypeHash,
    pub(crate) upcast: Projection,
    pub(crate) upcast_mut: ProjectionMut,
}

impl BaseLayout {
    pub fn upcast<'a>(&self, view: &'a NativeObject) -> Option<&'a NativeObject> {
        (self.upcast)(view)
    }

    pub fn upcast_mut<'a>(&self, view: &'a mut NativeObject) -> Option<&'a mut NativeObject> {
        (self.upcast_mut)(view)
    }
}

impl fmt::Debug for BaseLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseLayout")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

/// Resolver for the most-derived view of a polymorphic value.
///
/// For a trait-object holder such as `Box<dyn Shape>`, the hook returns the
/// concrete value behind the box so the registry can look up its real type.
#[derive(Clone)]
pub struct PolymorphicHook {
    pub(crate) resolve: Projection,
    pub(crate) resolve_mut: ProjectionMut,
}

impl PolymorphicHook {
    pub fn resolve<'a>(&self, view: &'a NativeObject) -> Option<&'a NativeObject> {
        (self.resolve)(view)
    }

    pub fn resolve_mut<'a>(&self, view: &'a mut NativeObject) -> Option<&'a mut NativeObject> {
        (self.resolve_mut)(view)
    }
}

impl fmt::Debug for PolymorphicHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolymorphicHook").finish_non_exhaustive()
    }
}

/// Metadata for one exposed type. Immutable once registered.
#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub hash: TypeHash,
    pub name: &'static str,
    /// Rust type of the stored value; `None` for composite types.
    pub type_id: Option<TypeId>,
    pub kind: TypeKind,
    /// Native layer types, in cell order. A native type lists itself.
    pub layers: Vec<TypeHash>,
    pub bases: Vec<BaseLayout>,
    pub polymorphic: Option<PolymorphicHook>,
    pub flags: TypeFlags,
}

impl TypeEntry {
    /// Metadata for a composite type built from `layers`.
    pub fn composite(name: &'static str, layers: Vec<TypeHash>) -> Self {
        Self {
            hash: TypeHash::from_composite(name, &layers),
            name,
            type_id: None,
            kind: TypeKind::Composite,
            layers,
            bases: Vec::new(),
            polymorphic: None,
            flags: TypeFlags::COMPOSITE,
        }
    }

    pub fn is_polymorphic(&self) -> bool {
        self.flags.contains(TypeFlags::POLYMORPHIC)
    }

    pub fn is_composite(&self) -> bool {
        self.kind == TypeKind::Composite
    }

    /// Layout entry for a directly embedded base.
    pub fn base(&self, base: TypeHash) -> Option<&BaseLayout> {
        self.bases.iter().find(|layout| layout.base == base)
    }
}
