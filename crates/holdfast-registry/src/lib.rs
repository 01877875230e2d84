//! Type registry for the holdfast ownership bridge.
//!
//! - [`TypeRegistry`]: per-session table of exposed types
//! - [`ClassBuilder`]: describes a native type, its bases, and its
//!   polymorphic hook
//! - [`invalidate_thread_caches`]: drops every thread's lookup cache at
//!   session teardown

mod builder;
mod cache;
mod entry;
mod registry;

pub use builder::ClassBuilder;
pub use cache::{cache_epoch, cached_entries, invalidate_thread_caches};
pub use entry::{BaseLayout, PolymorphicHook, Projection, ProjectionMut, TypeEntry, TypeFlags, TypeKind};
pub use registry::{Step, TypeRegistry};
