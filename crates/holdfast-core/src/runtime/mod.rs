//! Value model of the embedded dynamic runtime.
//!
//! ## Key Types
//!
//! - [`Dynamic`]: Runtime value (primitives and object handles)
//! - [`ObjectHeap`]: Generational, reference-counted arena for runtime objects
//! - [`ObjectHandle`]: Copyable reference into an [`ObjectHeap`]

mod dynamic;
mod object_heap;

pub use dynamic::Dynamic;
pub use object_heap::{ObjectHandle, ObjectHeap};
