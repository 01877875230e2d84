//! Core types for the holdfast ownership bridge.
//!
//! This crate holds everything that does not depend on a live interpreter
//! session:
//!
//! - [`TypeHash`] and [`Native`]: identity of exposed native types
//! - [`OwnershipCell`]: holds one native value under exclusive, shared, or
//!   unowned discipline with checked conversions between them
//! - [`InstanceRecord`]: the dynamic-side proxy that embeds one cell per
//!   native layer
//! - [`Dynamic`], [`ObjectHeap`], [`ObjectHandle`]: the dynamic runtime's
//!   value model
//! - [`BridgeError`], [`NativeError`], [`ConversionError`]: the error taxonomy

pub mod category;
pub mod error;
pub mod holder;
pub mod instance;
pub mod native;
pub mod runtime;
pub mod type_hash;

pub use category::ValueCategory;
pub use error::{BridgeError, ConversionError, NativeError, Result};
pub use holder::{CellKind, Deleter, ExclusiveOwner, OwnershipCell, erase_deleter};
pub use instance::{InstanceFlags, InstanceRecord, Layer};
pub use native::{Native, NativeObject};
pub use runtime::{Dynamic, ObjectHandle, ObjectHeap};
pub use type_hash::TypeHash;
