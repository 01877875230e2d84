//! Native trait for exposable types.
//!
//! Every Rust type that crosses the boundary into the dynamic runtime must
//! implement [`Native`], which supplies its identity via [`TypeHash`] and the
//! name it is exposed under.
//!
//! # Example
//!
//! ```
//! use holdfast_core::{Native, TypeHash};
//!
//! struct Widget {
//!     size: u32,
//! }
//!
//! impl Native for Widget {
//!     fn type_hash() -> TypeHash {
//!         TypeHash::from_name("Widget")
//!     }
//!
//!     fn type_name() -> &'static str {
//!         "Widget"
//!     }
//! }
//! ```
//!
//! Or with the [`impl_native!`](crate::impl_native) shorthand:
//!
//! ```
//! use holdfast_core::{impl_native, Native};
//!
//! struct Gadget;
//! impl_native!(Gadget => "Gadget");
//!
//! assert_eq!(Gadget::type_name(), "Gadget");
//! ```

use std::any::Any;

use crate::TypeHash;

/// Type-erased native object as stored inside an ownership cell.
///
/// The alias pins the `'static` object bound so that `downcast_ref` and
/// friends are available on every reference to it.
pub type NativeObject = dyn Any + Send + Sync;

/// Trait for native types that can be exposed to the dynamic runtime.
pub trait Native: Any + Send + Sync {
    /// Identity of this type in the type registry.
    fn type_hash() -> TypeHash
    where
        Self: Sized;

    /// Name this type is exposed under.
    fn type_name() -> &'static str
    where
        Self: Sized;
}

/// Implement [`Native`] for a type, hashing the given exposed name.
#[macro_export]
macro_rules! impl_native {
    ($ty:ty => $name:literal) => {
        impl $crate::Native for $ty {
            fn type_hash() -> $crate::TypeHash {
                $crate::TypeHash::from_name($name)
            }

            fn type_name() -> &'static str {
                $name
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;
    impl_native!(Marker => "Marker");

    #[test]
    fn macro_implementation() {
        assert_eq!(Marker::type_name(), "Marker");
        assert_eq!(Marker::type_hash(), TypeHash::from_name("Marker"));
    }

    #[test]
    fn erased_object_downcasts() {
        let value: Box<NativeObject> = Box::new(Marker);
        assert!(value.downcast_ref::<Marker>().is_some());
        assert!(value.downcast_ref::<u8>().is_none());
    }
}
