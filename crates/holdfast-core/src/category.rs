//! Native value categories.
//!
//! A native parameter or return value reaches the boundary in one of seven
//! conventions. The bridge collapses them onto three storage disciplines:
//!
//! | Category        | Rust form      | Cell discipline   |
//! |-----------------|----------------|-------------------|
//! | `Value`         | `T` (copy)     | exclusive-owned   |
//! | `Exclusive`     | `Box<T>`       | exclusive-owned   |
//! | `Shared`        | `Arc<T>`       | shared-owned      |
//! | `Reference`     | `&T`           | unowned reference |
//! | `MutReference`  | `&mut T`       | unowned reference |
//! | `Pointer`       | `NonNull<T>`   | unowned reference |
//! | `MutPointer`    | `NonNull<T>`   | unowned reference |

use std::fmt;

/// How a native value is declared at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueCategory {
    /// Pass or return by value (copied across).
    Value,
    /// Shared borrow, `&T`.
    Reference,
    /// Mutable borrow, `&mut T`.
    MutReference,
    /// Read-only raw pointer.
    Pointer,
    /// Mutable raw pointer.
    MutPointer,
    /// Sole owner, `Box<T>`.
    Exclusive,
    /// Reference-counted owner, `Arc<T>`.
    Shared,
}

impl ValueCategory {
    /// True for categories that only observe the object.
    pub fn is_borrow(self) -> bool {
        matches!(
            self,
            ValueCategory::Reference
                | ValueCategory::MutReference
                | ValueCategory::Pointer
                | ValueCategory::MutPointer
        )
    }

    /// True for categories that may write through the object.
    pub fn is_mutable(self) -> bool {
        matches!(self, ValueCategory::MutReference | ValueCategory::MutPointer)
    }
}

impl fmt::Display for ValueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueCategory::Value => "value",
            ValueCategory::Reference => "reference",
            ValueCategory::MutReference => "mutable reference",
            ValueCategory::Pointer => "pointer",
            ValueCategory::MutPointer => "mutable pointer",
            ValueCategory::Exclusive => "exclusive owner",
            ValueCategory::Shared => "shared owner",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrow_categories() {
        assert!(ValueCategory::Reference.is_borrow());
        assert!(ValueCategory::MutPointer.is_borrow());
        assert!(!ValueCategory::Value.is_borrow());
        assert!(!ValueCategory::Shared.is_borrow());
    }

    #[test]
    fn mutable_categories() {
        assert!(ValueCategory::MutReference.is_mutable());
        assert!(!ValueCategory::Reference.is_mutable());
        assert!(!ValueCategory::Exclusive.is_mutable());
    }
}
