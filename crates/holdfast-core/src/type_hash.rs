//! Deterministic hash-based type identity.
//!
//! [`TypeHash`] is a 64-bit hash that names an exposed native type. It is
//! computed from the type's exposed name, so the same name always produces the
//! same identity across sessions and across the native/dynamic boundary:
//!
//! - Registration order does not matter
//! - A session can be torn down and rebuilt without renumbering types
//! - Composite (dynamic-side) types derive their identity from their layers
//!
//! # Examples
//!
//! ```
//! use holdfast_core::TypeHash;
//!
//! let widget = TypeHash::from_name("Widget");
//! assert_eq!(widget, TypeHash::from_name("Widget"));
//! assert_ne!(widget, TypeHash::from_name("Gadget"));
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Separator constant for composite components
    pub const SEP: u64 = 0x4bc94d6bd06053ad;

    /// Domain marker for type hashes
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for composite (multi-layer) type hashes
    pub const COMPOSITE: u64 = 0x9a7f3d5e2b8c4601;

    /// Layer position mixing constants, so layer order matters.
    pub const LAYER_MARKERS: [u64; 8] = [
        0x9e3779b97f4a7c15,
        0xbf58476d1ce4e5b9,
        0x94d049bb133111eb,
        0xd6e8feb86659fd93,
        0xe7037ed1a0b428db,
        0xc6a4a7935bd1e995,
        0x8648dbbc94d49b8d,
        0xa2b48b2c69e0d657,
    ];
}

/// A deterministic 64-bit hash identifying an exposed type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a type hash from an exposed type name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Create the hash of a composite type from its name and native layers.
    ///
    /// Layer order matters: `(A, B)` and `(B, A)` lay out their cells
    /// differently and therefore are different types.
    #[inline]
    pub fn from_composite(name: &str, layers: &[TypeHash]) -> Self {
        let mut hash = hash_constants::COMPOSITE ^ xxh64(name.as_bytes(), 0);
        for (i, layer) in layers.iter().enumerate() {
            let marker = hash_constants::LAYER_MARKERS
                .get(i)
                .copied()
                .unwrap_or_else(|| hash_constants::LAYER_MARKERS[0].wrapping_add(i as u64));
            hash = hash.wrapping_mul(hash_constants::SEP).wrapping_add(marker ^ layer.0);
        }
        TypeHash(hash)
    }

    /// Check if this is an empty/invalid hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Get the underlying u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
