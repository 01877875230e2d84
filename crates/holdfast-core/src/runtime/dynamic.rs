//! Runtime value type of the embedded dynamic runtime.

use std::fmt;

use super::ObjectHandle;

/// A value as the dynamic runtime sees it.
///
/// Primitives are stored inline. Everything else (instance records, modules,
/// callables) lives in the session's [`ObjectHeap`](super::ObjectHeap) and is
/// referenced through a handle.
///
/// Cloning a `Dynamic::Object` copies the handle only; it does not touch the
/// object's reference count.
#[derive(Clone, Default, PartialEq)]
pub enum Dynamic {
    /// No value
    #[default]
    Void,
    /// Integer value (every native integer width is carried as i64)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// String value (owned)
    String(String),
    /// Handle to a heap-allocated object
    Object(ObjectHandle),
    /// Null handle
    NullHandle,
}

impl Dynamic {
    /// Get a human-readable name for this value's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Dynamic::Void => "void",
            Dynamic::Int(_) => "int",
            Dynamic::Float(_) => "float",
            Dynamic::Bool(_) => "bool",
            Dynamic::String(_) => "string",
            Dynamic::Object(_) => "object",
            Dynamic::NullHandle => "null",
        }
    }

    /// Check if this value is void.
    pub fn is_void(&self) -> bool {
        matches!(self, Dynamic::Void)
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Dynamic::NullHandle)
    }

    /// The object handle, if this value references a heap object.
    pub fn as_object(&self) -> Option<ObjectHandle> {
        match self {
            Dynamic::Object(handle) => Some(*handle),
            _ => None,
        }
    }
}

impl fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dynamic::Void => write!(f, "Void"),
            Dynamic::Int(v) => write!(f, "Int({})", v),
            Dynamic::Float(v) => write!(f, "Float({})", v),
            Dynamic::Bool(v) => write!(f, "Bool({})", v),
            Dynamic::String(s) => write!(f, "String({:?})", s),
            Dynamic::Object(h) => write!(f, "Object({}@{}:{})", h.index, h.epoch, h.generation),
            Dynamic::NullHandle => write!(f, "NullHandle"),
        }
    }
}
