//! Error types for the ownership bridge.
//!
//! ## Error Hierarchy
//!
//! ```text
//! BridgeError          - boundary operations (cells, records, registry, lifecycle)
//! └── NativeError      - raised inside native callables
//!     └── ConversionError - primitive marshalling failures
//! ```
//!
//! Every variant carries the type name and, where relevant, the requested
//! value category and the cell state that refused it, so a failure can be
//! diagnosed from the message alone.

use thiserror::Error;

use crate::holder::CellKind;
use crate::ValueCategory;

/// Result alias for boundary operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

fn holder_state(disowned: &bool) -> &'static str {
    if *disowned { "disowned" } else { "unpopulated" }
}

/// Errors raised by boundary-crossing operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Dereferencing a cell that holds nothing.
    #[error("{} cell: cannot load {type_name} as {requested}", holder_state(.disowned))]
    EmptyCell {
        type_name: &'static str,
        requested: ValueCategory,
        /// True when the cell was emptied by handing exclusive ownership out.
        disowned: bool,
    },

    /// The cell's ownership discipline cannot satisfy the requested form.
    #[error("ownership conflict: cannot load {type_name} as {requested} from a {held} cell ({reason})")]
    OwnershipConflict {
        type_name: &'static str,
        requested: ValueCategory,
        held: CellKind,
        reason: &'static str,
    },

    /// Populating a cell (or record layer) that is already populated.
    #[error("invalid transition: cell already holds {type_name} as {held}")]
    InvalidTransition { type_name: &'static str, held: CellKind },

    /// Registering the same native type or module twice in one session.
    #[error("duplicate registration: {name} already registered as {kind}")]
    DuplicateRegistration { name: String, kind: &'static str },

    /// Registering an embedded module after the runtime has started.
    #[error("cannot add embedded module '{module}' after the interpreter has been initialized")]
    TooLate { module: String },

    /// Allocation failure while growing a registration table.
    #[error("insufficient resources while registering {what}")]
    InsufficientResources { what: String },

    /// The stored object is not (and does not project to) the requested type.
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// An instance record has no layer at this position.
    #[error("{type_name} has no layer {index}")]
    NoSuchLayer { type_name: &'static str, index: usize },

    /// The native type has no entry in the current session's registry.
    #[error("type '{type_name}' is not registered in this session")]
    UnregisteredType { type_name: String },

    /// The handle refers to a released object or a finalized session.
    #[error("stale object handle: object at index {index} is gone")]
    StaleHandle { index: u32 },

    /// A dynamic value that should have been an instance record was not.
    #[error("expected an instance, got {actual}")]
    NotAnInstance { actual: &'static str },

    /// No embedded module with this name exists.
    #[error("no module named '{name}'")]
    ModuleNotFound { name: String },

    /// Attribute lookup failed.
    #[error("'{owner}' has no attribute '{name}'")]
    AttributeNotFound { owner: String, name: String },

    /// Calling a dynamic value that is not callable.
    #[error("'{actual}' object is not callable")]
    NotCallable { actual: &'static str },

    /// A native callable failed.
    #[error("native call failed: {0}")]
    Native(NativeError),
}

impl From<NativeError> for BridgeError {
    fn from(err: NativeError) -> Self {
        match err {
            NativeError::Bridge(inner) => *inner,
            other => BridgeError::Native(other),
        }
    }
}

/// Errors that can occur when converting between Rust primitives and dynamic values.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Type mismatch during conversion
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Integer overflow during conversion
    #[error("integer overflow: value {value} does not fit in {target_type}")]
    IntegerOverflow { value: i64, target_type: &'static str },
}

/// Errors that can occur during native function execution.
#[derive(Debug, Error)]
pub enum NativeError {
    /// Error converting arguments or return values
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// A boundary operation failed inside the native function
    #[error(transparent)]
    Bridge(Box<BridgeError>),

    /// Argument index out of bounds
    #[error("argument index {index} out of bounds (function has {count} arguments)")]
    ArgumentIndexOutOfBounds { index: usize, count: usize },

    /// Generic native error
    #[error("native error: {message}")]
    Other { message: String },
}

impl NativeError {
    /// Create a generic native error.
    pub fn other(message: impl Into<String>) -> Self {
        NativeError::Other {
            message: message.into(),
        }
    }
}

impl From<BridgeError> for NativeError {
    fn from(err: BridgeError) -> Self {
        NativeError::Bridge(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cell_messages_distinguish_disowned() {
        let unpopulated = BridgeError::EmptyCell {
            type_name: "Widget",
            requested: ValueCategory::Reference,
            disowned: false,
        };
        let disowned = BridgeError::EmptyCell {
            type_name: "Widget",
            requested: ValueCategory::Reference,
            disowned: true,
        };
        assert!(unpopulated.to_string().starts_with("unpopulated cell"));
        assert!(disowned.to_string().starts_with("disowned cell"));
        assert!(disowned.to_string().contains("Widget"));
    }

    #[test]
    fn conflict_message_names_type_and_form() {
        let err = BridgeError::OwnershipConflict {
            type_name: "Widget",
            requested: ValueCategory::Exclusive,
            held: CellKind::Shared,
            reason: "other owners may exist",
        };
        let msg = err.to_string();
        assert!(msg.contains("Widget"));
        assert!(msg.contains("exclusive owner"));
        assert!(msg.contains("shared-owned"));
    }

    #[test]
    fn too_late_names_module() {
        let err = BridgeError::TooLate {
            module: "example".into(),
        };
        assert!(err.to_string().contains("'example'"));
    }

    #[test]
    fn bridge_error_round_trips_through_native_error() {
        let err: NativeError = BridgeError::StaleHandle { index: 3 }.into();
        let back: BridgeError = err.into();
        assert!(matches!(back, BridgeError::StaleHandle { index: 3 }));
    }

    #[test]
    fn native_error_wraps_other_failures() {
        let back: BridgeError = NativeError::other("boom").into();
        assert!(matches!(back, BridgeError::Native(NativeError::Other { .. })));
        assert!(back.to_string().contains("boom"));
    }

    #[test]
    fn conversion_error_integer_overflow() {
        let err = ConversionError::IntegerOverflow {
            value: 256,
            target_type: "u8",
        };
        assert!(err.to_string().contains("256"));
        assert!(err.to_string().contains("u8"));
    }
}
