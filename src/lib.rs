//! # holdfast
//!
//! An ownership bridge between native Rust values and an embedded dynamic
//! runtime.
//!
//! Native values cross the boundary in one of several [`ValueCategory`]s
//! (by value, borrowed, exclusively owned, or shared). On the dynamic side
//! each value lives in an [`InstanceRecord`] whose [`OwnershipCell`] remembers
//! who is responsible for destroying it, and refuses conversions that would
//! break that contract instead of corrupting memory.
//!
//! ## Quick start
//!
//! ```
//! use holdfast::{impl_native, ClassBuilder, Host, InitOptions, Outbound};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//! impl_native!(Point => "Point");
//!
//! let host = Host::new();
//! host.initialize(&InitOptions::new());
//! host.with_interpreter(|interp| {
//!     interp.register_class(ClassBuilder::<Point>::new()).unwrap();
//!     let obj = interp.cast(Outbound::value(Point { x: 1, y: 2 })).unwrap();
//!     interp.load_mut::<Point>(&obj).unwrap().x = 10;
//!     assert_eq!(interp.load_value::<Point>(&obj).unwrap(), Point { x: 10, y: 2 });
//!     interp.release(&obj).unwrap();
//! });
//! host.finalize();
//! ```
//!
//! ## Layout
//!
//! - [`holdfast_core`]: cells, records, the error taxonomy, and the dynamic
//!   value model
//! - [`holdfast_registry`]: per-session type metadata and projections
//! - this crate: the interpreter lifecycle, conversions, native calls, and
//!   embedded modules

pub mod call;
pub mod config;
pub mod convert;
pub mod host;
pub mod internals;
pub mod interpreter;
pub mod lifecycle;
pub mod marshal;
pub mod module;

pub use holdfast_core::{
    impl_native, BridgeError, CellKind, ConversionError, Deleter, Dynamic, ExclusiveOwner,
    InstanceFlags, InstanceRecord, Layer, Native, NativeError, NativeObject, ObjectHandle,
    ObjectHeap, OwnershipCell, Result, TypeHash, ValueCategory,
};
pub use holdfast_registry::{
    cache_epoch, cached_entries, invalidate_thread_caches, ClassBuilder, TypeEntry, TypeFlags,
    TypeKind, TypeRegistry,
};

pub use call::{CallContext, Function, NativeCallable, NativeFn};
pub use config::InitOptions;
pub use convert::Outbound;
pub use host::Host;
pub use internals::{InternalsSlot, SessionInternals};
pub use interpreter::{Interpreter, SysState};
pub use lifecycle::{
    finalize_interpreter, initialize_interpreter, with_interpreter, ScopedInterpreter,
    StartupError,
};
pub use marshal::{FromDynamic, IntoDynamic};
pub use module::{EmbeddedModule, Module, ModuleBuilder, ModuleFactory};
