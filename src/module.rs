//! Embedded modules.
//!
//! An embedded module is a named factory registered with the [`Host`](crate::Host)
//! before the interpreter starts. The first `import` of the name in a session
//! runs the factory with a [`ModuleBuilder`]; the finished [`Module`] is cached
//! for the rest of the session.
//!
//! ```
//! use holdfast::{CallContext, Dynamic, Host, InitOptions, ModuleBuilder};
//!
//! fn init_math(m: &mut ModuleBuilder<'_>) -> holdfast::Result<()> {
//!     m.def("add", |ctx: &mut CallContext| {
//!         let a: i64 = ctx.arg(0)?;
//!         let b: i64 = ctx.arg(1)?;
//!         ctx.set_return(a + b);
//!         Ok(())
//!     });
//!     Ok(())
//! }
//!
//! let host = Host::new();
//! host.register_embedded_module("math", init_math).unwrap();
//! host.initialize(&InitOptions::new().add_program_dir_to_path(false));
//! let sum = host.with_interpreter(|interp| {
//!     let math = interp.import("math").unwrap();
//!     interp.call_attr(&math, "add", &[Dynamic::Int(1), Dynamic::Int(2)]).unwrap()
//! });
//! assert_eq!(sum, Dynamic::Int(3));
//! host.finalize();
//! ```

use rustc_hash::FxHashMap;
use tracing::debug;

use holdfast_core::{Dynamic, Native, NativeError, Result, TypeHash};
use holdfast_registry::ClassBuilder;

use crate::call::{CallContext, Function, NativeFn};
use crate::convert::Outbound;
use crate::interpreter::Interpreter;

/// Initializer run on first import of an embedded module.
pub type ModuleFactory = fn(&mut ModuleBuilder<'_>) -> Result<()>;

/// Entry of the embedded-module table.
#[derive(Debug, Clone)]
pub struct EmbeddedModule {
    name: String,
    factory: ModuleFactory,
}

impl EmbeddedModule {
    pub fn new(name: impl Into<String>, factory: ModuleFactory) -> Self {
        Self {
            name: name.into(),
            factory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn factory(&self) -> ModuleFactory {
        self.factory
    }
}

/// An initialized module. Its attributes own one reference each.
#[derive(Debug)]
pub struct Module {
    name: String,
    attrs: FxHashMap<String, Dynamic>,
    classes: Vec<TypeHash>,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&Dynamic> {
        self.attrs.get(name)
    }

    pub fn attr_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }

    /// Types registered by the module's factory.
    pub fn classes(&self) -> &[TypeHash] {
        &self.classes
    }
}

/// Populates a module while its factory runs.
pub struct ModuleBuilder<'a> {
    name: String,
    attrs: FxHashMap<String, Dynamic>,
    classes: Vec<TypeHash>,
    interpreter: &'a mut Interpreter,
}

impl<'a> ModuleBuilder<'a> {
    pub(crate) fn new(name: &str, interpreter: &'a mut Interpreter) -> Self {
        Self {
            name: name.to_string(),
            attrs: FxHashMap::default(),
            classes: Vec::new(),
            interpreter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        self.interpreter
    }

    /// Expose a native function.
    pub fn def<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut CallContext) -> std::result::Result<(), NativeError> + Send + Sync + 'static,
    {
        let qualified = format!("{}.{}", self.name, name);
        let native = NativeFn::new(TypeHash::from_name(&qualified), f);
        let handle = self.interpreter.heap_mut().allocate(Function::new(qualified, native));
        self.set_attr(name, Dynamic::Object(handle));
        self
    }

    /// Register a native type in the session's registry.
    pub fn add_class<T: Native>(&mut self, builder: ClassBuilder<T>) -> Result<&mut Self> {
        let hash = self.interpreter.register_class(builder)?;
        self.classes.push(hash);
        Ok(self)
    }

    /// Register a composite type built from native layers.
    pub fn add_composite(&mut self, name: &'static str, layers: &[TypeHash]) -> Result<&mut Self> {
        let hash = self.interpreter.register_composite(name, layers)?;
        self.classes.push(hash);
        Ok(self)
    }

    /// Expose a native object.
    pub fn add_object<T: Native>(&mut self, name: &str, value: Outbound<T>) -> Result<&mut Self> {
        let object = self.interpreter.cast(value)?;
        self.set_attr(name, object);
        Ok(self)
    }

    /// Expose a plain value. An object handle passed here transfers its reference.
    pub fn add_value(&mut self, name: &str, value: Dynamic) -> &mut Self {
        self.set_attr(name, value);
        self
    }

    fn set_attr(&mut self, name: &str, value: Dynamic) {
        if let Some(previous) = self.attrs.insert(name.to_string(), value) {
            let _ = self.interpreter.release(&previous);
        }
    }

    pub(crate) fn finish(self) -> Module {
        debug!(module = %self.name, attrs = self.attrs.len(), "module initialized");
        Module {
            name: self.name,
            attrs: self.attrs,
            classes: self.classes,
        }
    }

    /// Drop everything the factory created so far.
    pub(crate) fn discard(self) {
        for value in self.attrs.values() {
            let _ = self.interpreter.release(value);
        }
    }
}
