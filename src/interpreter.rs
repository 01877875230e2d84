//! One interpreter session: object heap, module cache, and system state.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLockReadGuard};

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use holdfast_core::{
    BridgeError, Dynamic, InstanceRecord, Native, NativeError, ObjectHandle, ObjectHeap, Result,
    TypeHash,
};
use holdfast_registry::{ClassBuilder, TypeRegistry};

use crate::call::{CallContext, Function, NativeFn};
use crate::config::InitOptions;
use crate::internals::SessionInternals;
use crate::lifecycle::StartupError;
use crate::module::{EmbeddedModule, Module, ModuleBuilder};

/// Runtime-visible system state derived from [`InitOptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysState {
    argv: Vec<String>,
    path: Vec<String>,
    xoptions: FxHashMap<String, Option<String>>,
    signal_handlers: bool,
}

impl SysState {
    /// Build the session's system state.
    ///
    /// With argument parsing enabled, leading `-X name[=value]` options after
    /// the program name are consumed into [`xoptions`](Self::xoptions) and a
    /// `--` ends option parsing. An empty command line becomes `[""]`.
    ///
    /// # Errors
    ///
    /// `ArgvContainsNul` if an argument cannot be handed to the runtime,
    /// `MissingXOption` if `-X` is the last argument.
    pub fn from_options(options: &InitOptions) -> std::result::Result<Self, StartupError> {
        if let Some(index) = options.argv.iter().position(|arg| arg.contains('\0')) {
            return Err(StartupError::ArgvContainsNul { index });
        }

        let mut xoptions = FxHashMap::default();
        let mut argv = options.argv.clone();
        if argv.is_empty() {
            argv.push(String::new());
        }

        if options.parse_argv {
            let mut next = 1;
            while let Some(arg) = argv.get(next) {
                if arg == "--" {
                    next += 1;
                    break;
                }
                let option = if arg == "-X" {
                    next += 1;
                    argv.get(next).ok_or(StartupError::MissingXOption)?.as_str()
                } else if let Some(option) = arg.strip_prefix("-X") {
                    option
                } else {
                    break;
                };
                let (name, value) = match option.split_once('=') {
                    Some((name, value)) => (name.to_string(), Some(value.to_string())),
                    None => (option.to_string(), None),
                };
                xoptions.insert(name, value);
                next += 1;
            }
            argv.drain(1..next.min(argv.len()));
        }

        let mut path = Vec::new();
        if options.add_program_dir_to_path {
            path.insert(0, program_dir(&argv[0]));
        }

        Ok(Self {
            argv,
            path,
            xoptions,
            signal_handlers: options.install_signal_handlers,
        })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Module search path.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn xoption(&self, name: &str) -> Option<Option<&str>> {
        self.xoptions.get(name).map(Option::as_deref)
    }

    pub fn xoptions(&self) -> &FxHashMap<String, Option<String>> {
        &self.xoptions
    }

    /// Whether the embedding runtime was asked to install signal handlers.
    ///
    /// Only recorded; nothing in the bridge reacts to signals.
    pub fn signal_handlers_installed(&self) -> bool {
        self.signal_handlers
    }
}

/// Absolute directory of an existing program path, or `""`.
///
/// The directory is cut from `program` lexically before it is made absolute,
/// so `"."` and a bare file name both name the working directory.
fn program_dir(program: &str) -> String {
    if program.is_empty() || !Path::new(program).exists() {
        return String::new();
    }
    let dir = lexical_dirname(program);
    let absolute = if dir.is_empty() {
        std::env::current_dir()
    } else {
        std::path::absolute(dir)
    };
    absolute
        .map(|dir| normalize(&dir).to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Everything before the last separator, without trailing separators.
fn lexical_dirname(path: &str) -> &str {
    let Some(split) = path.rfind(std::path::is_separator) else {
        return "";
    };
    let head = &path[..=split];
    match head.trim_end_matches(std::path::is_separator) {
        "" => head,
        trimmed => trimmed,
    }
}

/// Drop `.` and fold `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// A running interpreter session.
///
/// Handed out by [`Host::with_interpreter`](crate::Host::with_interpreter).
/// Objects live in the session's [`ObjectHeap`]; every [`Dynamic::Object`]
/// returned to the caller owns one reference and must be
/// [`release`](Self::release)d, or it is reclaimed when the session ends.
#[derive(Debug)]
pub struct Interpreter {
    epoch: u64,
    heap: ObjectHeap,
    internals: Arc<SessionInternals>,
    inittab: Vec<EmbeddedModule>,
    modules: FxHashMap<String, ObjectHandle>,
    sys: SysState,
}

impl Interpreter {
    pub(crate) fn new(
        epoch: u64,
        internals: Arc<SessionInternals>,
        inittab: Vec<EmbeddedModule>,
        sys: SysState,
    ) -> Self {
        Self {
            epoch,
            heap: ObjectHeap::new(epoch),
            internals,
            inittab,
            modules: FxHashMap::default(),
            sys,
        }
    }

    /// Session number, unique per initialization in this process.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn sys(&self) -> &SysState {
        &self.sys
    }

    pub fn internals(&self) -> &Arc<SessionInternals> {
        &self.internals
    }

    /// Read access to the session's type registry.
    pub fn registry(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        self.internals.registry()
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut ObjectHeap {
        &mut self.heap
    }

    /// Names of the embedded modules available to [`import`](Self::import).
    pub fn embedded_modules(&self) -> impl Iterator<Item = &str> {
        self.inittab.iter().map(EmbeddedModule::name)
    }

    /// Register a native type for this session.
    pub fn register_class<T: Native>(&self, builder: ClassBuilder<T>) -> Result<TypeHash> {
        let hash = self.internals.registry_mut().register(builder)?;
        debug!(type_name = T::type_name(), %hash, "type registered");
        Ok(hash)
    }

    /// Register a composite type whose records carry one cell per layer.
    pub fn register_composite(&self, name: &'static str, layers: &[TypeHash]) -> Result<TypeHash> {
        let hash = self.internals.registry_mut().register_composite(name, layers)?;
        debug!(type_name = name, %hash, layers = layers.len(), "composite type registered");
        Ok(hash)
    }

    /// Import an embedded module, initializing it on first use.
    ///
    /// # Errors
    ///
    /// `ModuleNotFound` if no embedded module has this name, or whatever the
    /// module's factory returns. A failed factory leaves nothing cached.
    /// `StaleHandle` if the cached module object was freed by more releases
    /// than imports; the module's types stay registered, so it is not rebuilt.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn import(&mut self, name: &str) -> Result<Dynamic> {
        if let Some(&handle) = self.modules.get(name) {
            if !self.heap.add_ref(handle) {
                warn!(
                    module = name,
                    index = handle.index,
                    "cached module object was freed by surplus releases"
                );
                return Err(BridgeError::StaleHandle {
                    index: handle.index,
                });
            }
            return Ok(Dynamic::Object(handle));
        }

        let factory = self
            .inittab
            .iter()
            .find(|module| module.name() == name)
            .map(EmbeddedModule::factory)
            .ok_or_else(|| BridgeError::ModuleNotFound {
                name: name.to_string(),
            })?;

        let mut builder = ModuleBuilder::new(name, self);
        if let Err(err) = factory(&mut builder) {
            warn!(module = name, error = %err, "module initialization failed");
            builder.discard();
            return Err(err);
        }
        let module = builder.finish();

        let handle = self.heap.allocate(module);
        self.modules.insert(name.to_string(), handle);
        self.heap.add_ref(handle);
        Ok(Dynamic::Object(handle))
    }

    /// Look up an attribute of a module object.
    pub fn getattr(&mut self, obj: &Dynamic, name: &str) -> Result<Dynamic> {
        let handle = self.live_handle(obj).map_err(|_| BridgeError::AttributeNotFound {
            owner: self.type_name_of(obj).to_string(),
            name: name.to_string(),
        })?;
        let module = self
            .heap
            .get::<Module>(handle)
            .ok_or_else(|| BridgeError::AttributeNotFound {
                owner: self.type_name_of(obj).to_string(),
                name: name.to_string(),
            })?;
        let value = module
            .attr(name)
            .cloned()
            .ok_or_else(|| BridgeError::AttributeNotFound {
                owner: module.name().to_string(),
                name: name.to_string(),
            })?;
        self.add_ref(&value)?;
        Ok(value)
    }

    /// Call a dynamic callable with borrowed arguments.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&mut self, callable: &Dynamic, args: &[Dynamic]) -> Result<Dynamic> {
        let handle = callable.as_object().ok_or(BridgeError::NotCallable {
            actual: callable.type_name(),
        })?;
        if !self.heap.is_live(handle) {
            return Err(BridgeError::StaleHandle {
                index: handle.index,
            });
        }
        let native = self
            .heap
            .get::<Function>(handle)
            .map(|function| function.native().clone())
            .ok_or_else(|| BridgeError::NotCallable {
                actual: self.type_name_of(callable),
            })?;

        trace!(function = %native.id, args = args.len(), "native call");
        let mut slots = args.to_vec();
        let mut ret = Dynamic::Void;
        let outcome = {
            let mut ctx = CallContext::new(&mut slots, &mut ret, self);
            native.call(&mut ctx)
        };
        if let Err(err) = outcome {
            let _ = self.release(&ret);
            return Err(err.into());
        }
        Ok(ret)
    }

    /// Look up `name` on `obj` and call it.
    pub fn call_attr(&mut self, obj: &Dynamic, name: &str, args: &[Dynamic]) -> Result<Dynamic> {
        let callable = self.getattr(obj, name)?;
        let result = self.call(&callable, args);
        self.release(&callable)?;
        result
    }

    /// Wrap a native closure as a dynamic callable.
    pub fn make_function<F>(&mut self, name: &str, f: F) -> Dynamic
    where
        F: Fn(&mut CallContext) -> std::result::Result<(), NativeError> + Send + Sync + 'static,
    {
        let native = NativeFn::new(TypeHash::from_name(name), f);
        Dynamic::Object(self.heap.allocate(Function::new(name, native)))
    }

    /// Take an extra reference to an object. Non-objects are ignored.
    pub fn add_ref(&mut self, value: &Dynamic) -> Result<()> {
        match value.as_object() {
            Some(handle) if !self.heap.add_ref(handle) => Err(BridgeError::StaleHandle {
                index: handle.index,
            }),
            _ => Ok(()),
        }
    }

    /// Drop one reference to an object.
    ///
    /// Returns true if that was the last reference and the object was freed.
    pub fn release(&mut self, value: &Dynamic) -> Result<bool> {
        let Some(handle) = value.as_object() else {
            return Ok(false);
        };
        if !self.heap.is_live(handle) {
            return Err(BridgeError::StaleHandle {
                index: handle.index,
            });
        }
        Ok(self.heap.release(handle))
    }

    pub fn ref_count(&self, value: &Dynamic) -> Option<u32> {
        self.heap.ref_count(value.as_object()?)
    }

    /// True if `value` is a non-object or an object still alive in this session.
    pub fn is_live(&self, value: &Dynamic) -> bool {
        value.as_object().is_none_or(|handle| self.heap.is_live(handle))
    }

    /// Dynamic-side type name of a value.
    pub fn type_name_of(&self, value: &Dynamic) -> &'static str {
        let Some(handle) = value.as_object() else {
            return value.type_name();
        };
        if let Some(record) = self.heap.get::<InstanceRecord>(handle) {
            record.type_name()
        } else if self.heap.get::<Module>(handle).is_some() {
            "module"
        } else if self.heap.get::<Function>(handle).is_some() {
            "function"
        } else {
            "object"
        }
    }

    /// Borrow a module object.
    pub fn module(&self, obj: &Dynamic) -> Option<&Module> {
        self.heap.get::<Module>(obj.as_object()?)
    }

    /// Instance record behind `obj`.
    pub fn record(&self, obj: &Dynamic) -> Result<&InstanceRecord> {
        let handle = self.live_handle(obj)?;
        self.heap
            .get::<InstanceRecord>(handle)
            .ok_or_else(|| BridgeError::NotAnInstance {
                actual: self.type_name_of(obj),
            })
    }

    pub fn record_mut(&mut self, obj: &Dynamic) -> Result<&mut InstanceRecord> {
        let handle = self.live_handle(obj)?;
        let actual = self.type_name_of(obj);
        self.heap
            .get_mut::<InstanceRecord>(handle)
            .ok_or(BridgeError::NotAnInstance { actual })
    }

    /// Instance records still alive in this session.
    pub fn outstanding_instances(&self) -> usize {
        self.heap.count_of::<InstanceRecord>()
    }

    fn live_handle(&self, obj: &Dynamic) -> Result<ObjectHandle> {
        let handle = obj.as_object().ok_or(BridgeError::NotAnInstance {
            actual: obj.type_name(),
        })?;
        if !self.heap.is_live(handle) {
            return Err(BridgeError::StaleHandle {
                index: handle.index,
            });
        }
        Ok(handle)
    }

    /// Tear the session down, freeing every object it still holds.
    ///
    /// Returns the number of instance records that were still alive.
    pub(crate) fn shutdown(mut self) -> usize {
        let records = self.outstanding_instances();
        self.modules.clear();
        let freed = self.heap.clear();
        debug!(epoch = self.epoch, freed, records, "interpreter heap cleared");
        records
    }
}
