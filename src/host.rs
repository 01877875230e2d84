//! The process-level host that owns interpreter sessions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::debug;

use holdfast_core::{BridgeError, Result};

use crate::internals::{InternalsSlot, SessionInternals};
use crate::interpreter::Interpreter;
use crate::module::{EmbeddedModule, ModuleFactory};

static GLOBAL: Host = Host::new();

/// Owner of the embedded-module table and at most one running interpreter.
///
/// Most programs use the process-wide [`Host::global`]. Independent hosts are
/// useful in tests, where each one behaves like a separate process.
///
/// The embedded-module table is fixed while an interpreter is running:
/// registrations are accepted only between sessions.
#[derive(Debug)]
pub struct Host {
    pub(crate) session: Mutex<Option<Interpreter>>,
    pub(crate) running: AtomicBool,
    pub(crate) interpreters_seen: AtomicUsize,
    pub(crate) inittab: RwLock<Vec<EmbeddedModule>>,
    pub(crate) internals: InternalsSlot<SessionInternals>,
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    pub const fn new() -> Self {
        Self {
            session: Mutex::new(None),
            running: AtomicBool::new(false),
            interpreters_seen: AtomicUsize::new(0),
            inittab: RwLock::new(Vec::new()),
            internals: InternalsSlot::new(),
        }
    }

    /// The process-wide host.
    pub fn global() -> &'static Host {
        &GLOBAL
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of interpreters started by this host so far.
    pub fn interpreters_seen(&self) -> usize {
        self.interpreters_seen.load(Ordering::Acquire)
    }

    pub fn embedded_module_names(&self) -> Vec<String> {
        self.inittab
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|module| module.name().to_string())
            .collect()
    }

    /// Slot holding the current session's internals.
    pub fn internals(&self) -> &InternalsSlot<SessionInternals> {
        &self.internals
    }

    /// Add a module to the embedded-module table.
    ///
    /// # Errors
    ///
    /// - `TooLate` while an interpreter is running
    /// - `DuplicateRegistration` if the name is already in the table
    /// - `InsufficientResources` if the table cannot grow
    pub fn register_embedded_module(&self, name: &str, factory: ModuleFactory) -> Result<()> {
        // Initialization takes the read side, so this check cannot race it.
        let mut inittab = self.inittab.write().unwrap_or_else(PoisonError::into_inner);
        if self.is_running() {
            return Err(BridgeError::TooLate {
                module: name.to_string(),
            });
        }
        if inittab.iter().any(|module| module.name() == name) {
            return Err(BridgeError::DuplicateRegistration {
                name: name.to_string(),
                kind: "module",
            });
        }
        inittab
            .try_reserve(1)
            .map_err(|_| BridgeError::InsufficientResources {
                what: format!("embedded module '{name}'"),
            })?;
        inittab.push(EmbeddedModule::new(name, factory));
        debug!(module = name, "embedded module registered");
        Ok(())
    }

    /// Run `f` against the running interpreter.
    ///
    /// The interpreter is locked for the duration of `f`; calling `finalize`
    /// or `with_interpreter` on the same host from inside `f` deadlocks.
    ///
    /// # Panics
    ///
    /// Panics if no interpreter is running.
    pub fn with_interpreter<R>(&self, f: impl FnOnce(&mut Interpreter) -> R) -> R {
        match self.try_with_interpreter(f) {
            Some(result) => result,
            None => panic!("the interpreter is not running"),
        }
    }

    /// Run `f` against the running interpreter, if there is one.
    pub fn try_with_interpreter<R>(&self, f: impl FnOnce(&mut Interpreter) -> R) -> Option<R> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.as_mut().map(f)
    }
}
