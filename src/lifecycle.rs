//! Starting and stopping interpreter sessions.
//!
//! A session runs from [`Host::initialize`] to [`Host::finalize`]. Sessions
//! may follow one another in the same process; each one gets a fresh
//! [`SessionInternals`] and a new epoch, so handles and registrations never
//! leak from one session into the next.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use thiserror::Error;
use tracing::{error, info, warn};

use holdfast_registry::invalidate_thread_caches;

use crate::config::InitOptions;
use crate::host::Host;
use crate::internals::{InternalsSlot, SessionInternals};
use crate::interpreter::{Interpreter, SysState};

static SESSION_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Errors raised while bringing the runtime up.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A command-line argument contains an interior NUL byte.
    #[error("argv[{index}] contains a NUL byte")]
    ArgvContainsNul { index: usize },

    /// `-X` was the last argument.
    #[error("argument expected for the -X option")]
    MissingXOption,
}

impl Host {
    /// Start the interpreter.
    ///
    /// # Panics
    ///
    /// Panics if an interpreter is already running on this host. A startup
    /// failure is fatal and aborts the process.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn initialize(&self, options: &InitOptions) {
        if let Err(err) = self.try_initialize(options) {
            error!(error = %err, "interpreter startup failed");
            std::process::abort();
        }
    }

    pub(crate) fn try_initialize(&self, options: &InitOptions) -> Result<(), StartupError> {
        let inittab = self.inittab.read().unwrap_or_else(PoisonError::into_inner);
        if self.running.swap(true, Ordering::AcqRel) {
            panic!("the interpreter is already running");
        }

        let sys = match SysState::from_options(options) {
            Ok(sys) => sys,
            Err(err) => {
                self.running.store(false, Ordering::Release);
                return Err(err);
            }
        };

        let seen = self.interpreters_seen.fetch_add(1, Ordering::AcqRel) + 1;
        let epoch = SESSION_EPOCH.fetch_add(1, Ordering::Relaxed);
        let internals = self.internals.get_or_create(|| SessionInternals::new(epoch));
        let interpreter = Interpreter::new(epoch, Arc::clone(&internals), inittab.clone(), sys);

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(interpreter);
        info!(epoch, seen, modules = inittab.len(), "interpreter initialized");
        Ok(())
    }

    /// Stop the interpreter, freeing every object of the session.
    ///
    /// # Panics
    ///
    /// Panics if no interpreter is running.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn finalize(&self) {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(interpreter) = session else {
            panic!("the interpreter is not running");
        };
        self.shut_down(interpreter);
    }

    /// Finalize only if the running session is the one started as `epoch`.
    ///
    /// Returns `false`, leaving any newer session alone, otherwise.
    pub(crate) fn finalize_session(&self, epoch: u64) -> bool {
        let session = {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            if session.as_ref().is_some_and(|interp| interp.epoch() == epoch) {
                session.take()
            } else {
                None
            }
        };
        match session {
            Some(interpreter) => {
                self.shut_down(interpreter);
                true
            }
            None => false,
        }
    }

    fn shut_down(&self, interpreter: Interpreter) {
        let epoch = interpreter.epoch();

        // A later session must not find this one's state through the slot.
        let detached = if self.interpreters_seen() > 1 {
            invalidate_thread_caches();
            self.internals.unref()
        } else {
            None
        };

        let records = interpreter.shutdown();
        if records > 0 {
            warn!(epoch, records, "instance records still alive at finalize were released");
        }

        if let Some(state) = detached {
            InternalsSlot::dispose(state);
        }
        self.internals.destroy();
        self.running.store(false, Ordering::Release);
        info!(epoch, "interpreter finalized");
    }
}

/// Start the process-wide interpreter.
pub fn initialize_interpreter(options: &InitOptions) {
    Host::global().initialize(options);
}

/// Stop the process-wide interpreter.
pub fn finalize_interpreter() {
    Host::global().finalize();
}

/// Run `f` against the process-wide interpreter.
pub fn with_interpreter<R>(f: impl FnOnce(&mut Interpreter) -> R) -> R {
    Host::global().with_interpreter(f)
}

/// Keeps an interpreter running for the guard's lifetime.
///
/// ```
/// use holdfast::{Host, InitOptions, ScopedInterpreter};
///
/// let host = Host::new();
/// {
///     let guard = ScopedInterpreter::new(&host, &InitOptions::new());
///     assert!(guard.host().is_running());
/// }
/// assert!(!host.is_running());
/// ```
#[derive(Debug)]
#[must_use = "the interpreter is finalized when the guard is dropped"]
pub struct ScopedInterpreter<'h> {
    host: &'h Host,
    epoch: u64,
    armed: bool,
}

impl<'h> ScopedInterpreter<'h> {
    /// Initialize `host` and finalize it again on drop.
    pub fn new(host: &'h Host, options: &InitOptions) -> Self {
        host.initialize(options);
        Self::adopt(host)
    }

    /// Take over finalization of the interpreter currently running on `host`.
    ///
    /// The guard only ever finalizes that session: if it ends early and a
    /// new one starts, dropping the guard leaves the new one running.
    ///
    /// # Panics
    ///
    /// Panics if `host` is not running.
    pub fn adopt(host: &'h Host) -> Self {
        let Some(epoch) = host.try_with_interpreter(|interp| interp.epoch()) else {
            panic!("the interpreter is not running");
        };
        Self {
            host,
            epoch,
            armed: true,
        }
    }

    /// Release the guard without finalizing.
    pub fn dismiss(mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Epoch of the session this guard finalizes.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn host(&self) -> &'h Host {
        self.host
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Interpreter) -> R) -> R {
        self.host.with_interpreter(f)
    }
}

impl ScopedInterpreter<'static> {
    /// Guard over the process-wide interpreter.
    pub fn global(options: &InitOptions) -> Self {
        Self::new(Host::global(), options)
    }
}

impl Drop for ScopedInterpreter<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !self.host.finalize_session(self.epoch) {
            warn!(
                epoch = self.epoch,
                "scoped interpreter dropped after its session was already finalized"
            );
        }
    }
}
