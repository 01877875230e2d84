//! Native callables and their call context.
//!
//! A [`NativeFn`] is what the dynamic runtime sees when it calls into native
//! code. The callable receives a [`CallContext`] that hands out its arguments
//! in whichever value category the native signature declares:
//!
//! ```ignore
//! let n: i64 = ctx.arg(0)?;              // primitive
//! let w: &Widget = ctx.arg_ref(1)?;       // &T
//! let w: &mut Widget = ctx.arg_mut(1)?;   // &mut T
//! let w: Box<Widget> = ctx.take_arg(1)?;  // exclusive owner, disowns the record
//! let w: Arc<Widget> = ctx.arg_shared(1)?; // shared owner
//! ```

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use holdfast_core::{Dynamic, ExclusiveOwner, Native, NativeError, TypeHash};

use crate::convert::Outbound;
use crate::interpreter::Interpreter;
use crate::marshal::{FromDynamic, IntoDynamic};

/// Type-erased native function.
///
/// The inner callable is shared, so cloning a `NativeFn` is cheap.
#[derive(Clone)]
pub struct NativeFn {
    /// Identity derived from the function's qualified name
    pub id: TypeHash,
    inner: Arc<dyn NativeCallable + Send + Sync>,
}

impl NativeFn {
    /// Create a new NativeFn from a callable with a specific ID.
    pub fn new<F>(id: TypeHash, f: F) -> Self
    where
        F: NativeCallable + Send + Sync + 'static,
    {
        Self {
            id,
            inner: Arc::new(f),
        }
    }

    /// Call this native function with the given context.
    pub fn call(&self, ctx: &mut CallContext) -> Result<(), NativeError> {
        self.inner.call(ctx)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Trait for callable native functions.
pub trait NativeCallable {
    /// Call this function with the given context.
    fn call(&self, ctx: &mut CallContext) -> Result<(), NativeError>;
}

impl<F> NativeCallable for F
where
    F: Fn(&mut CallContext) -> Result<(), NativeError>,
{
    fn call(&self, ctx: &mut CallContext) -> Result<(), NativeError> {
        (self)(ctx)
    }
}

/// Heap object backing a dynamic-side callable.
#[derive(Debug)]
pub struct Function {
    name: String,
    native: NativeFn,
}

impl Function {
    pub fn new(name: impl Into<String>, native: NativeFn) -> Self {
        Self {
            name: name.into(),
            native,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native(&self) -> &NativeFn {
        &self.native
    }
}

/// Context for one native call.
///
/// Argument slots hold borrowed values: an object handle in a slot does not
/// own a reference. A value placed in the return slot does; the caller
/// receives it.
pub struct CallContext<'a> {
    slots: &'a mut [Dynamic],
    return_slot: &'a mut Dynamic,
    interpreter: &'a mut Interpreter,
}

impl<'a> CallContext<'a> {
    pub fn new(
        slots: &'a mut [Dynamic],
        return_slot: &'a mut Dynamic,
        interpreter: &'a mut Interpreter,
    ) -> Self {
        Self {
            slots,
            return_slot,
            interpreter,
        }
    }

    /// Get the number of arguments.
    pub fn arg_count(&self) -> usize {
        self.slots.len()
    }

    /// Get a raw reference to an argument slot.
    pub fn arg_slot(&self, index: usize) -> Result<&Dynamic, NativeError> {
        self.slots
            .get(index)
            .ok_or(NativeError::ArgumentIndexOutOfBounds {
                index,
                count: self.slots.len(),
            })
    }

    /// Get a mutable reference to an argument slot.
    pub fn arg_slot_mut(&mut self, index: usize) -> Result<&mut Dynamic, NativeError> {
        let count = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(NativeError::ArgumentIndexOutOfBounds { index, count })
    }

    /// Get a primitive argument.
    pub fn arg<T: FromDynamic>(&self, index: usize) -> Result<T, NativeError> {
        let slot = self.arg_slot(index)?;
        T::from_dynamic(slot).map_err(NativeError::Conversion)
    }

    /// Borrow a native argument declared as `&T`.
    pub fn arg_ref<T: Native>(&self, index: usize) -> Result<&T, NativeError> {
        let slot = self.arg_slot(index)?;
        Ok(self.interpreter.load_ref::<T>(slot)?)
    }

    /// Borrow a native argument declared as `&mut T`.
    pub fn arg_mut<T: Native>(&mut self, index: usize) -> Result<&mut T, NativeError> {
        let slot = self.arg_slot(index)?.clone();
        Ok(self.interpreter.load_mut::<T>(&slot)?)
    }

    /// Copy a native argument declared by value.
    pub fn arg_value<T: Native + Clone>(&self, index: usize) -> Result<T, NativeError> {
        let slot = self.arg_slot(index)?;
        Ok(self.interpreter.load_value::<T>(slot)?)
    }

    /// Address of a native argument declared as a read-only pointer.
    pub fn arg_ptr<T: Native>(&self, index: usize) -> Result<NonNull<T>, NativeError> {
        let slot = self.arg_slot(index)?;
        Ok(self.interpreter.load_ptr::<T>(slot)?)
    }

    /// Take a native argument declared as `Box<T>`.
    ///
    /// The argument's record is left disowned.
    pub fn take_arg<T: Native>(&mut self, index: usize) -> Result<Box<T>, NativeError> {
        let slot = self.arg_slot(index)?.clone();
        Ok(self.interpreter.load_exclusive::<T>(&slot)?)
    }

    /// Take a native argument together with the deleter its owner attached.
    ///
    /// The argument's record is left disowned.
    pub fn take_arg_with_deleter<T: Native>(
        &mut self,
        index: usize,
    ) -> Result<ExclusiveOwner<T>, NativeError> {
        let slot = self.arg_slot(index)?.clone();
        Ok(self.interpreter.load_exclusive_with_deleter::<T>(&slot)?)
    }

    /// Share a native argument declared as `Arc<T>`.
    pub fn arg_shared<T: Native>(&mut self, index: usize) -> Result<Arc<T>, NativeError> {
        let slot = self.arg_slot(index)?.clone();
        Ok(self.interpreter.load_shared::<T>(&slot)?)
    }

    /// Set the return value from a raw slot, transferring its reference.
    pub fn set_return_slot(&mut self, slot: Dynamic) {
        *self.return_slot = slot;
    }

    /// Set a primitive return value.
    pub fn set_return<T: IntoDynamic>(&mut self, value: T) {
        *self.return_slot = value.into_dynamic();
    }

    /// Return a native value in the category the signature declares.
    pub fn return_native<T: Native>(&mut self, value: Outbound<T>) -> Result<(), NativeError> {
        let returned = self.interpreter.cast(value)?;
        *self.return_slot = returned;
        Ok(())
    }

    /// Return one of the arguments unchanged.
    pub fn return_arg(&mut self, index: usize) -> Result<(), NativeError> {
        let slot = self.arg_slot(index)?.clone();
        self.interpreter.add_ref(&slot)?;
        *self.return_slot = slot;
        Ok(())
    }

    /// Call a dynamic callable from native code.
    pub fn call(&mut self, callable: &Dynamic, args: &[Dynamic]) -> Result<Dynamic, NativeError> {
        Ok(self.interpreter.call(callable, args)?)
    }

    pub fn interpreter(&self) -> &Interpreter {
        self.interpreter
    }

    pub fn interpreter_mut(&mut self) -> &mut Interpreter {
        self.interpreter
    }
}

impl fmt::Debug for CallContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("arg_count", &self.arg_count())
            .finish_non_exhaustive()
    }
}
