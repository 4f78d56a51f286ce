//! Fibers and execution contexts
//!
//! Every fiber owns an execution context: a value stack, a call-info
//! array, and an ensure stack, all allocated through the state's
//! allocator. The root context belongs to the state itself and outlives
//! every fiber. The collector walks the live window of each context's
//! stack plus every active call frame, so anything the interpreter holds
//! in registers stays reachable.

use crate::runtime::class::RClass;
use crate::runtime::object::{Kind, RBasic};
use crate::runtime::proc::{REnv, RProc};
use crate::state::{RuntimeError, State};
use crate::value::Value;
use std::mem;

/// Initial value-stack depth of a context.
pub const STACK_INIT_SIZE: usize = 64;
/// Initial call-info depth of a context.
pub const CALLINFO_INIT_SIZE: usize = 8;
/// Ensure-stack depth of a context.
pub const ENSURE_STACK_SIZE: usize = 8;

/// One call frame.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CallInfo {
    /// Register window size of the running method
    pub nregs: usize,
    /// Active entries on the context's ensure stack
    pub eidx: usize,
    pub env: *mut REnv,
    pub proc: *mut RProc,
    pub target_class: *mut RClass,
}

/// Per-fiber execution context.
#[repr(C)]
pub struct ExecContext {
    /// Bottom of the value stack
    pub stbase: *mut Value,
    /// One past the top of the allocated stack
    pub stend: *mut Value,
    /// Base of the current frame's register window
    pub stack: *mut Value,
    /// Bottom of the call-info array
    pub cibase: *mut CallInfo,
    /// One past the end of the allocated call-info array
    pub ciend: *mut CallInfo,
    /// Current call frame
    pub ci: *mut CallInfo,
    /// Ensure stack (procs registered for cleanup)
    pub ensure: *mut *mut RBasic,
    /// Context we were resumed from
    pub prev: *mut ExecContext,
    /// Owning fiber, null for the root context
    pub fib: *mut RFiber,
}

/// Fiber object payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RFiber {
    pub header: RBasic,
    pub cxt: *mut ExecContext,
}

impl State {
    /// Allocate and wire up a fresh execution context.
    pub fn context_new(&mut self) -> Result<*mut ExecContext, RuntimeError> {
        let c: *mut ExecContext = self.calloc(1, mem::size_of::<ExecContext>())?.cast();
        let stack: *mut Value = self
            .malloc(STACK_INIT_SIZE * mem::size_of::<Value>())?
            .cast();
        let cibase: *mut CallInfo = self
            .calloc(CALLINFO_INIT_SIZE, mem::size_of::<CallInfo>())?
            .cast();
        let ensure: *mut *mut RBasic = self
            .calloc(ENSURE_STACK_SIZE, mem::size_of::<*mut RBasic>())?
            .cast();
        // SAFETY: all four allocations are fresh and correctly sized.
        unsafe {
            for i in 0..STACK_INIT_SIZE {
                stack.add(i).write(Value::Nil);
            }
            (*c).stbase = stack;
            (*c).stend = stack.add(STACK_INIT_SIZE);
            (*c).stack = stack;
            (*c).cibase = cibase;
            (*c).ciend = cibase.add(CALLINFO_INIT_SIZE);
            (*c).ci = cibase;
            (*c).ensure = ensure;
        }
        Ok(c)
    }

    /// Release a context and all its buffers. Null contexts are fine.
    pub(crate) unsafe fn free_context(&mut self, c: *mut ExecContext) {
        if c.is_null() {
            return;
        }
        self.free((*c).stbase.cast());
        self.free((*c).cibase.cast());
        self.free((*c).ensure.cast());
        self.free(c.cast());
    }

    /// Allocate a fiber with its own execution context.
    pub fn fiber_new(&mut self) -> Result<*mut RFiber, RuntimeError> {
        let object_class = self.object_class;
        let f: *mut RFiber = self.obj_alloc(Kind::Fiber, object_class)?.cast();
        // The context allocations may collect; the fiber is protected by
        // the arena and its context pointer is still null, which the
        // tracer tolerates.
        let cxt = self.context_new()?;
        // SAFETY: both allocations are live.
        unsafe {
            (*f).cxt = cxt;
            (*cxt).fib = f;
        }
        Ok(f)
    }

    /// Push a value onto a context's stack, rooting it for the collector.
    ///
    /// # Safety
    /// `c` must point to a live context of this state with stack headroom.
    pub unsafe fn stack_push(&mut self, c: *mut ExecContext, v: Value) {
        debug_assert!((*c).stack < (*c).stend);
        (*c).stack.write(v);
        (*c).stack = (*c).stack.add(1);
    }

    /// Pop the topmost value off a context's stack.
    ///
    /// # Safety
    /// `c` must point to a live context of this state with a non-empty
    /// stack.
    pub unsafe fn stack_pop(&mut self, c: *mut ExecContext) -> Value {
        debug_assert!((*c).stack > (*c).stbase);
        (*c).stack = (*c).stack.sub(1);
        (*c).stack.read()
    }

    /// Enter a new call frame and return it.
    ///
    /// # Safety
    /// `c` must point to a live context of this state with call-info
    /// headroom.
    pub unsafe fn ci_push(&mut self, c: *mut ExecContext) -> *mut CallInfo {
        let ci = (*c).ci.add(1);
        debug_assert!(ci < (*c).ciend);
        ci.write(CallInfo {
            nregs: 0,
            eidx: (*(*c).ci).eidx,
            env: std::ptr::null_mut(),
            proc: std::ptr::null_mut(),
            target_class: std::ptr::null_mut(),
        });
        (*c).ci = ci;
        ci
    }

    /// Leave the current call frame.
    ///
    /// # Safety
    /// `c` must point to a live context of this state with at least one
    /// pushed frame.
    pub unsafe fn ci_pop(&mut self, c: *mut ExecContext) {
        debug_assert!((*c).ci > (*c).cibase);
        (*c).ci = (*c).ci.sub(1);
    }

    /// Register a proc on the context's ensure stack.
    ///
    /// # Safety
    /// `c` and `p` must refer to live data of this state, with ensure
    /// headroom.
    pub unsafe fn ensure_push(&mut self, c: *mut ExecContext, p: *mut RProc) {
        let ci = (*c).ci;
        debug_assert!((*ci).eidx < ENSURE_STACK_SIZE);
        (*c).ensure.add((*ci).eidx).write(p.cast());
        (*ci).eidx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_shape() {
        let s = State::open().unwrap();
        let c = s.root_c;
        unsafe {
            assert_eq!((*c).stack, (*c).stbase);
            assert_eq!((*c).ci, (*c).cibase);
            assert!((*c).fib.is_null());
            assert_eq!(
                (*c).stend.offset_from((*c).stbase) as usize,
                STACK_INIT_SIZE
            );
        }
    }

    #[test]
    fn test_stack_push_pop() {
        let mut s = State::open().unwrap();
        let c = s.root_c;
        unsafe {
            s.stack_push(c, Value::fixnum(1));
            s.stack_push(c, Value::fixnum(2));
            assert_eq!(s.stack_pop(c), Value::fixnum(2));
            assert_eq!(s.stack_pop(c), Value::fixnum(1));
            assert_eq!((*c).stack, (*c).stbase);
        }
    }

    #[test]
    fn test_call_frames() {
        let mut s = State::open().unwrap();
        let c = s.root_c;
        let object_class = s.object_class;
        let p = s.proc_new(0, object_class).unwrap();
        unsafe {
            let ci = s.ci_push(c);
            (*ci).proc = p;
            (*ci).nregs = 4;
            assert_eq!((*c).ci, ci);
            s.ci_pop(c);
            assert_eq!((*c).ci, (*c).cibase);
        }
    }

    #[test]
    fn test_fiber_owns_context() {
        let mut s = State::open().unwrap();
        let f = s.fiber_new().unwrap();
        unsafe {
            assert_eq!((*f).header.tt, Kind::Fiber);
            assert!(!(*f).cxt.is_null());
            assert_eq!((*(*f).cxt).fib, f);
        }
    }
}
