//! Procs and environments
//!
//! A proc pairs an irep (its compiled body) with the class it runs against
//! and an optional closed-over environment. Environments come in two
//! forms, told apart by `cioff`: a non-negative offset means the locals
//! still live on a context's value stack (the context owns them), while a
//! negative offset marks a detached environment that owns its own value
//! array.

use crate::runtime::class::RClass;
use crate::runtime::object::{Kind, RBasic};
use crate::state::{RuntimeError, State};
use crate::value::Value;
use std::mem;
use std::ptr;

/// Proc object payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RProc {
    pub header: RBasic,
    /// Index of the compiled body in the state's irep registry
    pub irep: usize,
    pub target_class: *mut RClass,
    pub env: *mut REnv,
}

/// Environment object payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct REnv {
    pub header: RBasic,
    pub stack: *mut Value,
    pub len: usize,
    /// Call-info offset while attached to a context; negative once the
    /// environment has been detached and owns its value array
    pub cioff: isize,
}

impl State {
    /// Allocate a proc for the given irep.
    pub fn proc_new(
        &mut self,
        irep: usize,
        target_class: *mut RClass,
    ) -> Result<*mut RProc, RuntimeError> {
        let object_class = self.object_class;
        let p: *mut RProc = self.obj_alloc(Kind::Proc, object_class)?.cast();
        // SAFETY: freshly allocated slot of the requested kind.
        unsafe {
            (*p).irep = irep;
            (*p).target_class = target_class;
        }
        Ok(p)
    }

    /// Attach a closed-over environment to a proc.
    ///
    /// # Safety
    /// Both pointers must refer to live slots of this state.
    pub unsafe fn proc_set_env(&mut self, p: *mut RProc, env: *mut REnv) {
        (*p).env = env;
        self.field_write_barrier(p.cast(), env.cast());
    }

    /// Allocate a detached environment owning `nlocals` nil slots.
    pub fn env_new(&mut self, nlocals: usize) -> Result<*mut REnv, RuntimeError> {
        let e: *mut REnv = self.obj_alloc(Kind::Env, ptr::null_mut())?.cast();
        let stack: *mut Value = self.malloc(nlocals * mem::size_of::<Value>())?.cast();
        // SAFETY: `stack` has room for `nlocals` values and `e` is a live
        // slot whose stack pointer is still null.
        unsafe {
            for i in 0..nlocals {
                stack.add(i).write(Value::Nil);
            }
            (*e).stack = stack;
            (*e).len = nlocals;
            (*e).cioff = -1;
        }
        Ok(e)
    }

    /// Read a local out of an environment.
    ///
    /// # Safety
    /// `e` must point to a live environment slot of this state.
    pub unsafe fn env_get(&self, e: *const REnv, i: usize) -> Value {
        debug_assert!(i < (*e).len);
        *(*e).stack.add(i)
    }

    /// Write a local into an environment.
    ///
    /// # Safety
    /// `e` must point to a live environment slot of this state.
    pub unsafe fn env_set(&mut self, e: *mut REnv, i: usize, v: Value) {
        debug_assert!(i < (*e).len);
        (*e).stack.add(i).write(v);
        if let Value::Obj(p) = v {
            self.field_write_barrier(e.cast(), p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_owns_nil_locals() {
        let mut s = State::open().unwrap();
        let e = s.env_new(4).unwrap();
        unsafe {
            assert_eq!((*e).len, 4);
            assert!((*e).cioff < 0);
            for i in 0..4 {
                assert!(s.env_get(e, i).is_nil());
            }
            s.env_set(e, 2, Value::fixnum(7));
            assert_eq!(s.env_get(e, 2), Value::fixnum(7));
        }
    }

    #[test]
    fn test_proc_closure_wiring() {
        let mut s = State::open().unwrap();
        let object_class = s.object_class;
        let e = s.env_new(1).unwrap();
        let p = s.proc_new(3, object_class).unwrap();
        unsafe {
            s.proc_set_env(p, e);
            assert_eq!((*p).env, e);
            assert_eq!((*p).irep, 3);
            assert_eq!((*p).target_class, object_class);
        }
    }
}
