//! Array objects
//!
//! Arrays own a separately allocated element buffer, grown by doubling.
//! Aliased arrays share one refcounted buffer and unshare lazily: the
//! first mutation copies the elements out (`ary_modify`), so sharing is
//! only ever observable to the collector and the finalizer.

use crate::runtime::object::{Flags, Kind, RBasic};
use crate::state::{RuntimeError, State};
use crate::value::Value;
use std::mem;
use std::ptr;

/// Smallest non-empty element buffer.
pub const ARY_DEFAULT_CAPA: usize = 4;

/// Array object payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RArray {
    pub header: RBasic,
    pub ptr: *mut Value,
    pub len: usize,
    pub aux: AryAux,
}

/// Either the owned capacity or the shared-buffer record.
#[repr(C)]
#[derive(Clone, Copy)]
pub union AryAux {
    pub capa: usize,
    pub shared: *mut SharedArray,
}

/// Refcounted element buffer shared between arrays.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SharedArray {
    pub refcnt: isize,
    pub ptr: *mut Value,
    pub len: usize,
}

impl State {
    /// Allocate an empty array.
    pub fn ary_new(&mut self) -> Result<*mut RArray, RuntimeError> {
        self.ary_new_capa(0)
    }

    /// Allocate an array with a preallocated element buffer.
    pub fn ary_new_capa(&mut self, capa: usize) -> Result<*mut RArray, RuntimeError> {
        let object_class = self.object_class;
        let a: *mut RArray = self.obj_alloc(Kind::Array, object_class)?.cast();
        if capa > 0 {
            let buf: *mut Value = self.malloc(capa * mem::size_of::<Value>())?.cast();
            // SAFETY: freshly allocated slot and buffer.
            unsafe {
                (*a).ptr = buf;
                (*a).aux.capa = capa;
            }
        }
        Ok(a)
    }

    /// Append a value, growing the buffer as needed.
    ///
    /// # Safety
    /// `a` must point to a live array slot of this state.
    pub unsafe fn ary_push(&mut self, a: *mut RArray, v: Value) -> Result<(), RuntimeError> {
        self.ary_modify(a)?;
        let len = (*a).len;
        if len == (*a).aux.capa {
            let capa = if (*a).aux.capa == 0 {
                ARY_DEFAULT_CAPA
            } else {
                (*a).aux.capa * 2
            };
            let buf: *mut Value = self
                .realloc((*a).ptr.cast(), capa * mem::size_of::<Value>())?
                .cast();
            (*a).ptr = buf;
            (*a).aux.capa = capa;
        }
        (*a).ptr.add(len).write(v);
        (*a).len = len + 1;
        if let Value::Obj(p) = v {
            self.field_write_barrier(a.cast(), p);
        }
        Ok(())
    }

    /// Read an element, returning nil when out of range.
    ///
    /// # Safety
    /// `a` must point to a live array slot of this state.
    pub unsafe fn ary_ref(&self, a: *const RArray, i: usize) -> Value {
        if i < (*a).len {
            *(*a).ptr.add(i)
        } else {
            Value::Nil
        }
    }

    /// Write an element, extending the array with nil as needed.
    ///
    /// # Safety
    /// `a` must point to a live array slot of this state.
    pub unsafe fn ary_set(&mut self, a: *mut RArray, i: usize, v: Value) -> Result<(), RuntimeError> {
        self.ary_modify(a)?;
        while (*a).len <= i {
            self.ary_push(a, Value::Nil)?;
        }
        (*a).ptr.add(i).write(v);
        if let Value::Obj(p) = v {
            self.field_write_barrier(a.cast(), p);
        }
        Ok(())
    }

    /// Create an alias of `a` sharing its element buffer.
    ///
    /// # Safety
    /// `a` must point to a live array slot of this state and must stay
    /// reachable across this call.
    pub unsafe fn ary_alias(&mut self, a: *mut RArray) -> Result<*mut RArray, RuntimeError> {
        let object_class = self.object_class;
        let d: *mut RArray = self.obj_alloc(Kind::Array, object_class)?.cast();
        let sh = self.ary_make_shared(a)?;
        (*sh).refcnt += 1;
        (*d).ptr = (*sh).ptr;
        (*d).len = (*sh).len;
        (*d).aux.shared = sh;
        (*d).header.flags.insert(Flags::ARY_SHARED);
        Ok(d)
    }

    /// Move the owned buffer of `a` behind a shared record.
    unsafe fn ary_make_shared(&mut self, a: *mut RArray) -> Result<*mut SharedArray, RuntimeError> {
        if (*a).header.flags.contains(Flags::ARY_SHARED) {
            return Ok((*a).aux.shared);
        }
        let sh: *mut SharedArray = self.malloc(mem::size_of::<SharedArray>())?.cast();
        sh.write(SharedArray {
            refcnt: 1,
            ptr: (*a).ptr,
            len: (*a).len,
        });
        (*a).aux.shared = sh;
        (*a).header.flags.insert(Flags::ARY_SHARED);
        Ok(sh)
    }

    /// Copy-on-write unshare before mutation.
    unsafe fn ary_modify(&mut self, a: *mut RArray) -> Result<(), RuntimeError> {
        if !(*a).header.flags.contains(Flags::ARY_SHARED) {
            return Ok(());
        }
        let sh = (*a).aux.shared;
        let len = (*a).len;
        let capa = len.max(ARY_DEFAULT_CAPA);
        let buf: *mut Value = self.malloc(capa * mem::size_of::<Value>())?.cast();
        if len > 0 {
            ptr::copy_nonoverlapping((*a).ptr, buf, len);
        }
        (*a).ptr = buf;
        (*a).aux.capa = capa;
        (*a).header.flags.remove(Flags::ARY_SHARED);
        self.ary_decref(sh);
        Ok(())
    }

    /// Drop one reference to a shared buffer, releasing it on zero.
    pub(crate) unsafe fn ary_decref(&mut self, sh: *mut SharedArray) {
        (*sh).refcnt -= 1;
        if (*sh).refcnt == 0 {
            self.free((*sh).ptr.cast());
            self.free(sh.cast());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_ref() {
        let mut s = State::open().unwrap();
        let a = s.ary_new().unwrap();
        unsafe {
            for i in 0..10 {
                s.ary_push(a, Value::fixnum(i)).unwrap();
            }
            assert_eq!((*a).len, 10);
            assert_eq!(s.ary_ref(a, 0), Value::fixnum(0));
            assert_eq!(s.ary_ref(a, 9), Value::fixnum(9));
            assert!(s.ary_ref(a, 10).is_nil());
        }
    }

    #[test]
    fn test_set_extends_with_nil() {
        let mut s = State::open().unwrap();
        let a = s.ary_new().unwrap();
        unsafe {
            s.ary_set(a, 3, Value::True).unwrap();
            assert_eq!((*a).len, 4);
            assert!(s.ary_ref(a, 0).is_nil());
            assert_eq!(s.ary_ref(a, 3), Value::True);
        }
    }

    #[test]
    fn test_alias_shares_then_mutation_unshares() {
        let mut s = State::open().unwrap();
        let a = s.ary_new().unwrap();
        unsafe {
            s.ary_push(a, Value::fixnum(1)).unwrap();
            s.ary_push(a, Value::fixnum(2)).unwrap();
            let b = s.ary_alias(a).unwrap();
            assert_eq!((*a).ptr, (*b).ptr);
            assert_eq!((*(*a).aux.shared).refcnt, 2);

            // writing through the alias detaches it
            s.ary_push(b, Value::fixnum(3)).unwrap();
            assert!(!(*b).header.flags.contains(Flags::ARY_SHARED));
            assert_ne!((*a).ptr, (*b).ptr);
            assert_eq!((*b).len, 3);
            assert_eq!((*a).len, 2);
            assert!((*a).header.flags.contains(Flags::ARY_SHARED));
            assert_eq!((*(*a).aux.shared).refcnt, 1);
        }
    }
}
