//! String objects
//!
//! A string owns its byte buffer unless it is flagged `STR_SHARED` (the
//! buffer belongs to a refcounted [`SharedString`] record) or
//! `STR_NOFREE` (the buffer is static host memory). Finalization follows
//! the flags: decref shared buffers, leave static ones alone, free the
//! rest.

use crate::runtime::object::{Flags, Kind, RBasic};
use crate::state::{RuntimeError, State};
use std::mem;
use std::ptr;
use std::slice;

/// String object payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RString {
    pub header: RBasic,
    pub ptr: *mut u8,
    pub len: usize,
    pub aux: StrAux,
}

/// Either the owned capacity or the shared-buffer record.
#[repr(C)]
#[derive(Clone, Copy)]
pub union StrAux {
    pub capa: usize,
    pub shared: *mut SharedString,
}

/// Refcounted buffer shared between strings.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct SharedString {
    pub refcnt: isize,
    pub ptr: *mut u8,
    pub len: usize,
}

impl State {
    /// Allocate a string with an owned copy of `bytes`.
    pub fn str_new(&mut self, bytes: &[u8]) -> Result<*mut RString, RuntimeError> {
        let object_class = self.object_class;
        let s: *mut RString = self.obj_alloc(Kind::String, object_class)?.cast();
        let len = bytes.len();
        let buf = self.malloc(len)?;
        // SAFETY: `buf` has room for `len` bytes and `s` is a live slot.
        unsafe {
            if len > 0 {
                ptr::copy_nonoverlapping(bytes.as_ptr(), buf, len);
            }
            (*s).ptr = buf;
            (*s).len = len;
            (*s).aux.capa = len;
        }
        Ok(s)
    }

    /// Allocate a string over static host memory. The buffer is never
    /// freed.
    pub fn str_new_static(&mut self, bytes: &'static str) -> Result<*mut RString, RuntimeError> {
        let object_class = self.object_class;
        let s: *mut RString = self.obj_alloc(Kind::String, object_class)?.cast();
        // SAFETY: freshly allocated slot of the requested kind.
        unsafe {
            (*s).ptr = bytes.as_ptr() as *mut u8;
            (*s).len = bytes.len();
            (*s).aux.capa = 0;
            (*s).header.flags.insert(Flags::STR_NOFREE);
        }
        Ok(s)
    }

    /// Duplicate a string, sharing its buffer.
    ///
    /// Both strings end up pointing at a refcounted shared record; static
    /// buffers are simply aliased.
    ///
    /// # Safety
    /// `orig` must point to a live string slot of this state and must stay
    /// reachable across this call.
    pub unsafe fn str_dup(&mut self, orig: *mut RString) -> Result<*mut RString, RuntimeError> {
        let object_class = self.object_class;
        let d: *mut RString = self.obj_alloc(Kind::String, object_class)?.cast();
        if (*orig).header.flags.contains(Flags::STR_NOFREE) {
            (*d).ptr = (*orig).ptr;
            (*d).len = (*orig).len;
            (*d).aux.capa = 0;
            (*d).header.flags.insert(Flags::STR_NOFREE);
            return Ok(d);
        }
        self.str_make_shared(orig)?;
        let sh = (*orig).aux.shared;
        (*sh).refcnt += 1;
        (*d).ptr = (*sh).ptr;
        (*d).len = (*sh).len;
        (*d).aux.shared = sh;
        (*d).header.flags.insert(Flags::STR_SHARED);
        Ok(d)
    }

    /// Move an owned buffer behind a shared record.
    unsafe fn str_make_shared(&mut self, s: *mut RString) -> Result<(), RuntimeError> {
        if (*s).header.flags.contains(Flags::STR_SHARED) {
            return Ok(());
        }
        let sh: *mut SharedString = self.malloc(mem::size_of::<SharedString>())?.cast();
        sh.write(SharedString {
            refcnt: 1,
            ptr: (*s).ptr,
            len: (*s).len,
        });
        (*s).aux.shared = sh;
        (*s).header.flags.insert(Flags::STR_SHARED);
        Ok(())
    }

    /// View the string content as a byte slice.
    ///
    /// # Safety
    /// `s` must point to a live string slot of this state, and the slice
    /// must not outlive the string.
    pub unsafe fn str_as_bytes(&self, s: *const RString) -> &[u8] {
        if (*s).len == 0 {
            return &[];
        }
        slice::from_raw_parts((*s).ptr, (*s).len)
    }

    /// Finalize a string: release or unshare its buffer per the flags.
    pub(crate) unsafe fn free_str(&mut self, s: *mut RString) {
        let flags = (*s).header.flags;
        if flags.contains(Flags::STR_SHARED) {
            self.str_decref((*s).aux.shared);
        } else if !flags.contains(Flags::STR_NOFREE) {
            self.free((*s).ptr);
        }
    }

    /// Drop one reference to a shared buffer, releasing it on zero.
    pub(crate) unsafe fn str_decref(&mut self, sh: *mut SharedString) {
        (*sh).refcnt -= 1;
        if (*sh).refcnt == 0 {
            self.free((*sh).ptr);
            self.free(sh.cast());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_new_copies_bytes() {
        let mut s = State::open().unwrap();
        let a = s.str_new(b"hello").unwrap();
        unsafe {
            assert_eq!(s.str_as_bytes(a), b"hello");
            assert_eq!((*a).len, 5);
            assert!(!(*a).header.flags.contains(Flags::STR_SHARED));
        }
    }

    #[test]
    fn test_empty_string_has_no_buffer() {
        let mut s = State::open().unwrap();
        let a = s.str_new(b"").unwrap();
        unsafe {
            assert_eq!(s.str_as_bytes(a), b"");
            assert!((*a).ptr.is_null());
        }
    }

    #[test]
    fn test_str_dup_shares_buffer() {
        let mut s = State::open().unwrap();
        let a = s.str_new(b"shared body").unwrap();
        let b = unsafe { s.str_dup(a).unwrap() };
        unsafe {
            assert_eq!((*a).ptr, (*b).ptr);
            assert!((*a).header.flags.contains(Flags::STR_SHARED));
            assert!((*b).header.flags.contains(Flags::STR_SHARED));
            assert_eq!((*(*a).aux.shared).refcnt, 2);
            assert_eq!(s.str_as_bytes(b), b"shared body");
        }
    }

    #[test]
    fn test_static_string_dup_aliases() {
        let mut s = State::open().unwrap();
        let a = s.str_new_static("static data").unwrap();
        let b = unsafe { s.str_dup(a).unwrap() };
        unsafe {
            assert_eq!((*a).ptr, (*b).ptr);
            assert!((*b).header.flags.contains(Flags::STR_NOFREE));
            assert!(!(*b).header.flags.contains(Flags::STR_SHARED));
        }
    }
}
