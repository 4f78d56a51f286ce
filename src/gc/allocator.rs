//! Allocator wrapper
//!
//! Every byte of runtime memory flows through one reallocation primitive
//! backed by a host-supplied allocation function. When the host returns
//! null for a positive-sized request and the heap is up, the wrapper runs
//! a full collection and retries once; a second failure raises the
//! out-of-memory error and leaves a sticky flag set so the embedder can
//! tell a repeat failure apart.
//!
//! Block layout:
//! ```text
//! +--------------+-----------------------+
//! | size: usize  |  payload (size bytes) |
//! +--------------+-----------------------+
//!                ^ pointer handed out
//! ```
//!
//! The one-word header records the payload size, so `realloc` and `free`
//! can recover the old layout without the caller carrying it around.

use crate::state::{RuntimeError, State};
use std::alloc::{alloc, dealloc, realloc, Layout};
use std::ptr;

/// Host allocation function.
///
/// The contract mirrors C `realloc`: a null `ptr` allocates, a zero
/// `new_size` frees and returns null, anything else resizes. `old_size`
/// is the exact size of the existing block (zero for a null `ptr`), and
/// `ud` is the user-data pointer registered with the state.
pub type AllocFn = fn(ptr: *mut u8, old_size: usize, new_size: usize, ud: *mut ()) -> *mut u8;

/// Alignment of every wrapper block, header included.
pub const MEM_ALIGN: usize = 8;

/// Size of the block header.
const BLOCK_HEADER: usize = MEM_ALIGN;

/// Default host allocation function on top of the global allocator.
pub fn default_allocf(ptr: *mut u8, old_size: usize, new_size: usize, _ud: *mut ()) -> *mut u8 {
    // SAFETY: sizes are the exact values this module allocated with, and
    // the alignment is constant.
    unsafe {
        if new_size == 0 {
            if !ptr.is_null() {
                let layout = Layout::from_size_align_unchecked(old_size, MEM_ALIGN);
                dealloc(ptr, layout);
            }
            ptr::null_mut()
        } else if ptr.is_null() {
            let layout = Layout::from_size_align_unchecked(new_size, MEM_ALIGN);
            alloc(layout)
        } else {
            let layout = Layout::from_size_align_unchecked(old_size, MEM_ALIGN);
            realloc(ptr, layout, new_size)
        }
    }
}

/// Recover the block base and total size from a payload pointer.
///
/// # Safety
/// `p` must be a payload pointer previously returned by this wrapper.
unsafe fn block_base(p: *mut u8) -> (*mut u8, usize) {
    let base = p.sub(BLOCK_HEADER);
    let len = base.cast::<usize>().read();
    (base, len + BLOCK_HEADER)
}

impl State {
    /// Allocate `len` bytes.
    pub fn malloc(&mut self, len: usize) -> Result<*mut u8, RuntimeError> {
        self.realloc(ptr::null_mut(), len)
    }

    /// Resize a block to `len` bytes.
    ///
    /// A null `p` allocates; `len == 0` frees and returns null. On host
    /// failure the wrapper collects and retries once before raising.
    pub fn realloc(&mut self, p: *mut u8, len: usize) -> Result<*mut u8, RuntimeError> {
        let (base, old_total) = if p.is_null() {
            (ptr::null_mut(), 0)
        } else {
            // SAFETY: non-null payload pointers come from this wrapper.
            unsafe { block_base(p) }
        };
        let new_total = if len == 0 { 0 } else { len + BLOCK_HEADER };

        let mut p2 = (self.allocf)(base, old_total, new_total, self.allocf_ud);

        if p2.is_null() && len > 0 && !self.heaps.is_null() {
            self.collect();
            p2 = (self.allocf)(base, old_total, new_total, self.allocf_ud);
        }

        if p2.is_null() && len > 0 {
            // A failure with the flag already set means the last raise did
            // not free enough to recover; the embedder decides whether
            // that is fatal.
            self.out_of_memory = true;
            return Err(RuntimeError::OutOfMemory);
        }
        self.out_of_memory = false;

        if p2.is_null() {
            return Ok(ptr::null_mut());
        }
        // SAFETY: the host returned a block of `new_total` bytes.
        unsafe {
            p2.cast::<usize>().write(len);
            Ok(p2.add(BLOCK_HEADER))
        }
    }

    /// Allocate a zeroed array of `nelem` items of `len` bytes each.
    ///
    /// Returns null without allocating when `nelem * len` overflows.
    pub fn calloc(&mut self, nelem: usize, len: usize) -> Result<*mut u8, RuntimeError> {
        match nelem.checked_mul(len) {
            Some(size) => {
                let p = self.realloc(ptr::null_mut(), size)?;
                if !p.is_null() {
                    // SAFETY: `p` has room for `size` bytes.
                    unsafe { ptr::write_bytes(p, 0, size) };
                }
                Ok(p)
            }
            None => Ok(ptr::null_mut()),
        }
    }

    /// Release a block. Null pointers are fine.
    pub fn free(&mut self, p: *mut u8) {
        if p.is_null() {
            return;
        }
        // SAFETY: non-null payload pointers come from this wrapper.
        let (base, old_total) = unsafe { block_base(p) };
        (self.allocf)(base, old_total, 0, self.allocf_ud);
    }
}
