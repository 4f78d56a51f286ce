//! Paged object heap
//!
//! Objects live in fixed-size slots inside pages. A page is the unit of
//! heap growth and release; it carries its own free list (threaded through
//! the dead slots), links in the global page list, and links in the list
//! of pages that still have at least one free slot.
//!
//! Slot addresses are stable: objects never move, so a slot pointer is a
//! valid identity for the whole lifetime of the object.

use crate::runtime::array::RArray;
use crate::runtime::class::RClass;
use crate::runtime::fiber::RFiber;
use crate::runtime::hash::RHash;
use crate::runtime::object::{Kind, RBasic, RData, RObject, RRange};
use crate::runtime::proc::{REnv, RProc};
use crate::runtime::string::RString;
use crate::state::{RuntimeError, State};
use std::mem;
use std::ptr;

/// Slots per page.
pub const PAGE_SIZE: usize = 1024;

/// A slot on a page's free list. The link is overlaid on the payload, so
/// a free slot reads as "FREE tag plus next pointer".
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RFree {
    pub header: RBasic,
    pub next: *mut RBasic,
}

/// One heap slot, large enough for any object kind.
///
/// All payloads are `#[repr(C)]` with the header first, so every variant
/// can be read through `basic`. The all-zero bit pattern is a valid slot
/// (immediate kind tag, null pointers, unpainted color), which lets
/// allocation clear slots wholesale before retagging them.
#[repr(C)]
#[derive(Clone, Copy)]
pub union RValue {
    pub free: RFree,
    pub basic: RBasic,
    pub object: RObject,
    pub klass: RClass,
    pub string: RString,
    pub array: RArray,
    pub hash: RHash,
    pub range: RRange,
    pub data: RData,
    pub proc_obj: RProc,
    pub env: REnv,
    pub fiber: RFiber,
}

/// A page of slots plus list bookkeeping.
#[repr(C)]
pub struct Page {
    /// Head of this page's free list, null when the page is full
    pub freelist: *mut RBasic,
    /// Global page list
    pub prev: *mut Page,
    pub next: *mut Page,
    /// List of pages with free slots
    pub free_prev: *mut Page,
    pub free_next: *mut Page,
    /// Reserved for a future generational mode
    pub old: bool,
    /// The slots themselves
    pub objects: [RValue; PAGE_SIZE],
}

impl State {
    /// Link a page at the head of the global page list.
    pub(crate) fn link_page(&mut self, page: *mut Page) {
        // SAFETY: `page` is a live page of this state.
        unsafe {
            (*page).next = self.heaps;
            if !self.heaps.is_null() {
                (*self.heaps).prev = page;
            }
        }
        self.heaps = page;
    }

    /// Unlink a page from the global page list, clearing its own links.
    pub(crate) fn unlink_page(&mut self, page: *mut Page) {
        // SAFETY: `page` is a live page of this state.
        unsafe {
            if !(*page).prev.is_null() {
                (*(*page).prev).next = (*page).next;
            }
            if !(*page).next.is_null() {
                (*(*page).next).prev = (*page).prev;
            }
            if self.heaps == page {
                self.heaps = (*page).next;
            }
            (*page).prev = ptr::null_mut();
            (*page).next = ptr::null_mut();
        }
    }

    /// Link a page at the head of the free-pages list.
    pub(crate) fn link_free_page(&mut self, page: *mut Page) {
        // SAFETY: `page` is a live page of this state.
        unsafe {
            (*page).free_next = self.free_heaps;
            if !self.free_heaps.is_null() {
                (*self.free_heaps).free_prev = page;
            }
        }
        self.free_heaps = page;
    }

    /// Unlink a page from the free-pages list, clearing its own links.
    pub(crate) fn unlink_free_page(&mut self, page: *mut Page) {
        // SAFETY: `page` is a live page of this state.
        unsafe {
            if !(*page).free_prev.is_null() {
                (*(*page).free_prev).free_next = (*page).free_next;
            }
            if !(*page).free_next.is_null() {
                (*(*page).free_next).free_prev = (*page).free_prev;
            }
            if self.free_heaps == page {
                self.free_heaps = (*page).free_next;
            }
            (*page).free_prev = ptr::null_mut();
            (*page).free_next = ptr::null_mut();
        }
    }

    /// Allocate one zeroed page, thread its free list, and link it into
    /// both page lists.
    ///
    /// The slots are threaded in reverse scan order: the first slot ends
    /// up at the tail of the free list, the last at the head.
    pub(crate) fn add_page(&mut self) -> Result<(), RuntimeError> {
        let page: *mut Page = self.calloc(1, mem::size_of::<Page>())?.cast();
        // SAFETY: fresh zeroed allocation of page size.
        unsafe {
            let mut prev: *mut RBasic = ptr::null_mut();
            for i in 0..PAGE_SIZE {
                let slot = (*page).objects.as_mut_ptr().add(i);
                let free = slot.cast::<RFree>();
                (*free).header.tt = Kind::Free;
                (*free).next = prev;
                prev = slot.cast::<RBasic>();
            }
            (*page).freelist = prev;
        }
        self.link_page(page);
        self.link_free_page(page);
        Ok(())
    }

    /// Set up the page lists and allocate the first page.
    pub fn init_heap(&mut self) -> Result<(), RuntimeError> {
        self.heaps = ptr::null_mut();
        self.free_heaps = ptr::null_mut();
        self.add_page()
    }

    /// Finalize every live object and release every page.
    ///
    /// Used at shutdown; walks the raw kind tags and ignores colors and
    /// the sweep cursor entirely.
    pub fn free_heap(&mut self) {
        let mut page = self.heaps;
        while !page.is_null() {
            // SAFETY: the global list only contains live pages; each slot
            // header is always readable.
            unsafe {
                let next = (*page).next;
                for i in 0..PAGE_SIZE {
                    let p = (*page).objects.as_mut_ptr().add(i).cast::<RBasic>();
                    if (*p).tt != Kind::Free {
                        self.obj_free(p);
                    }
                }
                self.free(page.cast());
                page = next;
            }
        }
        self.heaps = ptr::null_mut();
        self.free_heaps = ptr::null_mut();
        self.sweeps = ptr::null_mut();
        self.live = 0;
    }

    /// Allocate a heap slot for an object of the given kind.
    ///
    /// When no page has free slots, a full collection runs first and a
    /// fresh page is allocated afterward, so reclamation gets a chance to
    /// supply slots before the heap grows. The new object is zeroed,
    /// tagged, painted white, and pushed onto the arena.
    pub fn obj_alloc(&mut self, tt: Kind, c: *mut RClass) -> Result<*mut RBasic, RuntimeError> {
        debug_assert!(tt != Kind::Free);
        if self.free_heaps.is_null() {
            self.collect();
            self.add_page()?;
        }
        // SAFETY: the free-pages list head has a non-empty free list, and
        // every free-list entry points at a slot of that page.
        unsafe {
            let page = self.free_heaps;
            let p = (*page).freelist;
            debug_assert!(!p.is_null());
            debug_assert!((*p).tt == Kind::Free);
            (*page).freelist = (*p.cast::<RFree>()).next;
            if (*page).freelist.is_null() {
                self.unlink_free_page(page);
            }

            self.live += 1;
            self.protect_ptr(p)?;

            ptr::write(p.cast::<RValue>(), mem::zeroed());
            (*p).tt = tt;
            (*p).c = c;
            (*p).paint_white();
            Ok(p)
        }
    }
}
