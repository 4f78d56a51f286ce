//! Process-wide runtime state
//!
//! The `State` owns everything the collector touches: the page lists, the
//! arena, the allocation function, and the root set (global variables,
//! the class hierarchy root, the top-level receiver, the exception slot,
//! the root execution context, and the irep registry). The collector
//! never references anything outside of it, so embedding several runtimes
//! side by side just means opening several states.

use crate::gc::allocator::{default_allocf, AllocFn};
use crate::gc::heap::Page;
use crate::gc::{GcPhase, ARENA_SIZE};
use crate::runtime::class::RClass;
use crate::runtime::fiber::ExecContext;
use crate::runtime::irep::Irep;
use crate::runtime::object::{Kind, RBasic};
use crate::runtime::variable::IvTable;
use std::fmt;
use std::ptr;

/// Errors the runtime core can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// The host allocator failed even after a collection retry
    OutOfMemory,
    /// The arena of temporary roots is full
    ArenaOverflow,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::OutOfMemory => write!(f, "Out of memory"),
            RuntimeError::ArenaOverflow => write!(f, "arena overflow error"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The runtime state.
///
/// Not thread-safe: a state belongs to one thread at a time, and every
/// collection runs with exclusive access to it.
pub struct State {
    /// Host allocation function
    pub allocf: AllocFn,
    /// User data handed to every `allocf` call
    pub allocf_ud: *mut (),

    /// Global page list
    pub heaps: *mut Page,
    /// Pages with at least one free slot
    pub free_heaps: *mut Page,
    /// Sweep cursor
    pub sweeps: *mut Page,

    /// Objects currently occupying heap slots
    pub live: usize,
    /// Live count recorded when the last mark phase finished
    pub live_after_mark: usize,
    /// Full collections run so far
    pub gc_count: usize,
    /// Phase of the collection in progress, if any
    pub gc_state: GcPhase,
    /// When set, `collect` returns immediately and the heap grows instead
    pub gc_disabled: bool,
    /// Sticky flag: the last allocation failed even after collecting
    pub out_of_memory: bool,

    /// Temporary roots protecting not-yet-stored objects
    pub arena: [*mut RBasic; ARENA_SIZE],
    /// Arena stack pointer
    pub arena_idx: usize,

    /// Global variables
    pub globals: IvTable,
    /// Root of the class hierarchy
    pub object_class: *mut RClass,
    /// Top-level receiver
    pub top_self: *mut RBasic,
    /// Currently raised exception, if any
    pub exc: *mut RBasic,
    /// Root execution context
    pub root_c: *mut ExecContext,
    /// Compiled method bodies; each pool is part of the root set
    pub ireps: Vec<Option<Irep>>,
}

impl State {
    /// Open a state backed by the global allocator.
    pub fn open() -> Result<State, RuntimeError> {
        Self::open_with_allocf(default_allocf, ptr::null_mut())
    }

    /// Open a state backed by a host allocation function.
    ///
    /// Bootstraps the heap, the root execution context, the class
    /// hierarchy root and the top-level receiver, then empties the arena
    /// so the bootstrap objects survive only as named roots.
    pub fn open_with_allocf(allocf: AllocFn, ud: *mut ()) -> Result<State, RuntimeError> {
        let mut s = State {
            allocf,
            allocf_ud: ud,
            heaps: ptr::null_mut(),
            free_heaps: ptr::null_mut(),
            sweeps: ptr::null_mut(),
            live: 0,
            live_after_mark: 0,
            gc_count: 0,
            gc_state: GcPhase::None,
            gc_disabled: false,
            out_of_memory: false,
            arena: [ptr::null_mut(); ARENA_SIZE],
            arena_idx: 0,
            globals: IvTable::new(),
            object_class: ptr::null_mut(),
            top_self: ptr::null_mut(),
            exc: ptr::null_mut(),
            root_c: ptr::null_mut(),
            ireps: Vec::new(),
        };
        s.init_heap()?;
        s.root_c = s.context_new()?;

        // class hierarchy root; its metaclass is itself at the bottom
        let cls: *mut RClass = s.obj_alloc(Kind::Class, ptr::null_mut())?.cast();
        // SAFETY: freshly allocated class slot.
        unsafe { (*cls).header.c = cls };
        s.object_class = cls;
        s.top_self = s.obj_alloc(Kind::Object, cls)?;

        s.arena_restore(0);
        Ok(s)
    }
}

impl Drop for State {
    fn drop(&mut self) {
        // finalizes every live object, fiber contexts included
        self.free_heap();
        if !self.root_c.is_null() {
            // SAFETY: the root context is owned by this state and no heap
            // object references it anymore.
            unsafe { self.free_context(self.root_c) };
            self.root_c = ptr::null_mut();
        }
        self.free_gv();
    }
}
