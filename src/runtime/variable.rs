//! Instance-variable and global-variable tables
//!
//! Tables are flat `{entries, len, capa}` arrays keyed by symbol, grown
//! through the state's allocator so every byte of the runtime comes from
//! the host allocation function. Lookup is a linear scan; these tables
//! stay small in practice and the dense layout keeps marking cheap.

use crate::state::{RuntimeError, State};
use crate::value::{Symbol, Value};
use std::mem;
use std::ptr;

const IV_INITIAL_CAPA: usize = 4;

/// One table entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IvEntry {
    pub sym: Symbol,
    pub val: Value,
}

/// Symbol-keyed value table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IvTable {
    pub entries: *mut IvEntry,
    pub len: usize,
    pub capa: usize,
}

impl IvTable {
    pub const fn new() -> Self {
        IvTable {
            entries: ptr::null_mut(),
            len: 0,
            capa: 0,
        }
    }
}

impl Default for IvTable {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Allocate an empty table.
    pub(crate) fn iv_new(&mut self) -> Result<*mut IvTable, RuntimeError> {
        let t: *mut IvTable = self.malloc(mem::size_of::<IvTable>())?.cast();
        // SAFETY: fresh allocation of table size.
        unsafe { t.write(IvTable::new()) };
        Ok(t)
    }

    /// Insert or update an entry.
    ///
    /// # Safety
    /// `t` must point to a live table owned by this state.
    pub(crate) unsafe fn iv_put(
        &mut self,
        t: *mut IvTable,
        sym: Symbol,
        val: Value,
    ) -> Result<(), RuntimeError> {
        for i in 0..(*t).len {
            let e = (*t).entries.add(i);
            if (*e).sym == sym {
                (*e).val = val;
                return Ok(());
            }
        }
        if (*t).len == (*t).capa {
            let capa = if (*t).capa == 0 {
                IV_INITIAL_CAPA
            } else {
                (*t).capa * 2
            };
            // A failing grow may run a collection; the table still reads
            // consistently because len and capa are untouched until the
            // new buffer exists.
            let entries: *mut IvEntry = self
                .realloc((*t).entries.cast(), capa * mem::size_of::<IvEntry>())?
                .cast();
            (*t).entries = entries;
            (*t).capa = capa;
        }
        (*t).entries.add((*t).len).write(IvEntry { sym, val });
        (*t).len += 1;
        Ok(())
    }

    /// Look up an entry.
    ///
    /// # Safety
    /// `t` must point to a live table owned by this state.
    pub(crate) unsafe fn iv_get(&self, t: *const IvTable, sym: Symbol) -> Option<Value> {
        for i in 0..(*t).len {
            let e = (*t).entries.add(i);
            if (*e).sym == sym {
                return Some((*e).val);
            }
        }
        None
    }

    /// Mark every value in the table. Null tables are fine.
    pub(crate) unsafe fn mark_iv(&mut self, t: *const IvTable) {
        if t.is_null() {
            return;
        }
        for i in 0..(*t).len {
            let v = (*(*t).entries.add(i)).val;
            self.mark_value(v);
        }
    }

    /// Release the table and its entry buffer. Null tables are fine.
    pub(crate) unsafe fn free_iv(&mut self, t: *mut IvTable) {
        if t.is_null() {
            return;
        }
        let entries = (*t).entries;
        self.free(entries.cast());
        self.free(t.cast());
    }

    /// Set a global variable.
    pub fn gv_set(&mut self, sym: Symbol, val: Value) -> Result<(), RuntimeError> {
        let t: *mut IvTable = &mut self.globals;
        // SAFETY: the globals table lives inside this state.
        unsafe { self.iv_put(t, sym, val) }
    }

    /// Read a global variable, returning nil when unset.
    pub fn gv_get(&self, sym: Symbol) -> Value {
        let t: *const IvTable = &self.globals;
        // SAFETY: the globals table lives inside this state.
        unsafe { self.iv_get(t, sym).unwrap_or(Value::Nil) }
    }

    /// Mark the global-variable table as part of the root set.
    pub(crate) fn mark_gv(&mut self) {
        let t: *const IvTable = &self.globals;
        // SAFETY: the globals table lives inside this state.
        unsafe { self.mark_iv(t) }
    }

    /// Release the global-variable entry buffer at shutdown.
    pub(crate) fn free_gv(&mut self) {
        let entries = self.globals.entries;
        if !entries.is_null() {
            self.free(entries.cast());
        }
        self.globals = IvTable::new();
    }
}
