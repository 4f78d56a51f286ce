//! Classes, modules and method tables
//!
//! Class, module and singleton-class objects share the [`RClass`] payload.
//! Include-class wrappers (`Kind::IClass`) also use it, but they borrow
//! the included module's method table instead of owning one, and their
//! class pointer refers back to the module so the module stays reachable
//! through the ancestor chain.

use crate::runtime::object::{Kind, RBasic};
use crate::runtime::proc::RProc;
use crate::runtime::variable::IvTable;
use crate::state::{RuntimeError, State};
use crate::value::Symbol;
use std::mem;
use std::ptr;

const MT_INITIAL_CAPA: usize = 4;

/// Class-like object payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RClass {
    pub header: RBasic,
    /// Method table, created lazily; borrowed (not owned) by IClass
    pub mt: *mut MethodTable,
    /// Instance variables (class variables live here too)
    pub iv: *mut IvTable,
    /// Superclass, or the next entry in an ancestor chain
    pub superclass: *mut RClass,
}

/// One method-table entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MtEntry {
    pub sym: Symbol,
    pub m: *mut RProc,
}

/// Symbol-keyed method table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MethodTable {
    pub entries: *mut MtEntry,
    pub len: usize,
    pub capa: usize,
}

impl State {
    /// Allocate a new class under the given superclass.
    pub fn class_new(&mut self, superclass: *mut RClass) -> Result<*mut RClass, RuntimeError> {
        let object_class = self.object_class;
        let c: *mut RClass = self.obj_alloc(Kind::Class, object_class)?.cast();
        // SAFETY: freshly allocated slot of the requested kind.
        unsafe { (*c).superclass = superclass };
        Ok(c)
    }

    /// Allocate a new module.
    pub fn module_new(&mut self) -> Result<*mut RClass, RuntimeError> {
        let object_class = self.object_class;
        Ok(self.obj_alloc(Kind::Module, object_class)?.cast())
    }

    /// Return the singleton class of `obj`, creating it on first use.
    ///
    /// # Safety
    /// `obj` must point to a live slot of this state.
    pub unsafe fn singleton_class(&mut self, obj: *mut RBasic) -> Result<*mut RClass, RuntimeError> {
        let c = (*obj).c;
        if !c.is_null() && (*c).header.tt == Kind::SClass {
            return Ok(c);
        }
        let object_class = self.object_class;
        let sc: *mut RClass = self.obj_alloc(Kind::SClass, object_class)?.cast();
        (*sc).superclass = c;
        (*obj).c = sc;
        self.write_barrier(obj);
        Ok(sc)
    }

    /// Insert `module` into the ancestor chain of `c` via an include-class
    /// wrapper.
    ///
    /// # Safety
    /// Both pointers must refer to live class-like slots of this state.
    pub unsafe fn include_module(
        &mut self,
        c: *mut RClass,
        module: *mut RClass,
    ) -> Result<(), RuntimeError> {
        self.mt_ensure(module)?;
        let ic: *mut RClass = self.obj_alloc(Kind::IClass, ptr::null_mut())?.cast();
        // The wrapper's class pointer carries the module, which both keeps
        // the module alive and lets ancestor walks recover it.
        (*ic).header.c = module;
        (*ic).mt = (*module).mt;
        (*ic).superclass = (*c).superclass;
        (*c).superclass = ic;
        self.write_barrier(c.cast());
        Ok(())
    }

    /// Define a method on a class or module.
    ///
    /// # Safety
    /// Both pointers must refer to live slots of this state.
    pub unsafe fn define_method(
        &mut self,
        c: *mut RClass,
        sym: Symbol,
        m: *mut RProc,
    ) -> Result<(), RuntimeError> {
        self.mt_ensure(c)?;
        self.field_write_barrier(c.cast(), m.cast());
        let t = (*c).mt;
        for i in 0..(*t).len {
            let e = (*t).entries.add(i);
            if (*e).sym == sym {
                (*e).m = m;
                return Ok(());
            }
        }
        if (*t).len == (*t).capa {
            let capa = if (*t).capa == 0 {
                MT_INITIAL_CAPA
            } else {
                (*t).capa * 2
            };
            let entries: *mut MtEntry = self
                .realloc((*t).entries.cast(), capa * mem::size_of::<MtEntry>())?
                .cast();
            (*t).entries = entries;
            (*t).capa = capa;
        }
        (*t).entries.add((*t).len).write(MtEntry { sym, m });
        (*t).len += 1;
        Ok(())
    }

    /// Create the method table of a class-like object if it is missing.
    unsafe fn mt_ensure(&mut self, c: *mut RClass) -> Result<(), RuntimeError> {
        if !(*c).mt.is_null() {
            return Ok(());
        }
        let t: *mut MethodTable = self.malloc(mem::size_of::<MethodTable>())?.cast();
        t.write(MethodTable {
            entries: ptr::null_mut(),
            len: 0,
            capa: 0,
        });
        (*c).mt = t;
        Ok(())
    }

    /// Walk the ancestor chain looking for a method.
    ///
    /// # Safety
    /// `c` must refer to a live class-like slot of this state.
    pub unsafe fn find_method(&self, c: *const RClass, sym: Symbol) -> *mut RProc {
        let mut c = c;
        while !c.is_null() {
            let t = (*c).mt;
            if !t.is_null() {
                for i in 0..(*t).len {
                    let e = (*t).entries.add(i);
                    if (*e).sym == sym {
                        return (*e).m;
                    }
                }
            }
            c = (*c).superclass;
        }
        ptr::null_mut()
    }

    /// Mark every method in the table. Null tables are fine.
    pub(crate) unsafe fn mark_mt(&mut self, t: *const MethodTable) {
        if t.is_null() {
            return;
        }
        for i in 0..(*t).len {
            let m = (*(*t).entries.add(i)).m;
            self.mark(m.cast());
        }
    }

    /// Release the table and its entry buffer. Null tables are fine.
    pub(crate) unsafe fn free_mt(&mut self, t: *mut MethodTable) {
        if t.is_null() {
            return;
        }
        let entries = (*t).entries;
        self.free(entries.cast());
        self.free(t.cast());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_definition_and_lookup() {
        let mut s = State::open().unwrap();
        let object_class = s.object_class;
        let cls = s.class_new(object_class).unwrap();
        let m = s.proc_new(0, cls).unwrap();
        unsafe {
            s.define_method(cls, Symbol(1), m).unwrap();
            assert_eq!(s.find_method(cls, Symbol(1)), m);
            assert!(s.find_method(cls, Symbol(2)).is_null());
        }
    }

    #[test]
    fn test_lookup_through_superclass() {
        let mut s = State::open().unwrap();
        let object_class = s.object_class;
        let base = s.class_new(object_class).unwrap();
        let derived = s.class_new(base).unwrap();
        let m = s.proc_new(0, base).unwrap();
        unsafe {
            s.define_method(base, Symbol(3), m).unwrap();
            assert_eq!(s.find_method(derived, Symbol(3)), m);
        }
    }

    #[test]
    fn test_included_module_methods_visible() {
        let mut s = State::open().unwrap();
        let object_class = s.object_class;
        let cls = s.class_new(object_class).unwrap();
        let module = s.module_new().unwrap();
        let m = s.proc_new(0, module).unwrap();
        unsafe {
            s.define_method(module, Symbol(4), m).unwrap();
            s.include_module(cls, module).unwrap();
            // the wrapper sits between the class and its old superclass
            let ic = (*cls).superclass;
            assert_eq!((*ic).header.tt, Kind::IClass);
            assert_eq!((*ic).header.c, module);
            assert_eq!(s.find_method(cls, Symbol(4)), m);
        }
    }

    #[test]
    fn test_singleton_class_created_once() {
        let mut s = State::open().unwrap();
        let object_class = s.object_class;
        let obj = s.obj_new(object_class).unwrap();
        unsafe {
            let sc1 = s.singleton_class(obj.cast()).unwrap();
            let sc2 = s.singleton_class(obj.cast()).unwrap();
            assert_eq!(sc1, sc2);
            assert_eq!((*sc1).header.tt, Kind::SClass);
            assert_eq!((*sc1).superclass, object_class);
        }
    }
}
