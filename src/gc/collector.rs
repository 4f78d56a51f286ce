//! Mark-and-sweep collector
//!
//! Collection is stop-the-world and runs straight through: enumerate the
//! root set, trace reachable objects by type-dispatched child iteration
//! (painting them black), then walk every page finalizing the whites,
//! rebuilding free lists, and releasing pages that are entirely dead.
//! Survivors are repainted white on the way out, so the next cycle starts
//! from a clean slate.
//!
//! The tracer is recursive; cycles terminate on the "already painted"
//! early return, so recursion depth is bounded by the depth of the
//! reachable graph, not its size.

use super::heap::{RFree, PAGE_SIZE};
use super::GcPhase;
use crate::runtime::array::RArray;
use crate::runtime::class::RClass;
use crate::runtime::fiber::{ExecContext, RFiber};
use crate::runtime::hash::RHash;
use crate::runtime::object::{Flags, Kind, RBasic, RData, RObject, RRange};
use crate::runtime::proc::{REnv, RProc};
use crate::state::State;
use crate::value::Value;

impl State {
    /// Run a full collection unless the collector is disabled.
    pub fn collect(&mut self) {
        if self.gc_disabled {
            return;
        }
        self.gc_state = GcPhase::Mark;
        self.mark_roots();
        self.prepare_sweep();
        self.sweep();
        self.gc_state = GcPhase::None;
        self.gc_count += 1;
    }

    /// Enumerate the root set.
    fn mark_roots(&mut self) {
        self.mark_gv();
        // arena
        for i in 0..self.arena_idx {
            let p = self.arena[i];
            // SAFETY: arena entries are live slot pointers.
            unsafe { self.mark(p) };
        }
        // SAFETY: the named roots are live slots or null.
        unsafe {
            self.mark(self.object_class.cast());
            self.mark(self.top_self);
            self.mark(self.exc);
            self.mark_context(self.root_c);
        }
        // irep constant pools
        for i in 0..self.ireps.len() {
            let (pool, len) = match &self.ireps[i] {
                Some(irep) => (irep.pool.as_ptr(), irep.pool.len()),
                None => continue,
            };
            for j in 0..len {
                // SAFETY: marking never touches the irep registry, so the
                // pool buffer stays where it is for the whole loop.
                let v = unsafe { *pool.add(j) };
                self.mark_value(v);
            }
        }
    }

    /// Mark a value if it refers to a heap object.
    pub fn mark_value(&mut self, v: Value) {
        if let Value::Obj(p) = v {
            // SAFETY: heap values refer to live slots.
            unsafe { self.mark(p) };
        }
    }

    /// Recursively mark an object and everything it references.
    ///
    /// # Safety
    /// `obj` must be null or point to a live slot of this state.
    pub unsafe fn mark(&mut self, obj: *mut RBasic) {
        if obj.is_null() {
            return;
        }
        if !(*obj).is_white() {
            return;
        }
        (*obj).paint_black();
        self.mark((*obj).c.cast::<RBasic>());
        match (*obj).tt {
            Kind::IClass => {
                let c = obj.cast::<RClass>();
                self.mark((*c).superclass.cast());
            }
            Kind::Class | Kind::Module | Kind::SClass => {
                let c = obj.cast::<RClass>();
                self.mark_mt((*c).mt);
                self.mark((*c).superclass.cast());
                self.mark_iv((*c).iv);
            }
            Kind::Object | Kind::Data => {
                // iv sits right after the header in both payloads
                self.mark_iv((*obj.cast::<RObject>()).iv);
            }
            Kind::Proc => {
                let p = obj.cast::<RProc>();
                self.mark((*p).env.cast());
                self.mark((*p).target_class.cast());
            }
            Kind::Env => {
                let e = obj.cast::<REnv>();
                if (*e).cioff < 0 {
                    for i in 0..(*e).len {
                        self.mark_value(*(*e).stack.add(i));
                    }
                }
            }
            Kind::Fiber => {
                let f = obj.cast::<RFiber>();
                self.mark_context((*f).cxt);
            }
            Kind::Array => {
                let a = obj.cast::<RArray>();
                for i in 0..(*a).len {
                    self.mark_value(*(*a).ptr.add(i));
                }
            }
            Kind::Hash => {
                let h = obj.cast::<RHash>();
                self.mark_iv((*h).iv);
                self.mark_hash((*h).ht);
            }
            Kind::String => {}
            Kind::Range => {
                let r = obj.cast::<RRange>();
                if !(*r).edges.is_null() {
                    self.mark_value((*(*r).edges).beg);
                    self.mark_value((*(*r).edges).end);
                }
            }
            _ => {}
        }
    }

    /// Mark everything a live execution context can reach: the live
    /// window of the value stack, the ensure stack, every active call
    /// frame, and the fiber of the context we were resumed from.
    pub(crate) unsafe fn mark_context(&mut self, c: *mut ExecContext) {
        if c.is_null() {
            return;
        }
        // live window of the value stack
        let mut e = (*c).stack.offset_from((*c).stbase) as usize;
        if !(*c).ci.is_null() {
            e += (*(*c).ci).nregs;
        }
        let depth = (*c).stend.offset_from((*c).stbase) as usize;
        if e > depth {
            e = depth;
        }
        for i in 0..e {
            self.mark_value(*(*c).stbase.add(i));
        }
        // ensure stack
        let eidx = if (*c).ci.is_null() { 0 } else { (*(*c).ci).eidx };
        for i in 0..eidx {
            self.mark(*(*c).ensure.add(i));
        }
        // call frames
        if !(*c).ci.is_null() {
            let mut ci = (*c).cibase;
            while ci <= (*c).ci {
                self.mark((*ci).env.cast());
                self.mark((*ci).proc.cast());
                self.mark((*ci).target_class.cast());
                ci = ci.add(1);
            }
        }
        if !(*c).prev.is_null() && !(*(*c).prev).fib.is_null() {
            self.mark((*(*c).prev).fib.cast());
        }
    }

    /// Point the sweep cursor at the first page and snapshot the live
    /// count reached by the mark phase.
    fn prepare_sweep(&mut self) {
        self.gc_state = GcPhase::Sweep;
        self.sweeps = self.heaps;
        self.live_after_mark = self.live;
    }

    /// Walk pages from the sweep cursor, finalizing unreached objects and
    /// returning their slots to the page free lists.
    ///
    /// A page whose slots all died is released, unless every single slot
    /// was freed in this very pass (such a page is kept and its free list
    /// reused). A page that entered the pass full and gained free slots
    /// is relinked into the free-pages list.
    fn sweep(&mut self) {
        let mut page = self.sweeps;
        while !page.is_null() {
            // SAFETY: the sweep cursor only walks live pages; every slot
            // header is readable.
            unsafe {
                let mut freed: usize = 0;
                let mut all_dead = true;
                let full = (*page).freelist.is_null();

                for i in 0..PAGE_SIZE {
                    let p = (*page).objects.as_mut_ptr().add(i).cast::<RBasic>();
                    if (*p).is_white() || (*p).is_dead() {
                        if (*p).tt != Kind::Free {
                            self.obj_free(p);
                            (*p.cast::<RFree>()).next = (*page).freelist;
                            (*page).freelist = p;
                            freed += 1;
                        }
                    } else {
                        (*p).paint_white();
                        all_dead = false;
                    }
                }

                if all_dead && freed < PAGE_SIZE {
                    let next = (*page).next;
                    self.unlink_page(page);
                    self.unlink_free_page(page);
                    self.free(page.cast());
                    page = next;
                } else {
                    if full && freed > 0 {
                        self.link_free_page(page);
                    }
                    page = (*page).next;
                }
                self.live -= freed;
                self.live_after_mark -= freed;
            }
        }
        self.sweeps = page;
    }

    /// Finalize one object: run its kind-specific free hook and tag the
    /// slot FREE. The caller decides where the slot goes afterward.
    pub(crate) unsafe fn obj_free(&mut self, obj: *mut RBasic) {
        match (*obj).tt {
            // immediate kinds never occupy heap slots
            Kind::True | Kind::Fixnum | Kind::Symbol => return,
            // floats are immediate under pointer boxing
            Kind::Float => return,
            Kind::Object => {
                let o = obj.cast::<RObject>();
                self.free_iv((*o).iv);
            }
            Kind::Class | Kind::Module | Kind::SClass => {
                let c = obj.cast::<RClass>();
                self.free_mt((*c).mt);
                self.free_iv((*c).iv);
            }
            Kind::Env => {
                let e = obj.cast::<REnv>();
                if (*e).cioff < 0 {
                    self.free((*e).stack.cast());
                    (*e).stack = std::ptr::null_mut();
                }
            }
            Kind::Fiber => {
                let f = obj.cast::<RFiber>();
                self.free_context((*f).cxt);
            }
            Kind::Array => {
                let a = obj.cast::<RArray>();
                if (*obj).flags.contains(Flags::ARY_SHARED) {
                    self.ary_decref((*a).aux.shared);
                } else {
                    self.free((*a).ptr.cast());
                }
            }
            Kind::Hash => {
                let h = obj.cast::<RHash>();
                self.free_iv((*h).iv);
                self.free_hash((*h).ht);
            }
            Kind::String => {
                self.free_str(obj.cast());
            }
            Kind::Range => {
                let r = obj.cast::<RRange>();
                self.free((*r).edges.cast());
            }
            Kind::Data => {
                let d = obj.cast::<RData>();
                if !(*d).ty.is_null() {
                    if let Some(dfree) = (*(*d).ty).dfree {
                        dfree(self, (*d).data);
                    }
                }
                self.free_iv((*d).iv);
            }
            _ => {}
        }
        (*obj).tt = Kind::Free;
    }

    /// Visit every slot of every page, in page order, FREE slots included.
    pub fn each_object<F: FnMut(*mut RBasic)>(&mut self, mut f: F) {
        let mut page = self.heaps;
        while !page.is_null() {
            // SAFETY: the global list only contains live pages.
            unsafe {
                for i in 0..PAGE_SIZE {
                    f((*page).objects.as_mut_ptr().add(i).cast::<RBasic>());
                }
                page = (*page).next;
            }
        }
    }
}
