//! Heap object headers and the basic object kinds
//!
//! Every heap object starts with an [`RBasic`] header: the kind tag, a
//! flags word carrying the GC color bits, and the object's class pointer.
//! Payload structs are `#[repr(C)]` with the header first, so any object
//! pointer can be read as `*mut RBasic`.

use crate::state::{RuntimeError, State};
use crate::value::{Symbol, Value};
use bitflags::bitflags;

use super::variable::IvTable;
use crate::runtime::class::RClass;

/// Object kind tag.
///
/// `False`, `True`, `Fixnum`, `Symbol` and `Float` are immediate kinds:
/// they appear in values but never occupy heap slots. `Free` tags a slot
/// that currently belongs to its page's free list.
///
/// `False` is zero so that zeroed slot memory reads as an immediate kind
/// rather than as a live object.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    False = 0,
    Free,
    True,
    Fixnum,
    Symbol,
    Float,
    Object,
    Class,
    Module,
    IClass,
    SClass,
    Proc,
    Array,
    Hash,
    String,
    Range,
    Data,
    Env,
    Fiber,
}

bitflags! {
    /// Per-object flags word.
    ///
    /// The low bits are the GC color. A zeroed flags word is neither white
    /// nor black: fresh page slots stay unpainted until the first sweep
    /// repaints them white, which is what lets sweep tell a freshly added
    /// page apart from one whose slots all died in an earlier cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u16 {
        /// GC color: not yet reached in the current cycle.
        const WHITE = 1 << 0;
        /// GC color: reached from the root set.
        const BLACK = 1 << 1;
        /// Host-requested forced collection. Sweep finalizes the object
        /// even if it was reached, e.g. while tearing down a fiber.
        const DEAD = 1 << 2;
        /// Array element buffer is shared with other arrays.
        const ARY_SHARED = 1 << 3;
        /// String buffer is shared with other strings.
        const STR_SHARED = 1 << 4;
        /// String buffer is static and must never be freed.
        const STR_NOFREE = 1 << 5;
    }
}

/// Common object header. First field of every heap payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RBasic {
    /// Kind tag
    pub tt: Kind,
    /// Flags word, including the GC color
    pub flags: Flags,
    /// The object's class
    pub c: *mut RClass,
}

impl RBasic {
    /// Check the white color bit
    #[inline]
    pub fn is_white(&self) -> bool {
        self.flags.contains(Flags::WHITE)
    }

    /// Check the black color bit
    #[inline]
    pub fn is_black(&self) -> bool {
        self.flags.contains(Flags::BLACK)
    }

    /// Paint the object white (collection candidate)
    #[inline]
    pub fn paint_white(&mut self) {
        self.flags.remove(Flags::BLACK);
        self.flags.insert(Flags::WHITE);
    }

    /// Paint the object black (reached)
    #[inline]
    pub fn paint_black(&mut self) {
        self.flags.remove(Flags::WHITE);
        self.flags.insert(Flags::BLACK);
    }

    /// Check the host-requested forced-collection bit
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(Flags::DEAD)
    }

    /// Request forced collection of this object at the next sweep
    #[inline]
    pub fn set_dead(&mut self) {
        self.flags.insert(Flags::DEAD);
    }
}

/// Plain object: instance variables only.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RObject {
    pub header: RBasic,
    /// Instance-variable table, created lazily on first write
    pub iv: *mut IvTable,
}

/// Free hook for foreign data wrapped in an [`RData`].
pub type DataFree = fn(&mut State, *mut u8);

/// Type descriptor for foreign data objects.
pub struct DataType {
    pub name: &'static str,
    /// Called with the opaque data pointer when the object is finalized
    pub dfree: Option<DataFree>,
}

/// Foreign (host-owned) data wrapped as an object.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RData {
    pub header: RBasic,
    /// Same offset as `RObject::iv`; the collector traces both through it
    pub iv: *mut IvTable,
    pub ty: *const DataType,
    pub data: *mut u8,
}

/// Range endpoints, allocated separately from the slot.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RangeEdges {
    pub beg: Value,
    pub end: Value,
}

/// Range object.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RRange {
    pub header: RBasic,
    pub edges: *mut RangeEdges,
    pub excl: bool,
}

impl State {
    /// Allocate a plain object of the given class.
    pub fn obj_new(&mut self, c: *mut RClass) -> Result<*mut RObject, RuntimeError> {
        Ok(self.obj_alloc(Kind::Object, c)?.cast())
    }

    /// Wrap foreign data in a heap object.
    ///
    /// The `dfree` hook of `ty`, if any, runs when the object is finalized.
    pub fn data_new(
        &mut self,
        data: *mut u8,
        ty: *const DataType,
    ) -> Result<*mut RData, RuntimeError> {
        let object_class = self.object_class;
        let d: *mut RData = self.obj_alloc(Kind::Data, object_class)?.cast();
        // SAFETY: freshly allocated slot of the requested kind.
        unsafe {
            (*d).ty = ty;
            (*d).data = data;
        }
        Ok(d)
    }

    /// Allocate a range over the given endpoints.
    pub fn range_new(
        &mut self,
        beg: Value,
        end: Value,
        excl: bool,
    ) -> Result<*mut RRange, RuntimeError> {
        let object_class = self.object_class;
        let r: *mut RRange = self.obj_alloc(Kind::Range, object_class)?.cast();
        // The edges allocation may trigger a collection; the range itself
        // is protected by the arena and its edges pointer is still null.
        let edges: *mut RangeEdges = self.malloc(std::mem::size_of::<RangeEdges>())?.cast();
        // SAFETY: `edges` is a fresh allocation of the right size, `r` is a
        // live slot.
        unsafe {
            edges.write(RangeEdges { beg, end });
            (*r).edges = edges;
            (*r).excl = excl;
        }
        Ok(r)
    }

    /// Set an instance variable on an object-like payload.
    ///
    /// # Safety
    /// `obj` must point to a live `Object` or `Data` slot of this state.
    pub unsafe fn obj_iv_set(
        &mut self,
        obj: *mut RObject,
        sym: Symbol,
        val: Value,
    ) -> Result<(), RuntimeError> {
        if (*obj).iv.is_null() {
            (*obj).iv = self.iv_new()?;
        }
        if let Value::Obj(p) = val {
            self.field_write_barrier(obj.cast(), p);
        }
        self.iv_put((*obj).iv, sym, val)
    }

    /// Read an instance variable, returning nil when unset.
    ///
    /// # Safety
    /// `obj` must point to a live `Object` or `Data` slot of this state.
    pub unsafe fn obj_iv_get(&self, obj: *const RObject, sym: Symbol) -> Value {
        if (*obj).iv.is_null() {
            return Value::Nil;
        }
        self.iv_get((*obj).iv, sym).unwrap_or(Value::Nil)
    }
}
