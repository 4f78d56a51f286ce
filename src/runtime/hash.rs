//! Hash objects
//!
//! A hash carries an instance-variable table plus a flat key/value entry
//! table. Keys compare by value identity (pointer identity for heap
//! objects). Both tables are traced by the collector and released by the
//! finalizer.

use crate::runtime::object::{Kind, RBasic};
use crate::runtime::variable::IvTable;
use crate::state::{RuntimeError, State};
use crate::value::Value;
use std::mem;
use std::ptr;

const HT_INITIAL_CAPA: usize = 4;

/// Hash object payload.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RHash {
    pub header: RBasic,
    pub iv: *mut IvTable,
    pub ht: *mut HashTable,
}

/// One key/value entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HashEntry {
    pub key: Value,
    pub val: Value,
}

/// Flat key/value table.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HashTable {
    pub entries: *mut HashEntry,
    pub len: usize,
    pub capa: usize,
}

impl State {
    /// Allocate an empty hash.
    pub fn hash_new(&mut self) -> Result<*mut RHash, RuntimeError> {
        let object_class = self.object_class;
        Ok(self.obj_alloc(Kind::Hash, object_class)?.cast())
    }

    /// Insert or update a key.
    ///
    /// # Safety
    /// `h` must point to a live hash slot of this state.
    pub unsafe fn hash_set(
        &mut self,
        h: *mut RHash,
        key: Value,
        val: Value,
    ) -> Result<(), RuntimeError> {
        if (*h).ht.is_null() {
            let t: *mut HashTable = self.malloc(mem::size_of::<HashTable>())?.cast();
            t.write(HashTable {
                entries: ptr::null_mut(),
                len: 0,
                capa: 0,
            });
            (*h).ht = t;
        }
        if let Value::Obj(p) = key {
            self.field_write_barrier(h.cast(), p);
        }
        if let Value::Obj(p) = val {
            self.field_write_barrier(h.cast(), p);
        }
        let t = (*h).ht;
        for i in 0..(*t).len {
            let e = (*t).entries.add(i);
            if (*e).key == key {
                (*e).val = val;
                return Ok(());
            }
        }
        if (*t).len == (*t).capa {
            let capa = if (*t).capa == 0 {
                HT_INITIAL_CAPA
            } else {
                (*t).capa * 2
            };
            let entries: *mut HashEntry = self
                .realloc((*t).entries.cast(), capa * mem::size_of::<HashEntry>())?
                .cast();
            (*t).entries = entries;
            (*t).capa = capa;
        }
        (*t).entries.add((*t).len).write(HashEntry { key, val });
        (*t).len += 1;
        Ok(())
    }

    /// Look a key up, returning nil when absent.
    ///
    /// # Safety
    /// `h` must point to a live hash slot of this state.
    pub unsafe fn hash_get(&self, h: *const RHash, key: Value) -> Value {
        let t = (*h).ht;
        if t.is_null() {
            return Value::Nil;
        }
        for i in 0..(*t).len {
            let e = (*t).entries.add(i);
            if (*e).key == key {
                return (*e).val;
            }
        }
        Value::Nil
    }

    /// Mark every key and value. Null tables are fine.
    pub(crate) unsafe fn mark_hash(&mut self, t: *const HashTable) {
        if t.is_null() {
            return;
        }
        for i in 0..(*t).len {
            let e = *(*t).entries.add(i);
            self.mark_value(e.key);
            self.mark_value(e.val);
        }
    }

    /// Release the table and its entry buffer. Null tables are fine.
    pub(crate) unsafe fn free_hash(&mut self, t: *mut HashTable) {
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
    fn test_set_get_update() {
        let mut s = State::open().unwrap();
        let h = s.hash_new().unwrap();
        unsafe {
            assert!(s.hash_get(h, Value::fixnum(1)).is_nil());
            s.hash_set(h, Value::fixnum(1), Value::symbol(10)).unwrap();
            s.hash_set(h, Value::symbol(2), Value::True).unwrap();
            assert_eq!(s.hash_get(h, Value::fixnum(1)), Value::symbol(10));
            assert_eq!(s.hash_get(h, Value::symbol(2)), Value::True);

            s.hash_set(h, Value::fixnum(1), Value::False).unwrap();
            assert_eq!(s.hash_get(h, Value::fixnum(1)), Value::False);
            assert_eq!((*(*h).ht).len, 2);
        }
    }

    #[test]
    fn test_heap_keys_compare_by_identity() {
        let mut s = State::open().unwrap();
        let h = s.hash_new().unwrap();
        let k1 = s.str_new(b"k").unwrap();
        let k2 = s.str_new(b"k").unwrap();
        unsafe {
            s.hash_set(h, Value::obj(k1), Value::fixnum(1)).unwrap();
            s.hash_set(h, Value::obj(k2), Value::fixnum(2)).unwrap();
            assert_eq!(s.hash_get(h, Value::obj(k1)), Value::fixnum(1));
            assert_eq!(s.hash_get(h, Value::obj(k2)), Value::fixnum(2));
            assert_eq!((*(*h).ht).len, 2);
        }
    }
}
