//! minirb - a minimalist Ruby-flavored runtime core for embedded systems
//!
//! This crate is the memory-management heart of a small dynamic-language
//! runtime: a paged object heap with fixed-size slots, a stop-the-world
//! mark-and-sweep collector, an arena of temporary roots for host code,
//! and an allocator wrapper that collects and retries on out-of-memory.
//!
//! # Features
//! - Fixed-size object slots in pages of 1024, addresses stable for life
//! - Per-page free lists threaded through the dead slots themselves
//! - Type-dispatched tracing over the full object model (classes,
//!   strings, arrays, hashes, ranges, procs, environments, fibers,
//!   foreign data)
//! - Injectable host allocation function with collection-and-retry on
//!   failure
//! - Arena save/restore discipline for rooting fresh objects from host
//!   code
//!
//! # Example
//! ```
//! use minirb::{State, Value};
//!
//! let mut state = State::open().unwrap();
//! let greeting = state.str_new(b"hello heap").unwrap();
//! state.protect(Value::obj(greeting)).unwrap();
//! state.collect();
//! unsafe { assert_eq!(state.str_as_bytes(greeting), b"hello heap") };
//! ```

pub mod gc;
pub mod runtime;
pub mod state;
pub mod value;

pub use gc::{AllocFn, GcPhase, GcStats, ARENA_SIZE, PAGE_SIZE, STEP_SIZE};
pub use runtime::object::Kind;
pub use state::{RuntimeError, State};
pub use value::{Symbol, Value};
