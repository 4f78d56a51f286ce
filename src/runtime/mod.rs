//! Runtime object model
//!
//! The object families the collector manages: plain objects, classes and
//! modules, strings, arrays, hashes, ranges, foreign data, procs with
//! their environments, and fibers with their execution contexts. Each
//! module defines the payload layout, the constructors, and the
//! mark/finalize hooks the collector dispatches to.

pub mod array;
pub mod class;
pub mod fiber;
pub mod hash;
pub mod irep;
pub mod object;
pub mod proc;
pub mod string;
pub mod variable;

pub use array::{RArray, SharedArray};
pub use class::{MethodTable, RClass};
pub use fiber::{CallInfo, ExecContext, RFiber};
pub use hash::{HashTable, RHash};
pub use irep::Irep;
pub use object::{DataType, Flags, Kind, RBasic, RData, RObject, RRange, RangeEdges};
pub use proc::{REnv, RProc};
pub use string::{RString, SharedString};
pub use variable::IvTable;
