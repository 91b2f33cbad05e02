//! # FSNAP - Object Graph Snapshot Engine
//!
//! FSNAP turns a live heap object graph into a compact byte stream and back.
//! One engine serves two uses:
//!
//! - **Full snapshots**: persisted heap images, including class, function
//!   and code references resolved through the class table
//! - **Isolate messages**: graphs sent between isolates of one group, with
//!   an isolate-boundary policy and zero-copy transfer of large buffers
//!
//! ## Quick Start
//!
//! ```rust
//! use fsnap::{IsolateGroup, Value};
//! use fsnap::object::StaticClassTable;
//! use std::sync::Arc;
//!
//! fn main() -> fsnap::Result<()> {
//!     let group = IsolateGroup::new(Arc::new(StaticClassTable::new()));
//!     let heap = group.heap();
//!
//!     // A list that contains itself
//!     let list = heap.new_array(vec![Value::Smi(1), Value::Null]);
//!     heap.get_mut(list)?.body = fsnap::object::ObjectBody::Array(fsnap::object::ArrayData {
//!         type_arguments: Value::Null,
//!         elements: vec![Value::Smi(1), Value::Ref(list)],
//!     });
//!
//!     let mut message = group.write_message(Value::Ref(list))?;
//!     message.commit();
//!     let copy = group.read_message(message)?;
//!     assert!(copy.as_obj().is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      IsolateGroup                         │
//! │   Heap ── CanonicalTable ── ClassTable ── StubGenerator   │
//! └───────────────┬──────────────────────────┬───────────────┘
//!                 │                          │
//!        SnapshotWriter                SnapshotReader
//!   ┌─────────────┴─────────┐   ┌────────────┴────────────┐
//!   │ ForwardTable          │   │ BackRefTable            │
//!   │ boundary policy       │   │ decode policy           │
//!   │ forward list          │   │ forward fills           │
//!   │ finalizable data  ────┼──►│ postprocessing queue    │
//!   └─────────────┬─────────┘   └────────────┬────────────┘
//!                 └──── dispatch table ──────┘
//!                    (one codec per kind)
//! ```
//!
//! ### Stream Layout
//!
//! ```text
//! "FXSN" kind │ root value │ forward fills ... │ (end)
//!
//! value  := Null | True | False | Smi zigzag | BackRef id
//!         | Inline header payload
//!         | Allocate header alloc-payload      (reference slots only)
//! fill   := InlineWithId id header payload
//! header := kind-tag tag-byte
//! ```
//!
//! ### Pass Guarantees
//!
//! 1. Object identity is preserved: every object is written once and
//!    shared or cyclic references become back-references.
//! 2. A pass is all-or-nothing. A failed write releases every block it
//!    handed to its message; a failed read returns no graph.
//! 3. Canonical values decode to the group's single canonical instance.
//! 4. Decoded maps are hashed and decoded types carry their type-testing
//!    stub before the root is returned.
//!
//! ## Thread Safety
//!
//! - `IsolateGroup` is `Send + Sync`; passes borrow it immutably
//! - Any number of passes may run on different threads at once
//! - The canonical table is a concurrent map; equal values interned from
//!   racing passes resolve to one winner

pub mod config;
pub mod error;
pub mod logging;
pub mod object;
pub mod runtime;
pub mod snapshot;
pub mod stats;

pub use config::SnapshotConfig;
pub use error::{Result, SnapshotError};
pub use object::{Heap, ObjRef, ObjectKind, Value};
pub use runtime::{IsolateGroup, Message};
pub use snapshot::{SnapshotKind, SnapshotReader, SnapshotWriter};
pub use stats::PassStats;

/// FSNAP version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StaticClassTable;
    use std::sync::Arc;

    #[test]
    fn test_group_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IsolateGroup>();
    }

    #[test]
    fn test_immediate_roundtrip() {
        let group = IsolateGroup::new(Arc::new(StaticClassTable::new()));
        for value in [Value::Null, Value::Bool(false), Value::Smi(-42)] {
            let bytes = group.write_snapshot(value).unwrap();
            assert_eq!(group.read_snapshot(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
