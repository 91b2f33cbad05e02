//! Per-kind codecs
//!
//! Each kind has one encoder and one decoder, wired up in
//! [`super::dispatch`]. Encoders write the header and payload; decoders read
//! the payload, bind the slot's id before reading any child, and return the
//! decoded value.
//!
//! Payload layouts are listed on each function; children are always written
//! after the scalar fields, in the order given.

pub mod collection;
pub mod instance;
pub mod scalar;
pub mod typed_data;
pub mod types;

use crate::error::Result;
use crate::object::{Heap, ObjRef, ObjectBody, Value};
use crate::runtime::safepoint::NoSafepointScope;

use super::header::TagByte;
use super::reader::{ReadSlot, SnapshotReader};
use super::writer::body_mismatch;
use super::Mode;

/// Mode of collection elements and instance fields
///
/// Children of a canonical object are canonical themselves and written
/// inline.
#[inline]
pub(crate) fn child_mode(canonical: bool) -> Mode {
    if canonical {
        Mode::Inline
    } else {
        Mode::Reference
    }
}

/// Mutate the body of a freshly decoded object
///
/// `f` returns `false` when the body is not the expected variant.
pub(crate) fn update<F>(heap: &Heap, obj: ObjRef, f: F) -> Result<()>
where
    F: FnOnce(&mut ObjectBody) -> bool,
{
    let mut object = heap.get_mut(obj)?;
    if f(&mut object.body) {
        Ok(())
    } else {
        Err(body_mismatch(object.kind))
    }
}

/// Raw copy into a freshly allocated buffer
///
/// Runs without safepoints so a moving collector never sees the buffer
/// half written.
pub(crate) fn bulk_copy<F>(heap: &Heap, obj: ObjRef, f: F) -> Result<()>
where
    F: FnOnce(&mut ObjectBody) -> bool,
{
    let _scope = NoSafepointScope::enter();
    update(heap, obj, f)
}

/// Result of a fully populated object, interned when tagged canonical
pub(crate) fn finish(
    r: &mut SnapshotReader<'_>,
    slot: &ReadSlot,
    obj: ObjRef,
    tag: TagByte,
) -> Result<Value> {
    if tag.is_canonical() {
        Ok(Value::Ref(r.canonicalize(slot.id, obj)?))
    } else {
        Ok(Value::Ref(obj))
    }
}
