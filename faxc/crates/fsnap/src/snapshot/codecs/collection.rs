//! Arrays, growable arrays and maps.

use crate::error::{Result, SnapshotError};
use crate::object::{ArrayData, GrowableArrayData, MapData, ObjectBody, ObjectKind, Value};

use super::super::header::TagByte;
use super::super::reader::{ReadSlot, SnapshotReader};
use super::super::writer::{body_mismatch, SnapshotWriter, WriteSlot};
use super::super::Mode;
use super::{child_mode, finish, update};

// ============================================================================
// ARRAYS
// ============================================================================

/// Length, then type arguments and elements
///
/// An allocation header carries the length only; the matching fill repeats
/// it before the children.
pub fn encode_array(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (kind, canonical, data) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Array(data) => (object.kind, object.canonical, data.clone()),
            _ => return Err(body_mismatch(object.kind)),
        }
    };

    w.write_header(kind, TagByte::new(canonical));
    w.stream().write_len(data.elements.len());
    if slot.is_allocation() {
        return Ok(());
    }

    w.write_value(data.type_arguments, Mode::Inline)?;
    let mode = child_mode(canonical);
    for element in data.elements {
        w.write_value(element, mode)?;
    }
    Ok(())
}

pub fn decode_array(r: &mut SnapshotReader<'_>, slot: ReadSlot, tag: TagByte) -> Result<Value> {
    decode_array_of(r, slot, tag, ObjectKind::Array)
}

pub fn decode_immutable_array(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
) -> Result<Value> {
    decode_array_of(r, slot, tag, ObjectKind::ImmutableArray)
}

fn decode_array_of(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
    kind: ObjectKind,
) -> Result<Value> {
    let at = r.position();
    let len = r.stream().read_len(1)?;

    let obj = if slot.is_fill() {
        let obj = r.placeholder(&slot, kind)?;
        let allocated = match &r.heap().get(obj)?.body {
            ObjectBody::Array(data) => data.elements.len(),
            _ => return Err(body_mismatch(kind)),
        };
        if allocated != len {
            return Err(SnapshotError::format(
                at,
                format!("fill of {} elements for an array of {}", len, allocated),
            ));
        }
        obj
    } else {
        let obj = r.heap().allocate(
            kind,
            ObjectBody::Array(ArrayData {
                type_arguments: Value::Null,
                elements: vec![Value::Null; len],
            }),
        );
        if slot.is_allocation() {
            r.bind_allocated(slot.id, obj)?;
            return Ok(Value::Ref(obj));
        }
        r.bind(slot.id, Value::Ref(obj))?;
        obj
    };

    let type_arguments = r.read_child_expecting(Mode::Inline, &[ObjectKind::TypeArguments], true)?;
    let mode = child_mode(tag.is_canonical());
    let mut elements = Vec::with_capacity(len);
    for _ in 0..len {
        elements.push(r.read_value(mode)?);
    }
    update(r.heap(), obj, |body| match body {
        ObjectBody::Array(data) => {
            data.type_arguments = type_arguments;
            data.elements = elements;
            true
        },
        _ => false,
    })?;

    if slot.is_fill() {
        r.materialize(slot.id)?;
        return Ok(Value::Ref(obj));
    }
    finish(r, &slot, obj, tag)
}

/// Type arguments, length, then the backing array
pub fn encode_growable_array(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let data = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::GrowableArray(data) => data.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::GrowableArray, TagByte::new(false));
    w.write_value(data.type_arguments, Mode::Inline)?;
    w.stream().write_len(data.length);
    w.write_value(data.data, Mode::Reference)
}

pub fn decode_growable_array(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let obj = r.heap().allocate(
        ObjectKind::GrowableArray,
        ObjectBody::GrowableArray(GrowableArrayData {
            type_arguments: Value::Null,
            length: 0,
            data: Value::Null,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let type_arguments = r.read_child_expecting(Mode::Inline, &[ObjectKind::TypeArguments], true)?;
    let at = r.position();
    let length = r.stream().read_len(0)?;
    let data = r.read_child_expecting(Mode::Reference, &[ObjectKind::Array], false)?;

    let capacity = match data.as_obj() {
        Some(backing) => match &r.heap().get(backing)?.body {
            ObjectBody::Array(array) => array.elements.len(),
            _ => return Err(body_mismatch(ObjectKind::Array)),
        },
        None => 0,
    };
    crate::ensure!(
        length <= capacity,
        SnapshotError::format(
            at,
            format!("growable length {} exceeds its backing array of {}", length, capacity),
        )
    );

    update(r.heap(), obj, |body| match body {
        ObjectBody::GrowableArray(growable) => {
            growable.type_arguments = type_arguments;
            growable.length = length;
            growable.data = data;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

// ============================================================================
// MAPS
// ============================================================================

/// Type arguments, pair count, then keys and values interleaved
///
/// The hash index never travels. Canonical maps rehash as soon as their keys
/// are read; every other map waits in the postprocessing queue.
pub fn encode_map(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (canonical, type_arguments, entries) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Map(data) => (object.canonical, data.type_arguments, data.entries.clone()),
            _ => return Err(body_mismatch(object.kind)),
        }
    };

    w.write_header(ObjectKind::Map, TagByte::new(canonical));
    w.write_value(type_arguments, Mode::Inline)?;
    w.stream().write_len(entries.len());
    let mode = child_mode(canonical);
    for (key, value) in entries {
        w.write_value(key, mode)?;
        w.write_value(value, mode)?;
    }
    Ok(())
}

pub fn decode_map(r: &mut SnapshotReader<'_>, slot: ReadSlot, tag: TagByte) -> Result<Value> {
    let obj = r
        .heap()
        .allocate(ObjectKind::Map, ObjectBody::Map(MapData::default()));
    r.bind(slot.id, Value::Ref(obj))?;

    let type_arguments = r.read_child_expecting(Mode::Inline, &[ObjectKind::TypeArguments], true)?;
    let count = r.stream().read_len(2)?;
    let mode = child_mode(tag.is_canonical());
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let key = r.read_value(mode)?;
        let value = r.read_value(mode)?;
        entries.push((key, value));
    }
    update(r.heap(), obj, |body| match body {
        ObjectBody::Map(data) => {
            data.type_arguments = type_arguments;
            data.entries = entries;
            true
        },
        _ => false,
    })?;

    if tag.is_canonical() {
        r.group().rehash_map(obj)?;
        finish(r, &slot, obj, tag)
    } else {
        r.enqueue_map_rehash(obj)?;
        Ok(Value::Ref(obj))
    }
}
