//! Plain values: boxed numbers, strings, SIMD values, capability tokens,
//! port handles, and the forbidden kinds.

use crate::error::{Result, SnapshotError};
use crate::object::{ObjectBody, ObjectKind, Value};

use super::super::header::TagByte;
use super::super::reader::{ReadSlot, SnapshotReader};
use super::super::writer::{body_mismatch, SnapshotWriter, WriteSlot};
use super::{bulk_copy, finish};

// ============================================================================
// NUMBERS
// ============================================================================

/// `i64`
pub fn encode_mint(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (canonical, value) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Mint(v) => (object.canonical, *v),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::Mint, TagByte::new(canonical));
    w.stream().write_i64(value);
    Ok(())
}

/// Values in the small-integer range always decode as small integers
pub fn decode_mint(r: &mut SnapshotReader<'_>, slot: ReadSlot, tag: TagByte) -> Result<Value> {
    let value = r.stream().read_i64()?;
    if let Some(smi) = Value::smi(value) {
        r.bind(slot.id, smi)?;
        return Ok(smi);
    }
    let obj = r.heap().allocate(ObjectKind::Mint, ObjectBody::Mint(value));
    r.bind(slot.id, Value::Ref(obj))?;
    finish(r, &slot, obj, tag)
}

/// `f64`
pub fn encode_double(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (canonical, value) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Double(v) => (object.canonical, *v),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::Double, TagByte::new(canonical));
    w.stream().write_f64(value);
    Ok(())
}

pub fn decode_double(r: &mut SnapshotReader<'_>, slot: ReadSlot, tag: TagByte) -> Result<Value> {
    let value = r.stream().read_f64()?;
    let obj = r.heap().allocate(ObjectKind::Double, ObjectBody::Double(value));
    r.bind(slot.id, Value::Ref(obj))?;
    finish(r, &slot, obj, tag)
}

// ============================================================================
// STRINGS
// ============================================================================

/// Length in code units, then Latin-1 bytes or little-endian UTF-16 units
///
/// External strings are written as their in-heap counterparts and decode as
/// such.
pub fn encode_string(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let heap = w.heap();
    let object = heap.get(slot.object)?;
    let tag = TagByte::new(object.canonical);
    match &object.body {
        ObjectBody::OneByteString(bytes) => write_one_byte(w, tag, bytes),
        ObjectBody::ExternalOneByteString(bytes) => write_one_byte(w, tag, bytes),
        ObjectBody::TwoByteString(units) => write_two_byte(w, tag, units),
        ObjectBody::ExternalTwoByteString(units) => write_two_byte(w, tag, units),
        _ => return Err(body_mismatch(object.kind)),
    }
    Ok(())
}

fn write_one_byte(w: &mut SnapshotWriter<'_>, tag: TagByte, bytes: &[u8]) {
    w.write_header(ObjectKind::OneByteString, tag);
    w.stream().write_len(bytes.len());
    w.stream().write_bytes(bytes);
}

fn write_two_byte(w: &mut SnapshotWriter<'_>, tag: TagByte, units: &[u16]) {
    w.write_header(ObjectKind::TwoByteString, tag);
    w.stream().write_len(units.len());
    for unit in units {
        w.stream().write_u16(*unit);
    }
}

pub fn decode_one_byte_string(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
) -> Result<Value> {
    let len = r.stream().read_len(1)?;
    let obj = r
        .heap()
        .allocate(ObjectKind::OneByteString, ObjectBody::OneByteString(vec![0; len]));
    r.bind(slot.id, Value::Ref(obj))?;

    let bytes = r.stream().read_bytes(len)?;
    bulk_copy(r.heap(), obj, |body| match body {
        ObjectBody::OneByteString(dst) => {
            dst.copy_from_slice(bytes);
            true
        },
        _ => false,
    })?;
    finish(r, &slot, obj, tag)
}

pub fn decode_two_byte_string(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
) -> Result<Value> {
    let len = r.stream().read_len(2)?;
    let obj = r
        .heap()
        .allocate(ObjectKind::TwoByteString, ObjectBody::TwoByteString(vec![0; len]));
    r.bind(slot.id, Value::Ref(obj))?;

    let bytes = r.stream().read_bytes(len * 2)?;
    bulk_copy(r.heap(), obj, |body| match body {
        ObjectBody::TwoByteString(dst) => {
            for (unit, pair) in dst.iter_mut().zip(bytes.chunks_exact(2)) {
                *unit = u16::from_le_bytes([pair[0], pair[1]]);
            }
            true
        },
        _ => false,
    })?;
    finish(r, &slot, obj, tag)
}

/// No writer emits an external string kind
pub fn decode_external_string(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    Err(SnapshotError::Internal(format!(
        "external string at offset {} reached its decoder in a {} snapshot",
        slot.offset,
        r.kind()
    )))
}

// ============================================================================
// SIMD
// ============================================================================

/// Four `f32`, four `u32` or two `f64` lanes
pub fn encode_simd(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let heap = w.heap();
    let object = heap.get(slot.object)?;
    w.write_header(object.kind, TagByte::new(false));
    let out = w.stream();
    match &object.body {
        ObjectBody::Float32x4(lanes) => lanes.iter().for_each(|lane| out.write_f32(*lane)),
        ObjectBody::Int32x4(lanes) => lanes.iter().for_each(|lane| out.write_u32(*lane)),
        ObjectBody::Float64x2(lanes) => lanes.iter().for_each(|lane| out.write_f64(*lane)),
        _ => return Err(body_mismatch(object.kind)),
    }
    Ok(())
}

pub fn decode_float32x4(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let mut lanes = [0f32; 4];
    for lane in lanes.iter_mut() {
        *lane = r.stream().read_f32()?;
    }
    bind_new(r, slot, ObjectKind::Float32x4, ObjectBody::Float32x4(lanes))
}

pub fn decode_int32x4(r: &mut SnapshotReader<'_>, slot: ReadSlot, _tag: TagByte) -> Result<Value> {
    let mut lanes = [0u32; 4];
    for lane in lanes.iter_mut() {
        *lane = r.stream().read_u32()?;
    }
    bind_new(r, slot, ObjectKind::Int32x4, ObjectBody::Int32x4(lanes))
}

pub fn decode_float64x2(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let lanes = [r.stream().read_f64()?, r.stream().read_f64()?];
    bind_new(r, slot, ObjectKind::Float64x2, ObjectBody::Float64x2(lanes))
}

// ============================================================================
// CAPABILITIES AND PORTS
// ============================================================================

/// `u64` token
pub fn encode_capability(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let id = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Capability(id) => *id,
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::Capability, TagByte::new(false));
    w.stream().write_u64(id);
    Ok(())
}

pub fn decode_capability(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let id = r.stream().read_u64()?;
    bind_new(r, slot, ObjectKind::Capability, ObjectBody::Capability(id))
}

/// `u64` port id, `u64` origin id
pub fn encode_send_port(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (id, origin_id) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::SendPort { id, origin_id } => (*id, *origin_id),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::SendPort, TagByte::new(false));
    w.stream().write_u64(id);
    w.stream().write_u64(origin_id);
    Ok(())
}

pub fn decode_send_port(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let id = r.stream().read_u64()?;
    let origin_id = r.stream().read_u64()?;
    bind_new(r, slot, ObjectKind::SendPort, ObjectBody::SendPort { id, origin_id })
}

// ============================================================================
// FORBIDDEN
// ============================================================================

/// Stack traces, receive ports, native pointers and user tags never travel
pub fn encode_forbidden(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let kind = w.heap().kind_of(slot.object)?;
    Err(SnapshotError::illegal(kind, ""))
}

/// Forbidden kinds are rejected before dispatch
pub fn decode_forbidden(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    Err(SnapshotError::Internal(format!(
        "forbidden object at offset {} reached its decoder in a {} snapshot",
        slot.offset,
        r.kind()
    )))
}

/// Allocate a childless object and bind it
fn bind_new(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    kind: ObjectKind,
    body: ObjectBody,
) -> Result<Value> {
    let obj = r.heap().allocate(kind, body);
    let value = Value::Ref(obj);
    r.bind(slot.id, value)?;
    Ok(value)
}
