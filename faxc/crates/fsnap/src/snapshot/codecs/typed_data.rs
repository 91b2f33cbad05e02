//! Typed data, external typed data, views and transferable buffers.
//!
//! In messages, a buffer above the externalization threshold leaves the
//! stream: only its length is written and the bytes travel as a block of the
//! message's finalizable data. Receivers take blocks back in stream order.

use crate::error::{Result, SnapshotError};
use crate::object::{ObjectBody, ObjectKind, TypedDataBody, TypedDataViewBody, Value};

use super::super::external::{self, TransferablePeer};
use super::super::header::TagByte;
use super::super::reader::{ReadSlot, SnapshotReader};
use super::super::writer::{body_mismatch, SnapshotWriter, WriteSlot};
use super::super::{Mode, SnapshotKind};
use super::{bulk_copy, finish};

/// Element type in the tag, byte length, then the bytes unless externalized
pub fn encode_typed_data(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let heap = w.heap();
    let object = heap.get(slot.object)?;
    let data = match &object.body {
        ObjectBody::TypedData(data) => data,
        _ => return Err(body_mismatch(object.kind)),
    };
    let len = data.bytes.len();

    let externalize = w.kind() == SnapshotKind::Message
        && !object.canonical
        && w.group().config().should_externalize(len);
    if externalize {
        w.write_header(
            ObjectKind::ExternalTypedData,
            TagByte::with_element(false, data.element),
        );
        w.stream().write_len(len);
        external::externalize_copy(w.finalizable_data(ObjectKind::TypedData)?, &data.bytes);
        w.stats_mut().externalized_bytes += len as u64;
    } else {
        w.write_header(
            ObjectKind::TypedData,
            TagByte::with_element(object.canonical, data.element),
        );
        w.stream().write_len(len);
        w.stream().write_bytes(&data.bytes);
    }
    Ok(())
}

pub fn decode_typed_data(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
) -> Result<Value> {
    let element = tag.element(slot.offset)?;
    let at = r.position();
    let len = r.stream().read_len(1)?;
    if len % element.size() != 0 {
        return Err(SnapshotError::format(
            at,
            format!("{} bytes do not divide into {:?} elements", len, element),
        ));
    }

    let obj = r.heap().allocate(
        ObjectKind::TypedData,
        ObjectBody::TypedData(TypedDataBody {
            element,
            bytes: vec![0; len],
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let bytes = r.stream().read_bytes(len)?;
    bulk_copy(r.heap(), obj, |body| match body {
        ObjectBody::TypedData(data) => {
            data.bytes.copy_from_slice(bytes);
            true
        },
        _ => false,
    })?;
    finish(r, &slot, obj, tag)
}

/// Messages copy the block once into a fresh block; full snapshots write
/// the bytes inline as plain typed data
pub fn encode_external_typed_data(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let heap = w.heap();
    let object = heap.get(slot.object)?;
    let data = match &object.body {
        ObjectBody::ExternalTypedData(data) => data,
        _ => return Err(body_mismatch(object.kind)),
    };
    let len = data.block.len();

    match w.kind() {
        SnapshotKind::Message => {
            w.write_header(
                ObjectKind::ExternalTypedData,
                TagByte::with_element(false, data.element),
            );
            w.stream().write_len(len);
            external::externalize_copy(
                w.finalizable_data(ObjectKind::ExternalTypedData)?,
                &data.block,
            );
            w.stats_mut().externalized_bytes += len as u64;
        },
        SnapshotKind::Full => {
            w.write_header(ObjectKind::TypedData, TagByte::with_element(false, data.element));
            w.stream().write_len(len);
            w.stream().write_bytes(&data.block);
        },
    }
    Ok(())
}

pub fn decode_external_typed_data(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
) -> Result<Value> {
    let element = tag.element(slot.offset)?;
    let at = r.position();
    let len = r.stream().read_len(0)?;
    if len % element.size() != 0 {
        return Err(SnapshotError::format(
            at,
            format!("{} bytes do not divide into {:?} elements", len, element),
        ));
    }

    let block = r.take_external(len)?;
    let obj = r.heap().new_external_typed_data(element, block);
    r.bind(slot.id, Value::Ref(obj))?;
    r.stats_mut().externalized_bytes += len as u64;
    Ok(Value::Ref(obj))
}

/// Element type in the tag, byte offset, element count, then the backing
/// store
pub fn encode_view(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let view = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::TypedDataView(view) => view.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(
        ObjectKind::TypedDataView,
        TagByte::with_element(false, view.element),
    );
    w.stream().write_len(view.offset_in_bytes);
    w.stream().write_len(view.length);
    w.write_value(view.backing, Mode::Reference)
}

pub fn decode_view(r: &mut SnapshotReader<'_>, slot: ReadSlot, tag: TagByte) -> Result<Value> {
    let element = tag.element(slot.offset)?;
    let at = r.position();
    let offset_in_bytes = r.stream().read_len(0)?;
    let length = r.stream().read_len(0)?;

    let obj = r.heap().allocate(
        ObjectKind::TypedDataView,
        ObjectBody::TypedDataView(TypedDataViewBody {
            element,
            offset_in_bytes,
            length,
            backing: Value::Null,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let backing = r.read_child_expecting(Mode::Reference, ObjectKind::TYPED_DATA_STORES, false)?;
    let store_len = match backing.as_obj() {
        Some(store) => match &r.heap().get(store)?.body {
            ObjectBody::TypedData(data) => data.bytes.len(),
            ObjectBody::ExternalTypedData(data) => data.block.len(),
            _ => return Err(body_mismatch(ObjectKind::TypedData)),
        },
        None => 0,
    };
    let end = length
        .checked_mul(element.size())
        .and_then(|bytes| bytes.checked_add(offset_in_bytes));
    if end.map_or(true, |end| end > store_len) {
        return Err(SnapshotError::format(
            at,
            format!(
                "view of {} elements at byte {} overruns a store of {} bytes",
                length, offset_in_bytes, store_len
            ),
        ));
    }

    super::update(r.heap(), obj, |body| match body {
        ObjectBody::TypedDataView(view) => {
            view.backing = backing;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

/// Byte length; the block itself moves with the message
///
/// Full snapshots never carry transferables.
pub fn encode_transferable(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let peer = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::TransferableTypedData(peer) => peer.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    if w.kind() == SnapshotKind::Full {
        return Err(SnapshotError::illegal(
            ObjectKind::TransferableTypedData,
            "transferable buffers cannot be part of a full snapshot",
        ));
    }

    let len = external::transfer_peer(
        w.finalizable_data(ObjectKind::TransferableTypedData)?,
        &peer,
    )?;
    w.write_header(ObjectKind::TransferableTypedData, TagByte::new(false));
    w.stream().write_len(len);
    w.stats_mut().transferred_bytes += len as u64;
    Ok(())
}

pub fn decode_transferable(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let len = r.stream().read_len(0)?;
    let block = r.take_external(len)?;
    let obj = r
        .heap()
        .new_transferable_from_peer(TransferablePeer::from_block(block));
    r.heap().add_external(obj, len);
    r.bind(slot.id, Value::Ref(obj))?;
    r.stats_mut().transferred_bytes += len as u64;
    Ok(Value::Ref(obj))
}
