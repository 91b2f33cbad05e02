//! Snapshot reader (`ReadObject`)
//!
//! Mirrors the writer. Every object marker reserves the next id; the kind's
//! decoder binds that id right after the header, before reading any child.
//! Allocation headers bind placeholders that the forward-list fills after the
//! root complete. Once no placeholder is left, trailing bytes are rejected
//! and the postprocessing queue drains.
//!
//! Decode policy, checked before dispatch:
//!
//! | Condition                                        | Error              |
//! |--------------------------------------------------|--------------------|
//! | forbidden kind                                   | unreachable decode |
//! | metadata, context or scope kind in a message     | unreachable decode |
//! | external or transferable buffer in a full image  | unreachable decode |
//! | external string kind                             | unreachable decode |
//! | canonical bit on a kind that is never canonical  | format             |
//! | allocation header of a kind that is not split    | format             |

use crate::error::{Result, SnapshotError};
use crate::logging::{log_event, PassDirection, SnapshotEvent};
use crate::object::{Heap, KindCategory, ObjRef, ObjectKind, Value};
use crate::runtime::finalizer::MessageFinalizableData;
use crate::runtime::IsolateGroup;
use crate::stats::PassStats;

use super::canonical;
use super::dispatch::codec_for;
use super::external::{self, ExternalBlock};
use super::header::{self, Marker, TagByte};
use super::identity::{BackRefTable, BindState, ObjectId};
use super::postprocess::{PostprocessKind, PostprocessQueue};
use super::stream::ReadStream;
use super::{Mode, SnapshotKind};

/// Object about to be decoded
#[derive(Clone, Copy, Debug)]
pub struct ReadSlot {
    pub id: ObjectId,
    /// `Inline`, `InlineWithId` or `Allocate`
    pub marker: Marker,
    pub mode: Mode,
    /// Offset of the object header
    pub offset: usize,
}

impl ReadSlot {
    #[inline]
    pub fn is_allocation(&self) -> bool {
        self.marker == Marker::Allocate
    }

    #[inline]
    pub fn is_fill(&self) -> bool {
        self.marker == Marker::InlineWithId
    }
}

/// Read pass state
pub struct SnapshotReader<'r> {
    group: &'r IsolateGroup,
    kind: SnapshotKind,
    input: ReadStream<'r>,
    backrefs: BackRefTable,
    postprocess: PostprocessQueue,
    finalizable: Option<MessageFinalizableData>,
    depth: usize,
    max_depth: usize,
    active: bool,
    stats: PassStats,
}

impl<'r> SnapshotReader<'r> {
    pub fn new(group: &'r IsolateGroup, bytes: &'r [u8], kind: SnapshotKind) -> Self {
        Self {
            group,
            kind,
            input: ReadStream::new(bytes),
            backrefs: BackRefTable::new(),
            postprocess: PostprocessQueue::new(),
            finalizable: None,
            depth: 0,
            max_depth: group.config().max_depth,
            active: false,
            stats: PassStats::default(),
        }
    }

    /// Attach the committed hand-off list of a received message
    pub fn with_finalizable_data(mut self, data: MessageFinalizableData) -> Self {
        self.finalizable = Some(data);
        self
    }

    /// Decode the whole stream and return its root
    ///
    /// Yields a fully materialized and postprocessed graph, or an error and
    /// no graph.
    pub fn read_object(&mut self) -> Result<Value> {
        if self.active || self.input.position() != 0 {
            return Err(SnapshotError::InvalidState {
                expected: "fresh reader".to_string(),
                actual: "reader already used".to_string(),
            });
        }
        log_event(SnapshotEvent::PassStart {
            direction: PassDirection::Read,
            kind: self.kind,
        });

        self.active = true;
        let result = self.read_all();
        self.active = false;

        match result {
            Ok(root) => {
                self.stats.bytes = self.input.position() as u64;
                log_event(SnapshotEvent::PassEnd {
                    direction: PassDirection::Read,
                    kind: self.kind,
                    objects: self.stats.objects,
                    bytes: self.stats.bytes,
                });
                self.group.record_pass(&self.stats);
                Ok(root)
            },
            Err(err) => {
                log::warn!("{} read aborted: {}", self.kind, err);
                log_event(SnapshotEvent::PassAborted {
                    direction: PassDirection::Read,
                    kind: self.kind,
                    reason: err.to_string(),
                });
                Err(err)
            },
        }
    }

    fn read_all(&mut self) -> Result<Value> {
        header::read_preamble(&mut self.input, self.kind)?;
        let root = self.read_value(Mode::Inline)?;

        while self.backrefs.pending() > 0 {
            self.read_fill()?;
        }

        if !self.input.is_at_end() {
            return Err(SnapshotError::format(
                self.input.position(),
                format!("{} trailing bytes", self.input.remaining()),
            ));
        }

        if let Some(data) = &self.finalizable {
            if !data.is_empty() {
                return Err(SnapshotError::format(
                    self.input.position(),
                    format!("{} external blocks were never referenced", data.len()),
                ));
            }
        }

        // No enqueue from here on
        self.active = false;
        let summary = self.postprocess.drain(self.group)?;
        self.stats.postprocessed = summary.total() as u64;
        if summary.total() > 0 {
            log_event(SnapshotEvent::PostprocessDrained {
                types: summary.types,
                maps: summary.maps,
            });
        }
        Ok(root)
    }

    fn read_fill(&mut self) -> Result<()> {
        let at = self.input.position();
        let marker = self.input.read_u8()?;
        if marker != Marker::InlineWithId as u8 {
            return Err(SnapshotError::format(
                at,
                format!(
                    "{} objects still await their body, found marker {}",
                    self.backrefs.pending(),
                    marker
                ),
            ));
        }
        let id = self.input.read_u32_leb()?;
        if self.backrefs.state(id) != Some(BindState::Allocated) {
            return Err(SnapshotError::format(
                at,
                format!("fill of id {} which awaits no body", id),
            ));
        }
        self.read_object_body(ReadSlot {
            id,
            marker: Marker::InlineWithId,
            mode: Mode::Inline,
            offset: self.input.position(),
        })?;
        Ok(())
    }

    /// Read one slot value
    pub fn read_value(&mut self, mode: Mode) -> Result<Value> {
        let at = self.input.position();
        let byte = self.input.read_u8()?;
        let marker = Marker::from_u8(byte)
            .ok_or_else(|| SnapshotError::format(at, format!("unknown marker {}", byte)))?;

        match marker {
            Marker::Null => Ok(Value::Null),
            Marker::True => Ok(Value::Bool(true)),
            Marker::False => Ok(Value::Bool(false)),
            Marker::Smi => {
                let v = self.input.read_zigzag()?;
                Value::smi(v)
                    .ok_or_else(|| SnapshotError::format(at, "small integer out of range"))
            },
            Marker::BackRef => {
                let id = self.input.read_u32_leb()?;
                self.stats.back_references += 1;
                self.backrefs.resolve(id, at)
            },
            Marker::Inline => {
                let id = self.backrefs.reserve();
                self.read_object_body(ReadSlot {
                    id,
                    marker,
                    mode,
                    offset: self.input.position(),
                })
            },
            Marker::Allocate => {
                if mode == Mode::Inline {
                    return Err(SnapshotError::format(at, "allocation header in an inline slot"));
                }
                let id = self.backrefs.reserve();
                self.read_object_body(ReadSlot {
                    id,
                    marker,
                    mode,
                    offset: self.input.position(),
                })
            },
            Marker::InlineWithId => Err(SnapshotError::format(
                at,
                "forward fill inside an object body",
            )),
        }
    }

    fn read_object_body(&mut self, slot: ReadSlot) -> Result<Value> {
        let (kind, tag) = header::read_header(&mut self.input)?;
        self.check_decodable(kind, tag, &slot)?;

        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(SnapshotError::format(
                slot.offset,
                format!("objects nest deeper than {} levels", self.max_depth),
            ));
        }

        let value = (codec_for(kind).decode)(self, slot, tag)?;
        self.depth -= 1;

        if !self.backrefs.is_bound(slot.id) {
            return Err(SnapshotError::Internal(format!(
                "{} decoder left id {} unbound",
                kind, slot.id
            )));
        }
        if !slot.is_allocation() {
            self.stats.objects += 1;
        }
        Ok(value)
    }

    fn check_decodable(&self, kind: ObjectKind, tag: TagByte, slot: &ReadSlot) -> Result<()> {
        let unreachable = match kind.category() {
            KindCategory::Forbidden => true,
            KindCategory::Metadata => self.kind == SnapshotKind::Message,
            _ => match kind {
                ObjectKind::Context | ObjectKind::ContextScope => {
                    self.kind == SnapshotKind::Message
                },
                ObjectKind::ExternalTypedData | ObjectKind::TransferableTypedData => {
                    self.kind == SnapshotKind::Full
                },
                // Written as plain strings
                ObjectKind::ExternalOneByteString | ObjectKind::ExternalTwoByteString => true,
                _ => false,
            },
        };
        if unreachable {
            return Err(SnapshotError::UnreachableDecode {
                kind,
                snapshot: self.kind,
            });
        }

        if tag.is_canonical() && !kind.is_canonicalizable() {
            return Err(SnapshotError::format(
                slot.offset,
                format!("{} cannot be canonical", kind),
            ));
        }
        if slot.marker != Marker::Inline && !kind.is_split() {
            return Err(SnapshotError::format(
                slot.offset,
                format!("{} is not written in two steps", kind),
            ));
        }
        if slot.marker != Marker::Inline && tag.is_canonical() {
            return Err(SnapshotError::format(
                slot.offset,
                "canonical objects are always inline",
            ));
        }
        Ok(())
    }

    // ========================================================================
    // CODEC SUPPORT
    // ========================================================================

    pub fn group(&self) -> &'r IsolateGroup {
        self.group
    }

    pub fn heap(&self) -> &'r Heap {
        self.group.heap()
    }

    pub fn kind(&self) -> SnapshotKind {
        self.kind
    }

    /// Input stream
    pub fn stream(&mut self) -> &mut ReadStream<'r> {
        &mut self.input
    }

    /// Current input offset
    pub fn position(&self) -> usize {
        self.input.position()
    }

    /// Bind a decoded object's id
    pub fn bind(&mut self, id: ObjectId, value: Value) -> Result<()> {
        self.backrefs.bind(id, value, BindState::Materialized)
    }

    /// Bind a placeholder allocated from an allocation header
    pub fn bind_allocated(&mut self, id: ObjectId, obj: ObjRef) -> Result<()> {
        self.backrefs.bind(id, Value::Ref(obj), BindState::Allocated)
    }

    /// Placeholder a forward fill targets, checked against the fill's kind
    pub fn placeholder(&self, slot: &ReadSlot, kind: ObjectKind) -> Result<ObjRef> {
        let value = self.backrefs.resolve(slot.id, slot.offset)?;
        let obj = value
            .as_obj()
            .ok_or_else(|| SnapshotError::format(slot.offset, "fill of an immediate"))?;
        let actual = self.heap().kind_of(obj)?;
        if actual != kind {
            return Err(SnapshotError::format(
                slot.offset,
                format!("{} fill for a {} placeholder", kind, actual),
            ));
        }
        Ok(obj)
    }

    /// Mark a filled placeholder as materialized
    pub fn materialize(&mut self, id: ObjectId) -> Result<()> {
        self.backrefs.materialize(id)
    }

    /// Read a child that must be null or one of `kinds`
    pub fn read_child_expecting(
        &mut self,
        mode: Mode,
        kinds: &[ObjectKind],
        nullable: bool,
    ) -> Result<Value> {
        let at = self.input.position();
        let value = self.read_value(mode)?;
        let ok = match value {
            Value::Null => nullable,
            Value::Ref(obj) => kinds.contains(&self.heap().kind_of(obj)?),
            _ => false,
        };
        if !ok {
            return Err(SnapshotError::format(
                at,
                format!("expected {}, found {:?}", describe(kinds, nullable), value),
            ));
        }
        Ok(value)
    }

    /// Intern a fully populated object and repoint its id at the winner
    pub fn canonicalize(&mut self, id: ObjectId, obj: ObjRef) -> Result<ObjRef> {
        let (winner, hit) = canonical::intern(self.heap(), self.group.canonical(), obj)?;
        if hit {
            self.stats.canonical_hits += 1;
            self.backrefs.rebind(id, Value::Ref(winner))?;
        } else {
            self.stats.canonical_misses += 1;
        }
        Ok(winner)
    }

    /// Take the next external block of the message (`Take`)
    pub fn take_external(&mut self, expected_len: usize) -> Result<ExternalBlock> {
        let offset = self.input.position();
        external::take_block(self.finalizable.as_mut(), expected_len, offset)
    }

    /// Queue a type-testing stub for a decoded type-system value
    pub fn enqueue_type_postprocessing(&mut self, obj: ObjRef) -> Result<()> {
        self.check_active()?;
        self.postprocess.enqueue(obj, PostprocessKind::TypeTestingStub)
    }

    /// Queue a hash-index rebuild for a decoded map
    pub fn enqueue_map_rehash(&mut self, map: ObjRef) -> Result<()> {
        self.check_active()?;
        self.postprocess.enqueue(map, PostprocessKind::MapRehash)
    }

    fn check_active(&self) -> Result<()> {
        if !self.active {
            return Err(SnapshotError::InvalidState {
                expected: "active read pass".to_string(),
                actual: "no read in progress".to_string(),
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> &PassStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut PassStats {
        &mut self.stats
    }
}

fn describe(kinds: &[ObjectKind], nullable: bool) -> String {
    let mut names: Vec<&str> = kinds.iter().map(|kind| kind.name()).collect();
    if nullable {
        names.push("null");
    }
    names.join(" or ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StaticClassTable;
    use crate::snapshot::stream::WriteStream;
    use std::sync::Arc;

    fn group() -> IsolateGroup {
        IsolateGroup::new(Arc::new(StaticClassTable::new()))
    }

    fn stream(kind: SnapshotKind, body: &[u8]) -> Vec<u8> {
        let mut out = WriteStream::default();
        header::write_preamble(&mut out, kind);
        out.write_bytes(body);
        out.into_bytes()
    }

    #[test]
    fn test_enqueue_outside_pass_is_invalid_state() {
        let group = group();
        let map = group.new_map(Vec::new()).unwrap();
        let bytes = stream(SnapshotKind::Full, &[Marker::Null as u8]);
        let mut reader = SnapshotReader::new(&group, &bytes, SnapshotKind::Full);
        assert!(matches!(
            reader.enqueue_map_rehash(map),
            Err(SnapshotError::InvalidState { .. })
        ));
        assert_eq!(reader.read_object().unwrap(), Value::Null);
        assert!(reader.enqueue_type_postprocessing(map).is_err());
    }

    #[test]
    fn test_reader_is_single_use() {
        let group = group();
        let bytes = stream(SnapshotKind::Full, &[Marker::True as u8]);
        let mut reader = SnapshotReader::new(&group, &bytes, SnapshotKind::Full);
        assert_eq!(reader.read_object().unwrap(), Value::Bool(true));
        assert!(reader.read_object().unwrap_err().is_bug());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let group = group();
        let bytes = stream(SnapshotKind::Full, &[Marker::Null as u8, 0]);
        let err = SnapshotReader::new(&group, &bytes, SnapshotKind::Full)
            .read_object()
            .unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_forbidden_kind_is_unreachable() {
        let group = group();
        let bytes = stream(
            SnapshotKind::Message,
            &[Marker::Inline as u8, ObjectKind::StackTrace.tag(), 0],
        );
        let err = SnapshotReader::new(&group, &bytes, SnapshotKind::Message)
            .read_object()
            .unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::UnreachableDecode {
                kind: ObjectKind::StackTrace,
                ..
            }
        ));
    }

    #[test]
    fn test_canonical_bit_on_mutable_array_rejected() {
        let group = group();
        let bytes = stream(
            SnapshotKind::Full,
            &[Marker::Inline as u8, ObjectKind::Array.tag(), 1, 0, Marker::Null as u8],
        );
        let err = SnapshotReader::new(&group, &bytes, SnapshotKind::Full)
            .read_object()
            .unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_allocation_header_at_root_rejected() {
        let group = group();
        let bytes = stream(
            SnapshotKind::Full,
            &[Marker::Allocate as u8, ObjectKind::Array.tag(), 0, 0],
        );
        assert!(SnapshotReader::new(&group, &bytes, SnapshotKind::Full)
            .read_object()
            .unwrap_err()
            .is_format_error());
    }

    #[test]
    fn test_missing_fill_rejected() {
        let group = group();
        // Inline array holding one element that is only ever allocated
        let bytes = stream(
            SnapshotKind::Full,
            &[
                Marker::Inline as u8,
                ObjectKind::Array.tag(),
                0,
                1,
                Marker::Null as u8,
                Marker::Allocate as u8,
                ObjectKind::Array.tag(),
                0,
                0,
            ],
        );
        assert!(SnapshotReader::new(&group, &bytes, SnapshotKind::Full)
            .read_object()
            .unwrap_err()
            .is_format_error());
    }
}
