//! Snapshot writer (`WriteObject`)
//!
//! One write pass walks the graph from the root:
//!
//! 1. Immediates become markers; visited objects become back-references.
//! 2. A new object is checked against the boundary policy (messages only),
//!    gets the next id *before* its children are visited, and is handed to
//!    its kind's encoder.
//! 3. Split kinds reached in reference mode only get an allocation header
//!    and wait on the forward list, which drains after the root.
//!
//! A pass is all-or-nothing: on error the output is dropped and every block
//! handed to the message's finalizable data is released.

use crate::error::{Result, SnapshotError};
use crate::logging::{log_event, PassDirection, SnapshotEvent};
use crate::object::{Heap, ObjRef, ObjectKind, Value};
use crate::runtime::finalizer::MessageFinalizableData;
use crate::runtime::IsolateGroup;
use crate::stats::PassStats;

use super::boundary;
use super::dispatch::codec_for;
use super::header::{self, Marker, TagByte};
use super::identity::{ForwardTable, ObjectId, VisitState};
use super::stream::WriteStream;
use super::{Mode, SnapshotKind};

/// Object about to be encoded
#[derive(Clone, Copy, Debug)]
pub struct WriteSlot {
    pub object: ObjRef,
    pub id: ObjectId,
    /// `Inline`, `InlineWithId` or `Allocate`; already written
    pub marker: Marker,
    pub mode: Mode,
}

impl WriteSlot {
    /// Whether only the allocation header is to be written
    #[inline]
    pub fn is_allocation(&self) -> bool {
        self.marker == Marker::Allocate
    }
}

/// Result of a successful write pass
#[derive(Debug)]
pub struct SnapshotOutput {
    pub bytes: Vec<u8>,
    /// Out-of-line blocks of a message; `None` for full snapshots
    pub finalizable_data: Option<MessageFinalizableData>,
    pub stats: PassStats,
}

/// Write pass state
pub struct SnapshotWriter<'g> {
    group: &'g IsolateGroup,
    kind: SnapshotKind,
    out: WriteStream,
    forward: ForwardTable,
    finalizable: Option<MessageFinalizableData>,
    depth: usize,
    max_depth: usize,
    stats: PassStats,
}

impl<'g> SnapshotWriter<'g> {
    pub fn new(group: &'g IsolateGroup, kind: SnapshotKind) -> Self {
        let config = group.config();
        Self {
            group,
            kind,
            out: WriteStream::with_capacity(config.initial_capacity),
            forward: ForwardTable::new(),
            finalizable: (kind == SnapshotKind::Message).then(MessageFinalizableData::new),
            depth: 0,
            max_depth: config.max_depth,
            stats: PassStats::default(),
        }
    }

    /// Serialize the graph reachable from `root`
    pub fn write_object(mut self, root: Value) -> Result<SnapshotOutput> {
        log_event(SnapshotEvent::PassStart {
            direction: PassDirection::Write,
            kind: self.kind,
        });

        if let Err(err) = self.write_root(root) {
            if let Some(mut data) = self.finalizable.take() {
                data.abandon();
            }
            log::warn!("{} write aborted: {}", self.kind, err);
            log_event(SnapshotEvent::PassAborted {
                direction: PassDirection::Write,
                kind: self.kind,
                reason: err.to_string(),
            });
            return Err(err);
        }

        self.stats.bytes = self.out.position() as u64;
        log_event(SnapshotEvent::PassEnd {
            direction: PassDirection::Write,
            kind: self.kind,
            objects: self.stats.objects,
            bytes: self.stats.bytes,
        });
        self.group.record_pass(&self.stats);

        Ok(SnapshotOutput {
            bytes: self.out.into_bytes(),
            finalizable_data: self.finalizable,
            stats: self.stats,
        })
    }

    fn write_root(&mut self, root: Value) -> Result<()> {
        header::write_preamble(&mut self.out, self.kind);
        self.write_value(root, Mode::Inline)?;

        while let Some((id, object)) = self.forward.next_deferred() {
            self.out.write_u8(Marker::InlineWithId as u8);
            self.out.write_uleb(id as u64);
            let kind = self.heap().kind_of(object)?;
            self.encode(
                kind,
                WriteSlot {
                    object,
                    id,
                    marker: Marker::InlineWithId,
                    mode: Mode::Inline,
                },
            )?;
            self.forward.set_state(id, VisitState::Materialized);
        }
        Ok(())
    }

    /// Write one slot value
    pub fn write_value(&mut self, value: Value, mode: Mode) -> Result<()> {
        match value {
            Value::Null => self.out.write_u8(Marker::Null as u8),
            Value::Bool(true) => self.out.write_u8(Marker::True as u8),
            Value::Bool(false) => self.out.write_u8(Marker::False as u8),
            Value::Smi(v) => {
                self.out.write_u8(Marker::Smi as u8);
                self.out.write_zigzag(v);
            },
            Value::Ref(object) => self.write_reference(object, mode)?,
        }
        Ok(())
    }

    fn write_reference(&mut self, object: ObjRef, mode: Mode) -> Result<()> {
        if let Some(id) = self.forward.lookup(object) {
            self.out.write_u8(Marker::BackRef as u8);
            self.out.write_uleb(id as u64);
            self.stats.back_references += 1;
            return Ok(());
        }

        let (kind, canonical) = {
            let obj = self.heap().get(object)?;
            (obj.kind, obj.canonical)
        };
        if self.kind == SnapshotKind::Message {
            boundary::check_message_object(self.group, object, kind)?;
        }

        let split = kind.is_split() && mode == Mode::Reference && !canonical;
        let (state, marker) = if split {
            (VisitState::Deferred, Marker::Allocate)
        } else {
            (VisitState::Visiting, Marker::Inline)
        };
        let (id, _) = self.forward.get_or_create_id(object, state);
        self.out.write_u8(marker as u8);

        self.encode(
            kind,
            WriteSlot {
                object,
                id,
                marker,
                mode,
            },
        )?;

        if split {
            self.stats.deferred += 1;
        } else {
            self.forward.set_state(id, VisitState::Materialized);
        }
        Ok(())
    }

    fn encode(&mut self, kind: ObjectKind, slot: WriteSlot) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(SnapshotError::DepthLimitExceeded {
                limit: self.max_depth,
            });
        }
        self.stats.max_depth = self.stats.max_depth.max(self.depth as u64);
        if !slot.is_allocation() {
            self.stats.objects += 1;
        }

        (codec_for(kind).encode)(self, slot)?;
        self.depth -= 1;
        Ok(())
    }

    // ========================================================================
    // CODEC SUPPORT
    // ========================================================================

    pub fn group(&self) -> &'g IsolateGroup {
        self.group
    }

    pub fn heap(&self) -> &'g Heap {
        self.group.heap()
    }

    pub fn kind(&self) -> SnapshotKind {
        self.kind
    }

    /// Output stream
    pub fn stream(&mut self) -> &mut WriteStream {
        &mut self.out
    }

    /// Write an object header
    pub fn write_header(&mut self, kind: ObjectKind, tag: TagByte) {
        header::write_header(&mut self.out, kind, tag);
    }

    /// Hand-off list of the message being written
    pub fn finalizable_data(&mut self, kind: ObjectKind) -> Result<&mut MessageFinalizableData> {
        self.finalizable.as_mut().ok_or_else(|| {
            SnapshotError::illegal(kind, "external buffers only travel in messages")
        })
    }

    pub fn stats_mut(&mut self) -> &mut PassStats {
        &mut self.stats
    }
}

/// Body of `obj` does not match its kind
pub(crate) fn body_mismatch(kind: ObjectKind) -> SnapshotError {
    SnapshotError::Internal(format!("{} object with a foreign body", kind))
}
