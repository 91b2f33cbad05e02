//! Deferred Postprocessing Queue
//!
//! Objects whose invariants need the fully materialized graph:
//!
//! - type-system values get their type-testing stub once every child type
//!   reference has resolved,
//! - non-canonical maps get their hash index once every key has been filled
//!   in, including keys written later through the forward list.
//!
//! The queue is FIFO and drains exactly once, after the root is decoded.

use std::collections::VecDeque;

use crate::error::{Result, SnapshotError};
use crate::object::{ObjRef, ObjectBody};
use crate::runtime::IsolateGroup;

/// Fix-up to run on a decoded object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostprocessKind {
    TypeTestingStub,
    MapRehash,
}

/// Counts of fix-ups run by one drain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub types: usize,
    pub maps: usize,
}

impl DrainSummary {
    pub fn total(&self) -> usize {
        self.types + self.maps
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueueState {
    Open,
    Draining,
    Drained,
}

/// FIFO of pending fix-ups
#[derive(Debug)]
pub struct PostprocessQueue {
    entries: VecDeque<(ObjRef, PostprocessKind)>,
    state: QueueState,
}

impl PostprocessQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            state: QueueState::Open,
        }
    }

    /// Record a fix-up
    pub fn enqueue(&mut self, obj: ObjRef, kind: PostprocessKind) -> Result<()> {
        if self.state != QueueState::Open {
            return Err(SnapshotError::InvalidState {
                expected: "open postprocessing queue".to_string(),
                actual: format!("{:?} queue", self.state).to_lowercase(),
            });
        }
        self.entries.push_back((obj, kind));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every fix-up in FIFO order
    pub fn drain(&mut self, group: &IsolateGroup) -> Result<DrainSummary> {
        if self.state != QueueState::Open {
            return Err(SnapshotError::InvalidState {
                expected: "open postprocessing queue".to_string(),
                actual: "drained queue".to_string(),
            });
        }
        self.state = QueueState::Draining;

        let mut summary = DrainSummary::default();
        while let Some((obj, kind)) = self.entries.pop_front() {
            match kind {
                PostprocessKind::TypeTestingStub => {
                    attach_testing_stub(group, obj)?;
                    summary.types += 1;
                },
                PostprocessKind::MapRehash => {
                    group.rehash_map(obj)?;
                    summary.maps += 1;
                },
            }
        }

        self.state = QueueState::Drained;
        Ok(summary)
    }
}

impl Default for PostprocessQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn attach_testing_stub(group: &IsolateGroup, ty: ObjRef) -> Result<()> {
    let code = group.stubs().default_code_for_type(group.heap(), ty)?;
    let mut object = group.heap().get_mut(ty)?;
    let kind = object.kind;
    match &mut object.body {
        ObjectBody::Type(data) => data.testing_stub = Some(code),
        ObjectBody::TypeRef(data) => data.testing_stub = Some(code),
        ObjectBody::TypeParameter(data) => data.testing_stub = Some(code),
        _ => {
            return Err(SnapshotError::Internal(format!(
                "type-testing stub queued for a {}",
                kind
            )))
        },
    }
    Ok(())
}
