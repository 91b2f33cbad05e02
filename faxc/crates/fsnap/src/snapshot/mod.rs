//! Snapshot Engine
//!
//! Converts a live object graph into a byte stream and back.
//!
//! ```text
//!            write pass                              read pass
//!  root ──► SnapshotWriter ──► bytes ──► SnapshotReader ──► root'
//!              │   ▲                          │   ▲
//!   boundary ◄─┘   │ dispatch table ─────────►│   │
//!   policy         │ (encode/decode per kind) │   │
//!              ForwardTable                BackRefTable
//!              forward list                canonical table
//!              finalizable data ──────────► postprocessing queue
//! ```
//!
//! Two snapshot kinds share the machinery:
//!
//! - [`SnapshotKind::Full`]: persisted heap images. Metadata (classes,
//!   functions, code) travels as table ids; buffers are always inline.
//! - [`SnapshotKind::Message`]: one inter-isolate message. Runtime-internal
//!   kinds are rejected; large buffers may leave the stream through the
//!   message's finalizable data.

pub mod boundary;
pub mod canonical;
pub mod codecs;
pub mod dispatch;
pub mod external;
pub mod header;
pub mod identity;
pub mod postprocess;
pub mod reader;
pub mod stream;
pub mod writer;

use std::fmt;

pub use canonical::CanonicalTable;
pub use external::{ExternalBlock, TransferablePeer};
pub use identity::ObjectId;
pub use postprocess::{DrainSummary, PostprocessKind};
pub use reader::SnapshotReader;
pub use writer::{SnapshotOutput, SnapshotWriter};

use crate::error::{Result, SnapshotError};
use crate::object::ObjectKind;
use header::Marker;
use stream::ReadStream;

/// Kind of snapshot a pass reads or writes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    /// Persisted heap image
    Full,
    /// Inter-isolate message
    Message,
}

impl SnapshotKind {
    /// Preamble code
    pub fn code(self) -> u8 {
        match self {
            SnapshotKind::Full => 0,
            SnapshotKind::Message => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<SnapshotKind> {
        match code {
            0 => Some(SnapshotKind::Full),
            1 => Some(SnapshotKind::Message),
            _ => None,
        }
    }

    /// Whether every non-forbidden kind may be written, metadata included
    pub fn can_send_any_object(self) -> bool {
        self == SnapshotKind::Full
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotKind::Full => f.write_str("full"),
            SnapshotKind::Message => f.write_str("message"),
        }
    }
}

/// Inline-vs-reference mode of one child slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// The child is written in full at this position
    Inline,
    /// The child may be a back-reference or a split allocation header
    Reference,
}

/// Snapshot kind of a stream and kind of its root object
///
/// The root kind is `None` for immediates.
pub fn peek_root_kind(bytes: &[u8]) -> Result<(SnapshotKind, Option<ObjectKind>)> {
    let mut input = ReadStream::new(bytes);
    let snapshot = header::read_preamble_kind(&mut input)?;
    let at = input.position();
    let marker = input.read_u8()?;
    match Marker::from_u8(marker) {
        Some(Marker::Null | Marker::True | Marker::False | Marker::Smi) => Ok((snapshot, None)),
        Some(Marker::Inline | Marker::Allocate) => {
            let (kind, _) = header::read_header(&mut input)?;
            Ok((snapshot, Some(kind)))
        },
        Some(Marker::BackRef | Marker::InlineWithId) => Err(SnapshotError::format(
            at,
            "root must be a fresh object or an immediate",
        )),
        None => Err(SnapshotError::format(at, format!("unknown marker {}", marker))),
    }
}
