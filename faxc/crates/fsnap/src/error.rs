//! Error Module - Snapshot Error Types
//!
//! Defines all error types used by the snapshot engine.
//!
//! # Error Categories
//!
//! ## Stream Errors (read side)
//! - `StreamFormat` - Malformed header, unknown tag, dangling back-reference
//! - `UnreachableDecode` - A tag the writer never emits for this snapshot kind
//!
//! ## Policy Errors (write side)
//! - `IllegalTransfer` - Forbidden kind crossing an isolate boundary,
//!   re-transfer of an emptied buffer
//! - `DepthLimitExceeded` - Inline nesting deeper than configured
//!
//! ## Usage Errors
//! - `InvalidReference` - Dangling heap handle
//! - `InvalidState` - API used out of order
//! - `Configuration` - Invalid configuration
//! - `Internal` - Invariant violation inside the engine
//!
//! Every error aborts the whole pass. A write yields a complete stream or
//! nothing; a read yields a fully materialized graph or nothing.

use thiserror::Error;

use crate::config::ConfigError;
use crate::object::ObjectKind;
use crate::snapshot::SnapshotKind;

/// Main error type for all snapshot operations
///
/// # Examples
///
/// ```rust
/// use fsnap::error::SnapshotError;
///
/// fn handle_error(err: SnapshotError) {
///     match err {
///         SnapshotError::IllegalTransfer { kind, .. } => {
///             eprintln!("cannot send a {}", kind);
///         }
///         err if err.is_format_error() => {
///             eprintln!("corrupt input: {}", err);
///         }
///         _ => {
///             eprintln!("Other error: {}", err);
///         }
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Malformed stream
    ///
    /// **When returned:** A reader meets a bad preamble, an unknown marker or
    /// kind tag, a dangling back-reference, a truncated payload, a statically
    /// expected kind that does not match, or trailing bytes.
    ///
    /// **Recovery strategy:** None for the pass. The stream is discarded.
    #[error("Snapshot stream is corrupt at offset {offset}: {reason}")]
    StreamFormat { offset: usize, reason: String },

    /// Illegal argument in isolate message
    ///
    /// **When returned:** The writer reaches a forbidden kind, a closure that
    /// is not a static implicit closure, an instance of an unsendable class,
    /// or a transferable buffer whose peer was already emptied.
    ///
    /// **Recovery strategy:** Catchable. The caller removes the offending
    /// object from the graph and retries.
    #[error("Illegal argument in isolate message: (object is a {kind}) {reason}")]
    IllegalTransfer { kind: ObjectKind, reason: String },

    /// Decode of a kind no correct writer emits
    ///
    /// **When returned:** A forbidden kind tag, or a message-only kind inside
    /// a full snapshot (and vice versa), shows up in the stream.
    ///
    /// **Recovery strategy:** Cannot recover - writer and reader disagree
    ///
    /// **Action required:** Report with the producing runtime version
    #[error("Unreachable decode of {kind} in a {snapshot} snapshot")]
    UnreachableDecode {
        kind: ObjectKind,
        snapshot: SnapshotKind,
    },

    /// Inline nesting limit reached
    ///
    /// **When returned:** The writer recursed through more inline-only
    /// objects than `SnapshotConfig::max_depth` allows.
    ///
    /// **Recovery strategy:** Raise the limit or restructure the graph
    #[error("Object graph nests deeper than {limit} inline levels")]
    DepthLimitExceeded { limit: usize },

    /// Dangling heap handle
    ///
    /// **When returned:** An object handle points at a freed or never
    /// allocated heap slot.
    ///
    /// **Recovery strategy:** Fix the caller; the handle outlived its object
    #[error("Invalid object reference: slot {index}")]
    InvalidReference { index: usize },

    /// Invalid state
    ///
    /// **When returned:** An API is used out of order, e.g. reading an
    /// uncommitted message or enqueueing postprocessing outside a read pass.
    ///
    /// **Recovery strategy:** Cannot recover - indicates a caller bug
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Configuration error
    ///
    /// **When returned:** `SnapshotConfig::validate` rejects a value
    ///
    /// **Recovery strategy:** Use default configuration or fail fast
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error - indicates a bug in the engine
    ///
    /// **When returned:** Invariant violation or unexpected state
    ///
    /// **Recovery strategy:** Cannot recover - this is a bug
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapshotError {
    /// Build a format error at a stream offset.
    pub fn format(offset: usize, reason: impl Into<String>) -> Self {
        SnapshotError::StreamFormat {
            offset,
            reason: reason.into(),
        }
    }

    /// Build an illegal-transfer error for a kind.
    pub fn illegal(kind: ObjectKind, reason: impl Into<String>) -> Self {
        SnapshotError::IllegalTransfer {
            kind,
            reason: reason.into(),
        }
    }

    /// Check if this error reports corrupt input
    pub fn is_format_error(&self) -> bool {
        matches!(self, SnapshotError::StreamFormat { .. })
    }

    /// Check if this error is a catchable argument error
    ///
    /// Catchable errors describe the object graph handed to the writer, not
    /// the engine or the stream.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            SnapshotError::IllegalTransfer { .. } | SnapshotError::DepthLimitExceeded { .. }
        )
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            SnapshotError::UnreachableDecode { .. }
                | SnapshotError::InvalidState { .. }
                | SnapshotError::Internal(_)
        )
    }
}

impl From<ConfigError> for SnapshotError {
    fn from(err: ConfigError) -> Self {
        SnapshotError::Configuration(err.to_string())
    }
}

/// Result type alias for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Ensure condition is true, otherwise return error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
