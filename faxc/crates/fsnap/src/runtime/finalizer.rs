//! Finalizers
//!
//! Two registries live here:
//!
//! - [`Finalizer`]: per-object callbacks the heap runs when it frees an
//!   object. The reader attaches one to every object materialized over an
//!   external block, so the block's size leaves the heap's external
//!   accounting when the object dies.
//! - [`MessageFinalizableData`]: the hand-off list of out-of-heap blocks that
//!   travel beside a message's bytes (`Put` on the writer side, `Take` on the
//!   reader side). Every entry carries an on-success and an on-failure
//!   callback; exactly one of them runs.
//!
//! ```text
//!   writer ── put ──► [Pending] ── commit ──► [Committed] ── take ──► reader
//!                         │
//!                         └──── abandon / drop ──► on_failure for every entry
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SnapshotError};
use crate::object::ObjRef;
use crate::snapshot::external::{ExternalBlock, TransferablePeer};

// ============================================================================
// OBJECT FINALIZERS
// ============================================================================

/// Finalizer - per-object cleanup callbacks
pub struct Finalizer {
    /// Registered finalizers
    entries: Mutex<Vec<FinalizerEntry>>,

    /// Pending finalizers count
    pending_count: AtomicUsize,

    /// Finalizers run so far
    completed: AtomicUsize,
}

impl Finalizer {
    /// Create new finalizer
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            pending_count: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Register finalizer for an object
    ///
    /// # Arguments
    /// * `object` - Object handle
    /// * `finalizer_fn` - Runs once, when the object is freed
    pub fn register<F>(&self, object: ObjRef, finalizer_fn: F)
    where
        F: FnOnce(ObjRef) + Send + 'static,
    {
        self.entries.lock().push(FinalizerEntry {
            object,
            finalizer_fn: Box::new(finalizer_fn),
        });
        self.pending_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Run and drop every finalizer registered for `object`
    ///
    /// Callbacks run after the registry lock is released, so a finalizer may
    /// register new finalizers.
    pub fn run_for(&self, object: ObjRef) -> usize {
        let due: Vec<FinalizerEntry> = {
            let mut entries = self.entries.lock();
            let mut due = Vec::new();
            let mut i = 0;
            while i < entries.len() {
                if entries[i].object == object {
                    due.push(entries.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            due
        };

        let count = due.len();
        for entry in due {
            (entry.finalizer_fn)(entry.object);
        }
        self.pending_count.fetch_sub(count, Ordering::Relaxed);
        self.completed.fetch_add(count, Ordering::Relaxed);
        count
    }

    /// Get pending finalizers count
    pub fn pending_count(&self) -> usize {
        self.pending_count.load(Ordering::Relaxed)
    }

    /// Check if there are pending finalizers
    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Number of finalizers that have run
    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Finalizer entry
struct FinalizerEntry {
    /// Object handle
    object: ObjRef,
    /// Finalizer function
    finalizer_fn: Box<dyn FnOnce(ObjRef) + Send>,
}

// ============================================================================
// MESSAGE FINALIZABLE DATA
// ============================================================================

/// Callback run on a hand-off entry when its message commits or aborts
pub type HandoffCallback = Box<dyn FnOnce(&mut FinalizableData) + Send>;

/// One out-of-heap block travelling with a message
pub struct FinalizableData {
    /// Length in bytes
    pub length: usize,
    /// The block; for zero-copy transfers it is moved in on commit
    pub data: Option<ExternalBlock>,
    /// Sender-side owner token of a zero-copy transfer
    pub peer: Option<Arc<TransferablePeer>>,
    on_failure: Option<HandoffCallback>,
    on_success: Option<HandoffCallback>,
}

impl fmt::Debug for FinalizableData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizableData")
            .field("length", &self.length)
            .field("has_data", &self.data.is_some())
            .field("has_peer", &self.peer.is_some())
            .finish()
    }
}

/// Lifecycle of a message's hand-off list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffState {
    /// Written, not yet sent
    Pending,
    /// Send succeeded; blocks belong to the message
    Committed,
    /// Send failed or was dropped; on-failure callbacks ran
    Abandoned,
}

impl fmt::Display for HandoffState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandoffState::Pending => "pending",
            HandoffState::Committed => "committed",
            HandoffState::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// Finalizer registry of one message
///
/// Dropping a pending registry abandons it.
pub struct MessageFinalizableData {
    entries: VecDeque<FinalizableData>,
    state: HandoffState,
}

impl MessageFinalizableData {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            state: HandoffState::Pending,
        }
    }

    /// Hand a block (or a peer that still owns it) to the message (`Put`)
    pub fn put(
        &mut self,
        length: usize,
        data: Option<ExternalBlock>,
        peer: Option<Arc<TransferablePeer>>,
        on_failure: HandoffCallback,
        on_success: HandoffCallback,
    ) {
        debug_assert_eq!(self.state, HandoffState::Pending);
        self.entries.push_back(FinalizableData {
            length,
            data,
            peer,
            on_failure: Some(on_failure),
            on_success: Some(on_success),
        });
    }

    /// Next block in put order (`Take`)
    pub fn take(&mut self) -> Result<FinalizableData> {
        if self.state != HandoffState::Committed {
            return Err(SnapshotError::InvalidState {
                expected: HandoffState::Committed.to_string(),
                actual: self.state.to_string(),
            });
        }
        let entry = self.entries.pop_front().ok_or_else(|| {
            SnapshotError::format(0, "message carries fewer external blocks than it references")
        })?;
        if entry.data.is_none() {
            return Err(SnapshotError::Internal(
                "committed hand-off entry without a block".to_string(),
            ));
        }
        Ok(entry)
    }

    /// Run every on-success callback; the send went through
    pub fn commit(&mut self) {
        if self.state != HandoffState::Pending {
            return;
        }
        for entry in self.entries.iter_mut() {
            entry.on_failure = None;
            if let Some(callback) = entry.on_success.take() {
                callback(entry);
            }
        }
        self.state = HandoffState::Committed;
    }

    /// Run every on-failure callback and drop the entries
    pub fn abandon(&mut self) {
        if self.state != HandoffState::Pending {
            return;
        }
        for mut entry in self.entries.drain(..) {
            entry.on_success = None;
            if let Some(callback) = entry.on_failure.take() {
                callback(&mut entry);
            }
        }
        self.state = HandoffState::Abandoned;
    }

    /// Check whether a peer is already part of this message
    pub fn contains_peer(&self, peer: &Arc<TransferablePeer>) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.peer.as_ref().is_some_and(|p| Arc::ptr_eq(p, peer)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> HandoffState {
        self.state
    }
}

impl Default for MessageFinalizableData {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MessageFinalizableData {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl fmt::Debug for MessageFinalizableData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFinalizableData")
            .field("entries", &self.entries.len())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn noop() -> HandoffCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_finalizer_runs_once_per_object() {
        let finalizer = Finalizer::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            finalizer.register(ObjRef(3), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        finalizer.register(ObjRef(4), |_| {});

        assert_eq!(finalizer.pending_count(), 3);
        assert_eq!(finalizer.run_for(ObjRef(3)), 2);
        assert_eq!(finalizer.run_for(ObjRef(3)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(finalizer.pending_count(), 1);
        assert_eq!(finalizer.completed_count(), 2);
    }

    #[test]
    fn test_take_requires_commit() {
        let mut registry = MessageFinalizableData::new();
        registry.put(1, Some(vec![7u8].into_boxed_slice()), None, noop(), noop());
        assert!(matches!(
            registry.take(),
            Err(SnapshotError::InvalidState { .. })
        ));

        registry.commit();
        let entry = registry.take().unwrap();
        assert_eq!(entry.data.as_deref(), Some(&[7u8][..]));
        assert!(registry.take().unwrap_err().is_format_error());
    }

    #[test]
    fn test_exactly_one_callback_runs() {
        let failed = Arc::new(AtomicBool::new(false));
        let succeeded = Arc::new(AtomicBool::new(false));

        let mut registry = MessageFinalizableData::new();
        {
            let failed = Arc::clone(&failed);
            let succeeded = Arc::clone(&succeeded);
            registry.put(
                0,
                Some(Vec::new().into_boxed_slice()),
                None,
                Box::new(move |_| failed.store(true, Ordering::SeqCst)),
                Box::new(move |_| succeeded.store(true, Ordering::SeqCst)),
            );
        }
        registry.commit();
        registry.abandon();
        drop(registry);

        assert!(succeeded.load(Ordering::SeqCst));
        assert!(!failed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_abandons_pending() {
        let failed = Arc::new(AtomicBool::new(false));
        {
            let mut registry = MessageFinalizableData::new();
            let failed = Arc::clone(&failed);
            registry.put(
                0,
                None,
                None,
                Box::new(move |_| failed.store(true, Ordering::SeqCst)),
                noop(),
            );
        }
        assert!(failed.load(Ordering::SeqCst));
    }
}
