//! Runtime Module - Isolate Group Integration
//!
//! An isolate group bundles what every pass of the group shares:
//! - The heap the graphs live in
//! - The canonical table
//! - The class table and stub generator collaborators
//! - Running pass statistics
//!
//! Passes borrow the group immutably, so any number of them may run in
//! parallel on different threads.

pub mod finalizer;
pub mod safepoint;

pub use finalizer::{Finalizer, HandoffState, MessageFinalizableData};
pub use safepoint::{NoSafepointScope, Safepoint};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::SnapshotConfig;
use crate::error::{Result, SnapshotError};
use crate::object::{
    ClassTable, DefaultStubGenerator, Heap, ObjRef, StubGenerator, Value,
};
use crate::snapshot::{canonical, CanonicalTable, SnapshotKind, SnapshotReader, SnapshotWriter};
use crate::stats::PassStats;

/// Isolate group - shared state of all snapshot passes
///
/// # Examples
///
/// ```rust
/// use fsnap::{IsolateGroup, Value};
/// use fsnap::object::StaticClassTable;
/// use std::sync::Arc;
///
/// let group = IsolateGroup::new(Arc::new(StaticClassTable::new()));
/// let text = group.heap().new_string("hello");
///
/// let bytes = group.write_snapshot(Value::Ref(text)).unwrap();
/// let copy = group.read_snapshot(&bytes).unwrap();
/// let copy = copy.as_obj().unwrap();
/// assert_ne!(copy, text);
/// assert_eq!(group.heap().string_value(copy).unwrap(), "hello");
/// ```
pub struct IsolateGroup {
    heap: Heap,
    canonical: CanonicalTable,
    classes: Arc<dyn ClassTable>,
    stubs: Arc<dyn StubGenerator>,
    config: SnapshotConfig,
    totals: Mutex<PassStats>,
}

impl IsolateGroup {
    /// Group with the default configuration and stub generator
    pub fn new<C>(classes: Arc<C>) -> Self
    where
        C: ClassTable + 'static,
    {
        let config = SnapshotConfig::default();
        Self {
            heap: Heap::with_capacity(config.initial_capacity / 16),
            canonical: CanonicalTable::new(),
            classes,
            stubs: Arc::new(DefaultStubGenerator::new()),
            config,
            totals: Mutex::new(PassStats::default()),
        }
    }

    /// Group with explicit configuration and collaborators
    pub fn with_config<C, S>(config: SnapshotConfig, classes: Arc<C>, stubs: Arc<S>) -> Result<Self>
    where
        C: ClassTable + 'static,
        S: StubGenerator + 'static,
    {
        config
            .validate()
            .map_err(|e| SnapshotError::Configuration(e.to_string()))?;
        Ok(Self {
            heap: Heap::with_capacity(config.initial_capacity / 16),
            canonical: CanonicalTable::new(),
            classes,
            stubs,
            config,
            totals: Mutex::new(PassStats::default()),
        })
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn canonical(&self) -> &CanonicalTable {
        &self.canonical
    }

    pub fn classes(&self) -> &dyn ClassTable {
        self.classes.as_ref()
    }

    pub fn stubs(&self) -> &dyn StubGenerator {
        self.stubs.as_ref()
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    // ========================================================================
    // PASSES
    // ========================================================================

    /// Write a full snapshot of the graph under `root`
    pub fn write_snapshot(&self, root: Value) -> Result<Vec<u8>> {
        Ok(SnapshotWriter::new(self, SnapshotKind::Full)
            .write_object(root)?
            .bytes)
    }

    /// Read a full snapshot into this group's heap
    pub fn read_snapshot(&self, bytes: &[u8]) -> Result<Value> {
        SnapshotReader::new(self, bytes, SnapshotKind::Full).read_object()
    }

    /// Write an inter-isolate message
    ///
    /// The message is pending until [`Message::commit`]; dropping it first
    /// releases every block it holds and leaves transferables untouched.
    pub fn write_message(&self, root: Value) -> Result<Message> {
        let output = SnapshotWriter::new(self, SnapshotKind::Message).write_object(root)?;
        let finalizable_data = output.finalizable_data.ok_or_else(|| {
            SnapshotError::Internal("message written without finalizable data".to_string())
        })?;
        Ok(Message {
            bytes: output.bytes,
            finalizable_data,
        })
    }

    /// Read a committed message into this group's heap
    pub fn read_message(&self, message: Message) -> Result<Value> {
        if !message.is_committed() {
            return Err(SnapshotError::InvalidState {
                expected: HandoffState::Committed.to_string(),
                actual: message.finalizable_data.state().to_string(),
            });
        }
        let Message {
            bytes,
            finalizable_data,
        } = message;
        SnapshotReader::new(self, &bytes, SnapshotKind::Message)
            .with_finalizable_data(finalizable_data)
            .read_object()
    }

    /// Fold one finished pass into the group totals
    pub fn record_pass(&self, stats: &PassStats) {
        if self.config.verbose {
            log::info!(
                "snapshot pass: {} objects, {} bytes, {} back-references",
                stats.objects,
                stats.bytes,
                stats.back_references
            );
        }
        if self.config.stats_enabled {
            self.totals.lock().merge(stats);
        }
    }

    /// Totals of every successful pass so far
    pub fn stats(&self) -> PassStats {
        self.totals.lock().clone()
    }

    // ========================================================================
    // HEAP SERVICES
    // ========================================================================

    /// Canonical instance equal to `obj`, interning `obj` if none exists
    ///
    /// Reachable objects are interned first; see [`canonical::intern_graph`].
    pub fn intern(&self, obj: ObjRef) -> Result<ObjRef> {
        Ok(canonical::intern_graph(&self.heap, self.classes(), &self.canonical, obj)?.0)
    }

    /// Allocate a hashed map
    pub fn new_map(&self, entries: Vec<(Value, Value)>) -> Result<ObjRef> {
        self.heap.new_map(self.classes(), entries)
    }

    /// Rebuild a map's hash index
    pub fn rehash_map(&self, map: ObjRef) -> Result<()> {
        self.heap.rehash_map(self.classes(), map)
    }

    /// Look a key up in a hashed map
    pub fn map_get(&self, map: ObjRef, key: Value) -> Result<Option<Value>> {
        self.heap.map_get(self.classes(), map, key)
    }
}

/// Inter-isolate message: stream bytes plus out-of-line blocks
#[derive(Debug)]
pub struct Message {
    bytes: Vec<u8>,
    finalizable_data: MessageFinalizableData,
}

impl Message {
    /// Mark the send as delivered
    ///
    /// Transferred buffers move into the message here; their source objects
    /// read as empty afterwards.
    pub fn commit(&mut self) {
        self.finalizable_data.commit();
    }

    pub fn is_committed(&self) -> bool {
        self.finalizable_data.state() == HandoffState::Committed
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of out-of-line blocks
    pub fn external_blocks(&self) -> usize {
        self.finalizable_data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StaticClassTable;

    fn group() -> IsolateGroup {
        IsolateGroup::new(Arc::new(StaticClassTable::new()))
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SnapshotConfig {
            max_depth: 0,
            ..Default::default()
        };
        let result = IsolateGroup::with_config(
            config,
            Arc::new(StaticClassTable::new()),
            Arc::new(DefaultStubGenerator::new()),
        );
        assert!(matches!(result, Err(SnapshotError::Configuration(_))));
    }

    #[test]
    fn test_uncommitted_message_is_invalid_state() {
        let group = group();
        let message = group.write_message(Value::Smi(3)).unwrap();
        assert!(!message.is_committed());
        assert!(matches!(
            group.read_message(message),
            Err(SnapshotError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_committed_message_reads_back() {
        let group = group();
        let mut message = group.write_message(Value::Bool(true)).unwrap();
        message.commit();
        assert_eq!(message.external_blocks(), 0);
        assert_eq!(group.read_message(message).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_totals_accumulate() {
        let group = group();
        let text = group.heap().new_string("x");
        group.write_snapshot(Value::Ref(text)).unwrap();
        group.write_snapshot(Value::Ref(text)).unwrap();
        assert_eq!(group.stats().objects, 2);
    }

    #[test]
    fn test_intern_returns_first_equal_object() {
        let group = group();
        let a = group.heap().new_string("same");
        let b = group.heap().new_string("same");
        assert_eq!(group.intern(a).unwrap(), a);
        assert_eq!(group.intern(b).unwrap(), a);
    }
}
