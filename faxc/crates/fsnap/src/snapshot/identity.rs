//! Identity Table
//!
//! Per-pass mapping between objects and dense stream-local ids. Ids are
//! assigned in visit order, starting at 0, and never reused within a pass.
//!
//! - Writer side ([`ForwardTable`]): object → id plus traversal state. Split
//!   kinds first reached in reference mode stay *deferred* until the forward
//!   list is drained after the root.
//! - Reader side ([`BackRefTable`]): id → value. An id is reserved when its
//!   marker is read and bound right after its header, before any child, so
//!   cycles resolve to the (possibly still filling) ancestor.

use rustc_hash::FxHashMap;

use crate::error::{Result, SnapshotError};
use crate::object::{ObjRef, Value};

/// Stream-local object id
pub type ObjectId = u32;

/// Writer-side traversal state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisitState {
    /// Allocation header written; body waits on the forward list
    Deferred,
    /// Body being written
    Visiting,
    /// Body written
    Materialized,
}

#[derive(Debug)]
struct ForwardEntry {
    object: ObjRef,
    state: VisitState,
}

/// Writer identity table and forward list
#[derive(Debug, Default)]
pub struct ForwardTable {
    ids: FxHashMap<ObjRef, ObjectId>,
    entries: Vec<ForwardEntry>,
    /// Forward-list cursor: entries before it are not deferred
    first_unprocessed: usize,
}

impl ForwardTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `object`, assigning the next id on first visit
    ///
    /// Returns `(id, is_new)`.
    pub fn get_or_create_id(&mut self, object: ObjRef, state: VisitState) -> (ObjectId, bool) {
        if let Some(&id) = self.ids.get(&object) {
            return (id, false);
        }
        let id = self.entries.len() as ObjectId;
        self.ids.insert(object, id);
        self.entries.push(ForwardEntry { object, state });
        (id, true)
    }

    /// Id of an already visited object
    pub fn lookup(&self, object: ObjRef) -> Option<ObjectId> {
        self.ids.get(&object).copied()
    }

    pub fn state(&self, id: ObjectId) -> Option<VisitState> {
        self.entries.get(id as usize).map(|entry| entry.state)
    }

    pub fn set_state(&mut self, id: ObjectId, state: VisitState) {
        if let Some(entry) = self.entries.get_mut(id as usize) {
            entry.state = state;
        }
    }

    /// Next deferred object in id order, now marked visiting
    pub fn next_deferred(&mut self) -> Option<(ObjectId, ObjRef)> {
        while self.first_unprocessed < self.entries.len() {
            let id = self.first_unprocessed;
            self.first_unprocessed += 1;
            let entry = &mut self.entries[id];
            if entry.state == VisitState::Deferred {
                entry.state = VisitState::Visiting;
                return Some((id as ObjectId, entry.object));
            }
        }
        None
    }

    /// Number of ids assigned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of objects still waiting on the forward list
    pub fn deferred_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.state == VisitState::Deferred)
            .count()
    }
}

/// Reader-side binding state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindState {
    /// Placeholder allocated from an allocation header; body pending
    Allocated,
    /// Body read
    Materialized,
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Reserved,
    Bound { value: Value, state: BindState },
}

/// Reader identity table
#[derive(Debug, Default)]
pub struct BackRefTable {
    slots: Vec<Slot>,
    pending: usize,
}

impl BackRefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next id
    pub fn reserve(&mut self) -> ObjectId {
        self.slots.push(Slot::Reserved);
        (self.slots.len() - 1) as ObjectId
    }

    /// Id the next reservation will get
    pub fn next_id(&self) -> ObjectId {
        self.slots.len() as ObjectId
    }

    /// Bind a reserved id
    pub fn bind(&mut self, id: ObjectId, value: Value, state: BindState) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id as usize)
            .ok_or_else(|| SnapshotError::Internal(format!("bind of unreserved id {}", id)))?;
        if !matches!(slot, Slot::Reserved) {
            return Err(SnapshotError::Internal(format!("id {} bound twice", id)));
        }
        *slot = Slot::Bound { value, state };
        if state == BindState::Allocated {
            self.pending += 1;
        }
        Ok(())
    }

    /// Point an id at another value, keeping its state
    ///
    /// Used when canonicalization replaces a freshly decoded object.
    pub fn rebind(&mut self, id: ObjectId, value: Value) -> Result<()> {
        match self.slots.get_mut(id as usize) {
            Some(Slot::Bound { value: bound, .. }) => {
                *bound = value;
                Ok(())
            },
            _ => Err(SnapshotError::Internal(format!("rebind of unbound id {}", id))),
        }
    }

    /// Mark an allocated placeholder as filled
    pub fn materialize(&mut self, id: ObjectId) -> Result<()> {
        match self.slots.get_mut(id as usize) {
            Some(Slot::Bound { state, .. }) if *state == BindState::Allocated => {
                *state = BindState::Materialized;
                self.pending -= 1;
                Ok(())
            },
            _ => Err(SnapshotError::Internal(format!(
                "materialize of id {} that is not allocated",
                id
            ))),
        }
    }

    /// Value bound to an id (`Resolve`)
    ///
    /// An unknown or still reserved id is a dangling back-reference.
    pub fn resolve(&self, id: ObjectId, offset: usize) -> Result<Value> {
        match self.slots.get(id as usize) {
            Some(Slot::Bound { value, .. }) => Ok(*value),
            _ => Err(SnapshotError::format(
                offset,
                format!("dangling back-reference to id {}", id),
            )),
        }
    }

    /// Binding state of an id, `None` when unbound
    pub fn state(&self, id: ObjectId) -> Option<BindState> {
        match self.slots.get(id as usize) {
            Some(Slot::Bound { state, .. }) => Some(*state),
            _ => None,
        }
    }

    /// Whether an id has been bound
    pub fn is_bound(&self, id: ObjectId) -> bool {
        self.state(id).is_some()
    }

    /// Number of placeholders still waiting for their body
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_dense_and_stable() {
        let mut table = ForwardTable::new();
        let (a, new_a) = table.get_or_create_id(ObjRef(10), VisitState::Visiting);
        let (b, new_b) = table.get_or_create_id(ObjRef(3), VisitState::Deferred);
        let (a2, new_a2) = table.get_or_create_id(ObjRef(10), VisitState::Visiting);

        assert_eq!((a, b), (0, 1));
        assert!(new_a && new_b && !new_a2);
        assert_eq!(a, a2);
        assert_eq!(table.lookup(ObjRef(3)), Some(1));
        assert_eq!(table.lookup(ObjRef(4)), None);
    }

    #[test]
    fn test_forward_list_in_id_order() {
        let mut table = ForwardTable::new();
        table.get_or_create_id(ObjRef(0), VisitState::Visiting);
        table.get_or_create_id(ObjRef(1), VisitState::Deferred);
        table.get_or_create_id(ObjRef(2), VisitState::Deferred);
        assert_eq!(table.deferred_count(), 2);

        assert_eq!(table.next_deferred(), Some((1, ObjRef(1))));
        // Deferred while draining
        table.get_or_create_id(ObjRef(3), VisitState::Deferred);
        assert_eq!(table.next_deferred(), Some((2, ObjRef(2))));
        assert_eq!(table.next_deferred(), Some((3, ObjRef(3))));
        assert_eq!(table.next_deferred(), None);
        assert_eq!(table.state(1), Some(VisitState::Visiting));
    }

    #[test]
    fn test_reserved_id_is_dangling() {
        let mut table = BackRefTable::new();
        let id = table.reserve();
        assert!(table.resolve(id, 7).unwrap_err().is_format_error());
        assert!(table.resolve(99, 7).is_err());

        table.bind(id, Value::Smi(1), BindState::Materialized).unwrap();
        assert_eq!(table.resolve(id, 7).unwrap(), Value::Smi(1));
        assert!(table.bind(id, Value::Null, BindState::Materialized).is_err());
    }

    #[test]
    fn test_allocated_bindings_are_pending() {
        let mut table = BackRefTable::new();
        let id = table.reserve();
        table.bind(id, Value::Ref(ObjRef(5)), BindState::Allocated).unwrap();
        assert_eq!(table.pending(), 1);

        table.materialize(id).unwrap();
        assert_eq!(table.pending(), 0);
        assert!(table.materialize(id).is_err());

        table.rebind(id, Value::Ref(ObjRef(6))).unwrap();
        assert_eq!(table.resolve(id, 0).unwrap(), Value::Ref(ObjRef(6)));
        assert_eq!(table.state(id), Some(BindState::Materialized));
    }
}
