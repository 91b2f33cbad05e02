//! Canonical table
//!
//! Isolate-group-wide set of interned objects, keyed by [`ObjectShape`].
//! Children of canonical objects are canonical themselves, so a shape's child
//! handles already identify their subgraphs. [`intern_graph`] establishes
//! that for values built by running code.
//!
//! The table only grows. `insert_if_absent` is the single entry point that
//! adds entries; it is atomic under concurrent read passes, so two passes
//! canonicalizing equal values end up with one instance.

use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Result, SnapshotError};
use crate::logging::{log_event, SnapshotEvent};
use crate::object::{ClassTable, Heap, ObjRef, ObjectKind, ObjectShape, Value};

/// Canonical table
pub struct CanonicalTable {
    map: DashMap<ObjectShape, ObjRef, RandomState>,

    /// Number of lookups that found an existing instance
    hits: AtomicUsize,

    /// Number of candidates that became the canonical instance
    misses: AtomicUsize,
}

impl CanonicalTable {
    pub fn new() -> Self {
        Self {
            map: DashMap::with_capacity_and_hasher(256, RandomState::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Return the instance for `key`, installing `candidate` if there is none
    ///
    /// A losing candidate is left to the caller; it is not freed here since
    /// other handles to it may exist.
    pub fn insert_if_absent(&self, key: ObjectShape, candidate: ObjRef) -> ObjRef {
        // Fast path: already interned
        if let Some(existing) = self.map.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return *existing;
        }

        match self.map.entry(key) {
            Entry::Occupied(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                *entry.get()
            },
            Entry::Vacant(entry) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                entry.insert(candidate);
                candidate
            },
        }
    }

    /// Instance for `key`, if interned
    pub fn lookup(&self, key: &ObjectShape) -> Option<ObjRef> {
        self.map.get(key).map(|entry| *entry)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for CanonicalTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Intern a fully populated object
///
/// Sets the canonical flag on the winner. Returns the canonical instance and
/// whether it was already present.
pub fn intern(heap: &Heap, table: &CanonicalTable, obj: ObjRef) -> Result<(ObjRef, bool)> {
    let (kind, shape) = {
        let object = heap.get(obj)?;
        (object.kind, object.shape())
    };
    let winner = table.insert_if_absent(shape, obj);
    if winner == obj {
        heap.set_canonical(obj, true)?;
        Ok((obj, false))
    } else {
        log::trace!("canonical hit for {}", kind);
        log_event(SnapshotEvent::Canonicalized { kind, hit: true });
        Ok((winner, true))
    }
}

/// Intern `obj` together with the objects it reaches
///
/// Non-canonical children are interned first and replaced by their canonical
/// instances, so every handle in the parent's key is canonical. Children of
/// kinds that are never canonical cannot be part of a canonical value.
pub fn intern_graph(
    heap: &Heap,
    classes: &dyn ClassTable,
    table: &CanonicalTable,
    obj: ObjRef,
) -> Result<(ObjRef, bool)> {
    let mut visiting = FxHashSet::default();
    intern_children(heap, classes, table, obj, &mut visiting)?;
    intern(heap, table, obj)
}

fn intern_children(
    heap: &Heap,
    classes: &dyn ClassTable,
    table: &CanonicalTable,
    obj: ObjRef,
    visiting: &mut FxHashSet<ObjRef>,
) -> Result<()> {
    if !visiting.insert(obj) {
        return Ok(());
    }
    let (parent, children) = {
        let object = heap.get(obj)?;
        (object.kind, object.shape().children)
    };

    let mut replacements: FxHashMap<ObjRef, ObjRef> = FxHashMap::default();
    for child in children {
        let Value::Ref(child) = child else { continue };
        // Cycles keep the handle of the object being interned
        if visiting.contains(&child) || replacements.contains_key(&child) {
            continue;
        }
        let (kind, canonical) = {
            let object = heap.get(child)?;
            (object.kind, object.canonical)
        };
        if canonical {
            continue;
        }
        if !kind.is_canonicalizable() {
            return Err(SnapshotError::illegal(
                kind,
                format!("a {} cannot be part of a canonical {}", kind, parent),
            ));
        }
        intern_children(heap, classes, table, child, visiting)?;
        let (winner, _) = intern(heap, table, child)?;
        if winner != child {
            replacements.insert(child, winner);
        }
    }

    if !replacements.is_empty() {
        heap.get_mut(obj)?.body.map_children(|value| match value {
            Value::Ref(child) => replacements.get(&child).map_or(value, |&w| Value::Ref(w)),
            other => other,
        });
        if parent == ObjectKind::Map {
            heap.rehash_map(classes, obj)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StaticClassTable;
    use std::sync::Arc;

    #[test]
    fn test_equal_strings_share_instance() {
        let heap = Heap::new();
        let table = CanonicalTable::new();
        let a = heap.new_string("hello");
        let b = heap.new_string("hello");
        let c = heap.new_string("world");

        assert_eq!(intern(&heap, &table, a).unwrap(), (a, false));
        assert_eq!(intern(&heap, &table, b).unwrap(), (a, true));
        assert_eq!(intern(&heap, &table, c).unwrap(), (c, false));
        assert!(heap.is_canonical(a).unwrap());
        assert!(!heap.is_canonical(b).unwrap());
        assert_eq!(table.len(), 2);
        assert_eq!(table.hits(), 1);
    }

    #[test]
    fn test_graph_interning_shares_children() {
        let heap = Heap::new();
        let classes = StaticClassTable::new();
        let table = CanonicalTable::new();
        let first = heap.new_immutable_array(vec![Value::Ref(heap.new_double(1.5))]);
        let second = heap.new_immutable_array(vec![Value::Ref(heap.new_double(1.5))]);

        let (a, _) = intern_graph(&heap, &classes, &table, first).unwrap();
        let (b, hit) = intern_graph(&heap, &classes, &table, second).unwrap();

        assert_eq!(a, b);
        assert!(hit);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_graph_interning_rejects_mutable_children() {
        let heap = Heap::new();
        let classes = StaticClassTable::new();
        let table = CanonicalTable::new();
        let growable = heap.new_growable_array(vec![Value::Smi(1)]);
        let array = heap.new_immutable_array(vec![Value::Ref(growable)]);

        let err = intern_graph(&heap, &classes, &table, array).unwrap_err();
        assert!(err.is_catchable());
        assert!(table.is_empty());
    }

    #[test]
    fn test_kind_is_part_of_the_key() {
        let heap = Heap::new();
        let table = CanonicalTable::new();
        let mint = heap.new_mint(0);
        let double = heap.new_double(f64::from_bits(0));
        assert_eq!(heap.kind_of(double).unwrap(), ObjectKind::Double);

        assert_eq!(intern(&heap, &table, mint).unwrap().0, mint);
        assert_eq!(intern(&heap, &table, double).unwrap().0, double);
    }

    #[test]
    fn test_concurrent_insert_has_one_winner() {
        let heap = Arc::new(Heap::new());
        let table = Arc::new(CanonicalTable::new());
        let candidates: Vec<ObjRef> = (0..8).map(|_| heap.new_string("shared")).collect();

        let winners: Vec<ObjRef> = std::thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .iter()
                .map(|&candidate| {
                    let heap = Arc::clone(&heap);
                    let table = Arc::clone(&table);
                    scope.spawn(move || intern(&heap, &table, candidate).unwrap().0)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(winners.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(table.len(), 1);
        assert_eq!(table.misses(), 1);
    }
}
