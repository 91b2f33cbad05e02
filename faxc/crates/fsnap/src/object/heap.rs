//! Heap - object arena of one isolate group
//!
//! Objects live in slots of a single arena behind a `parking_lot::RwLock`.
//! Slot indices are handed out as [`ObjRef`]s; freed slots go to a free list
//! and are reused.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    Heap                      │
//! │  slot 0   slot 1   slot 2   slot 3   ...     │
//! │ ┌──────┐ ┌──────┐ ┌──────┐ ┌──────┐          │
//! │ │Object│ │ free │ │Object│ │Object│          │
//! │ └──────┘ └──────┘ └──────┘ └──────┘          │
//! │  free list: [1]      external bytes: N       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Guards returned by [`Heap::get`] and [`Heap::get_mut`] hold the arena
//! lock. Callers must drop them before allocating or recursing into the
//! object's children.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;

use super::class_table::{ClassId, ClassTable, FunctionId};
use super::{
    ArrayData, ClosureData, ContextData, ElementType, ExternalTypedDataBody, GrowableArrayData,
    HeapObject, InstanceData, MapData, Nullability, ObjRef, ObjectBody, ObjectKind, TypeData,
    TypeParametersData, TypeState, TypedDataBody, Value,
};
use crate::error::{Result, SnapshotError};
use crate::runtime::finalizer::Finalizer;
use crate::runtime::safepoint::Safepoint;
use crate::snapshot::external::{ExternalBlock, TransferablePeer};

/// Nesting limit for value-equality map keys; deeper keys compare by identity
const MAX_KEY_DEPTH: usize = 32;

/// Heap statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub free_slots: usize,
    pub allocated_total: u64,
    pub freed_total: u64,
    pub external_bytes: usize,
    pub pending_finalizers: usize,
}

/// Object arena
pub struct Heap {
    /// Object slots; `None` marks a free slot
    slots: RwLock<Vec<Option<HeapObject>>>,

    /// Free slot indices
    free_list: Mutex<Vec<u32>>,

    /// Per-object finalizers
    finalizer: Finalizer,

    /// Allocation safepoint
    safepoint: Safepoint,

    /// Bytes held in external blocks by live objects
    external_bytes: Arc<AtomicUsize>,

    /// Total allocations counter
    allocated_total: AtomicU64,

    /// Total frees counter
    freed_total: AtomicU64,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty heap with room for `capacity` objects
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(Vec::with_capacity(capacity)),
            free_list: Mutex::new(Vec::new()),
            finalizer: Finalizer::new(),
            safepoint: Safepoint::new(),
            external_bytes: Arc::new(AtomicUsize::new(0)),
            allocated_total: AtomicU64::new(0),
            freed_total: AtomicU64::new(0),
        }
    }

    /// Allocate an object
    ///
    /// Polls the allocation safepoint first, so this may block while a
    /// collection is in progress.
    pub fn allocate(&self, kind: ObjectKind, body: ObjectBody) -> ObjRef {
        self.safepoint.poll();
        self.allocate_object(HeapObject::new(kind, body))
    }

    /// Allocate an object already carrying the canonical flag
    pub fn allocate_canonical(&self, kind: ObjectKind, body: ObjectBody) -> ObjRef {
        self.safepoint.poll();
        let mut object = HeapObject::new(kind, body);
        object.canonical = true;
        self.allocate_object(object)
    }

    fn allocate_object(&self, object: HeapObject) -> ObjRef {
        self.allocated_total.fetch_add(1, Ordering::Relaxed);
        let reused = self.free_list.lock().pop();
        let mut slots = self.slots.write();
        match reused {
            Some(index) => {
                slots[index as usize] = Some(object);
                ObjRef(index)
            },
            None => {
                slots.push(Some(object));
                ObjRef((slots.len() - 1) as u32)
            },
        }
    }

    /// Borrow an object
    pub fn get(&self, r: ObjRef) -> Result<MappedRwLockReadGuard<'_, HeapObject>> {
        RwLockReadGuard::try_map(self.slots.read(), |slots| {
            slots.get(r.index()).and_then(|slot| slot.as_ref())
        })
        .map_err(|_| SnapshotError::InvalidReference { index: r.index() })
    }

    /// Borrow an object mutably
    pub fn get_mut(&self, r: ObjRef) -> Result<MappedRwLockWriteGuard<'_, HeapObject>> {
        RwLockWriteGuard::try_map(self.slots.write(), |slots| {
            slots.get_mut(r.index()).and_then(|slot| slot.as_mut())
        })
        .map_err(|_| SnapshotError::InvalidReference { index: r.index() })
    }

    /// Kind of a live object
    pub fn kind_of(&self, r: ObjRef) -> Result<ObjectKind> {
        Ok(self.get(r)?.kind)
    }

    /// Canonical flag of a live object
    pub fn is_canonical(&self, r: ObjRef) -> Result<bool> {
        Ok(self.get(r)?.canonical)
    }

    /// Set the canonical flag
    pub fn set_canonical(&self, r: ObjRef, canonical: bool) -> Result<()> {
        self.get_mut(r)?.canonical = canonical;
        Ok(())
    }

    /// Check whether a handle points at a live object
    pub fn contains(&self, r: ObjRef) -> bool {
        matches!(self.slots.read().get(r.index()), Some(Some(_)))
    }

    /// Free an object and run its finalizers
    pub fn free(&self, r: ObjRef) -> Result<()> {
        let object = {
            let mut slots = self.slots.write();
            slots
                .get_mut(r.index())
                .and_then(|slot| slot.take())
                .ok_or(SnapshotError::InvalidReference { index: r.index() })?
        };
        self.free_list.lock().push(r.0);
        self.freed_total.fetch_add(1, Ordering::Relaxed);
        drop(object);
        self.finalizer.run_for(r);
        Ok(())
    }

    /// Account for an external block owned by `obj`
    ///
    /// The size is released when `obj` is freed.
    pub fn add_external(&self, obj: ObjRef, length: usize) {
        self.external_bytes.fetch_add(length, Ordering::Relaxed);
        let external = Arc::clone(&self.external_bytes);
        self.finalizer.register(obj, move |_| {
            external.fetch_sub(length, Ordering::Relaxed);
        });
    }

    /// Bytes held in external blocks by live objects
    pub fn external_bytes(&self) -> usize {
        self.external_bytes.load(Ordering::Relaxed)
    }

    /// Number of live objects
    pub fn live_count(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn finalizer(&self) -> &Finalizer {
        &self.finalizer
    }

    pub fn safepoint(&self) -> &Safepoint {
        &self.safepoint
    }

    /// Get heap statistics
    pub fn stats(&self) -> HeapStats {
        let (live_objects, total_slots) = {
            let slots = self.slots.read();
            (slots.iter().filter(|slot| slot.is_some()).count(), slots.len())
        };
        HeapStats {
            live_objects,
            free_slots: total_slots - live_objects,
            allocated_total: self.allocated_total.load(Ordering::Relaxed),
            freed_total: self.freed_total.load(Ordering::Relaxed),
            external_bytes: self.external_bytes(),
            pending_finalizers: self.finalizer.pending_count(),
        }
    }

    // ========================================================================
    // CONSTRUCTORS
    // ========================================================================

    /// Allocate a string, one-byte when every char fits Latin-1
    pub fn new_string(&self, text: &str) -> ObjRef {
        if text.chars().all(|c| (c as u32) <= 0xFF) {
            let bytes = text.chars().map(|c| c as u8).collect();
            self.allocate(ObjectKind::OneByteString, ObjectBody::OneByteString(bytes))
        } else {
            let units = text.encode_utf16().collect();
            self.allocate(ObjectKind::TwoByteString, ObjectBody::TwoByteString(units))
        }
    }

    /// String whose code units live outside the heap
    pub fn new_external_string(&self, text: &str) -> ObjRef {
        if text.chars().all(|c| (c as u32) <= 0xFF) {
            let bytes: Vec<u8> = text.chars().map(|c| c as u8).collect();
            self.allocate(
                ObjectKind::ExternalOneByteString,
                ObjectBody::ExternalOneByteString(bytes.into_boxed_slice()),
            )
        } else {
            let units: Vec<u16> = text.encode_utf16().collect();
            self.allocate(
                ObjectKind::ExternalTwoByteString,
                ObjectBody::ExternalTwoByteString(units.into_boxed_slice()),
            )
        }
    }

    /// Integer value, boxed only when it does not fit a small integer
    pub fn new_integer(&self, value: i64) -> Value {
        match Value::smi(value) {
            Some(smi) => smi,
            None => Value::Ref(self.new_mint(value)),
        }
    }

    /// Boxed 64-bit integer, regardless of range
    pub fn new_mint(&self, value: i64) -> ObjRef {
        self.allocate(ObjectKind::Mint, ObjectBody::Mint(value))
    }

    pub fn new_double(&self, value: f64) -> ObjRef {
        self.allocate(ObjectKind::Double, ObjectBody::Double(value))
    }

    /// Mutable fixed-length array
    pub fn new_array(&self, elements: Vec<Value>) -> ObjRef {
        self.allocate(
            ObjectKind::Array,
            ObjectBody::Array(ArrayData {
                type_arguments: Value::Null,
                elements,
            }),
        )
    }

    pub fn new_immutable_array(&self, elements: Vec<Value>) -> ObjRef {
        self.allocate(
            ObjectKind::ImmutableArray,
            ObjectBody::Array(ArrayData {
                type_arguments: Value::Null,
                elements,
            }),
        )
    }

    /// Growable array over a fresh backing array of exactly `elements.len()`
    pub fn new_growable_array(&self, elements: Vec<Value>) -> ObjRef {
        let length = elements.len();
        let backing = self.new_array(elements);
        self.allocate(
            ObjectKind::GrowableArray,
            ObjectBody::GrowableArray(GrowableArrayData {
                type_arguments: Value::Null,
                length,
                data: Value::Ref(backing),
            }),
        )
    }

    pub fn new_typed_data(&self, element: ElementType, bytes: Vec<u8>) -> ObjRef {
        self.allocate(
            ObjectKind::TypedData,
            ObjectBody::TypedData(TypedDataBody { element, bytes }),
        )
    }

    /// Typed data over an out-of-heap block; the block counts as external
    pub fn new_external_typed_data(&self, element: ElementType, block: ExternalBlock) -> ObjRef {
        let length = block.len();
        let obj = self.allocate(
            ObjectKind::ExternalTypedData,
            ObjectBody::ExternalTypedData(ExternalTypedDataBody { element, block }),
        );
        self.add_external(obj, length);
        obj
    }

    /// Transferable buffer owning a copy of `bytes`
    pub fn new_transferable(&self, bytes: &[u8]) -> ObjRef {
        self.new_transferable_from_peer(TransferablePeer::new(bytes))
    }

    pub fn new_transferable_from_peer(&self, peer: Arc<TransferablePeer>) -> ObjRef {
        self.allocate(
            ObjectKind::TransferableTypedData,
            ObjectBody::TransferableTypedData(peer),
        )
    }

    pub fn new_instance(&self, class_id: ClassId, fields: Vec<Value>) -> ObjRef {
        self.allocate(
            ObjectKind::Instance,
            ObjectBody::Instance(InstanceData { class_id, fields }),
        )
    }

    pub fn new_closure(&self, function: FunctionId, context: Value) -> ObjRef {
        self.allocate(
            ObjectKind::Closure,
            ObjectBody::Closure(ClosureData {
                function,
                delayed_type_arguments: Value::Null,
                context,
            }),
        )
    }

    pub fn new_context(&self, parent: Value, variables: Vec<Value>) -> ObjRef {
        self.allocate(
            ObjectKind::Context,
            ObjectBody::Context(ContextData { parent, variables }),
        )
    }

    pub fn new_capability(&self, id: u64) -> ObjRef {
        self.allocate(ObjectKind::Capability, ObjectBody::Capability(id))
    }

    pub fn new_send_port(&self, id: u64, origin_id: u64) -> ObjRef {
        self.allocate(ObjectKind::SendPort, ObjectBody::SendPort { id, origin_id })
    }

    /// Finalized, non-generic type of a class
    pub fn new_type(&self, class_id: ClassId, nullability: Nullability) -> ObjRef {
        self.allocate(
            ObjectKind::Type,
            ObjectBody::Type(TypeData {
                class_id,
                state: TypeState::FinalizedInstantiated,
                nullability,
                arguments: Value::Null,
                testing_stub: None,
            }),
        )
    }

    pub fn new_type_arguments(&self, types: Vec<Value>) -> ObjRef {
        self.allocate(ObjectKind::TypeArguments, ObjectBody::TypeArguments(types))
    }

    pub fn new_type_parameters(&self, params: TypeParametersData) -> ObjRef {
        self.allocate(ObjectKind::TypeParameters, ObjectBody::TypeParameters(params))
    }

    /// Runtime-internal object of a forbidden kind
    pub fn new_opaque(&self, kind: ObjectKind, handle: u64) -> ObjRef {
        self.allocate(kind, ObjectBody::Opaque(handle))
    }

    /// Contents of a string object
    pub fn string_value(&self, r: ObjRef) -> Result<String> {
        let object = self.get(r)?;
        match &object.body {
            ObjectBody::OneByteString(bytes) => Ok(bytes.iter().map(|&b| b as char).collect()),
            ObjectBody::ExternalOneByteString(bytes) => {
                Ok(bytes.iter().map(|&b| b as char).collect())
            },
            ObjectBody::TwoByteString(units) => Ok(String::from_utf16_lossy(units)),
            ObjectBody::ExternalTwoByteString(units) => Ok(String::from_utf16_lossy(units)),
            _ => Err(SnapshotError::InvalidState {
                expected: "string".to_string(),
                actual: object.kind.to_string(),
            }),
        }
    }

    // ========================================================================
    // MAPS
    // ========================================================================

    /// Allocate a hashed map
    pub fn new_map(
        &self,
        classes: &dyn ClassTable,
        entries: Vec<(Value, Value)>,
    ) -> Result<ObjRef> {
        let map = self.allocate(
            ObjectKind::Map,
            ObjectBody::Map(MapData {
                entries,
                ..Default::default()
            }),
        );
        self.rehash_map(classes, map)?;
        Ok(map)
    }

    /// Rebuild a map's hash index from its entries
    ///
    /// A key that appears twice maps to its last entry.
    pub fn rehash_map(&self, classes: &dyn ClassTable, map: ObjRef) -> Result<()> {
        let keys: Vec<Value> = {
            let object = self.get(map)?;
            match &object.body {
                ObjectBody::Map(data) => data.entries.iter().map(|(key, _)| *key).collect(),
                _ => return Err(not_a_map(object.kind)),
            }
        };

        let mut index = FxHashMap::default();
        for (position, key) in keys.into_iter().enumerate() {
            index.insert(self.map_key(classes, key)?, position);
        }

        let mut object = self.get_mut(map)?;
        match &mut object.body {
            ObjectBody::Map(data) => {
                data.index = Some(index);
                Ok(())
            },
            _ => Err(not_a_map(object.kind)),
        }
    }

    /// Look a key up in a hashed map
    pub fn map_get(
        &self,
        classes: &dyn ClassTable,
        map: ObjRef,
        key: Value,
    ) -> Result<Option<Value>> {
        let key = self.map_key(classes, key)?;
        let object = self.get(map)?;
        match &object.body {
            ObjectBody::Map(data) => {
                let index = data.index.as_ref().ok_or_else(|| SnapshotError::InvalidState {
                    expected: "hashed map".to_string(),
                    actual: "map awaiting rehash".to_string(),
                })?;
                Ok(index.get(&key).map(|&position| data.entries[position].1))
            },
            _ => Err(not_a_map(object.kind)),
        }
    }

    /// Check whether a map's hash index is built
    pub fn is_hashed(&self, map: ObjRef) -> Result<bool> {
        let object = self.get(map)?;
        match &object.body {
            ObjectBody::Map(data) => Ok(data.index.is_some()),
            _ => Err(not_a_map(object.kind)),
        }
    }

    /// Equality key of a map key
    ///
    /// Integers compare by value whether boxed or not, doubles by bits,
    /// strings by code units, instances of value-equality classes by their
    /// fields. Everything else compares by identity.
    pub fn map_key(&self, classes: &dyn ClassTable, key: Value) -> Result<MapKey> {
        self.map_key_at(classes, key, 0)
    }

    fn map_key_at(&self, classes: &dyn ClassTable, key: Value, depth: usize) -> Result<MapKey> {
        let r = match key {
            Value::Null => return Ok(MapKey::Null),
            Value::Bool(b) => return Ok(MapKey::Bool(b)),
            Value::Smi(v) => return Ok(MapKey::Int(v)),
            Value::Ref(r) => r,
        };

        let record = {
            let object = self.get(r)?;
            match &object.body {
                ObjectBody::Mint(v) => return Ok(MapKey::Int(*v)),
                ObjectBody::Double(v) => return Ok(MapKey::Double(v.to_bits())),
                ObjectBody::OneByteString(bytes) => {
                    return Ok(MapKey::Str(bytes.iter().map(|&b| b as u16).collect()))
                },
                ObjectBody::ExternalOneByteString(bytes) => {
                    return Ok(MapKey::Str(bytes.iter().map(|&b| b as u16).collect()))
                },
                ObjectBody::TwoByteString(units) => return Ok(MapKey::Str(units.clone())),
                ObjectBody::ExternalTwoByteString(units) => {
                    return Ok(MapKey::Str(units.to_vec()))
                },
                ObjectBody::Instance(instance) if depth < MAX_KEY_DEPTH => {
                    (instance.class_id, instance.fields.clone())
                },
                _ => return Ok(MapKey::Identity(r)),
            }
        };

        let (class_id, fields) = record;
        match classes.class_by_id(class_id) {
            Some(class) if class.value_equality => {
                let mut parts = Vec::with_capacity(fields.len());
                for field in fields {
                    parts.push(self.map_key_at(classes, field, depth + 1)?);
                }
                Ok(MapKey::Record(class_id, parts))
            },
            _ => Ok(MapKey::Identity(r)),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn not_a_map(kind: ObjectKind) -> SnapshotError {
    SnapshotError::InvalidState {
        expected: "Map".to_string(),
        actual: kind.to_string(),
    }
}

/// Equality key of a map entry
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MapKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit pattern of a double
    Double(u64),
    /// UTF-16 code units
    Str(Vec<u16>),
    /// Instance of a value-equality class
    Record(ClassId, Vec<MapKey>),
    Identity(ObjRef),
}
