//! Test Utilities for the FSNAP Test Suite
//!
//! Fixtures build an isolate group with a small class table; the assertion
//! helpers compare decoded graphs against their sources by structure AND
//! identity, not just by value.
//!
//! ============================================================================
//! A GRAPH THAT MERELY LOOKS EQUAL IS NOT ENOUGH: SHARING MUST MATCH TOO
//! ============================================================================

#![allow(dead_code)]

use fsnap::object::{ClassId, FunctionId, ObjectBody, StaticClassTable};
use fsnap::{IsolateGroup, ObjRef, SnapshotConfig, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// ============================================================================
/// GROUP FIXTURE
/// ============================================================================

/// Isolate group plus the handles of its pre-registered classes
pub struct GroupFixture {
    pub group: IsolateGroup,
    pub classes: Arc<StaticClassTable>,
    /// Two fields, sendable
    pub point: ClassId,
    /// One field, sendable, `==` over fields
    pub money: ClassId,
    /// One field, NOT sendable
    pub socket: ClassId,
    /// Static top-level function
    pub static_fn: FunctionId,
    /// Instance method
    pub method_fn: FunctionId,
}

impl GroupFixture {
    /// Fixture with default configuration
    ///
    /// **Bug this finds:** Initialization failures with a valid config
    pub fn with_defaults() -> Self {
        Self::with_config(SnapshotConfig::default())
    }

    /// Fixture with custom configuration
    pub fn with_config(config: SnapshotConfig) -> Self {
        let classes = Arc::new(StaticClassTable::new());
        let point = classes.class("Point").fields(2).register();
        let money = classes.class("Money").fields(1).value_equality().register();
        let socket = classes.class("Socket").fields(1).unsendable().register();
        let static_fn = classes.register_function("main", None, true);
        let method_fn = classes.register_function("Point.move", Some(point), false);

        let group = IsolateGroup::with_config(
            config,
            Arc::clone(&classes),
            Arc::new(fsnap::object::DefaultStubGenerator::new()),
        )
        .expect("group creation should succeed with a valid config");

        Self {
            group,
            classes,
            point,
            money,
            socket,
            static_fn,
            method_fn,
        }
    }

    /// Fixture whose messages externalize buffers above `threshold` bytes
    pub fn with_threshold(threshold: u64) -> Self {
        Self::with_config(SnapshotConfig {
            externalize_threshold: threshold,
            ..Default::default()
        })
    }

    /// Write and read back a full snapshot
    pub fn roundtrip_full(&self, root: Value) -> Value {
        let bytes = self
            .group
            .write_snapshot(root)
            .expect("full snapshot write should succeed");
        self.group
            .read_snapshot(&bytes)
            .expect("full snapshot read should succeed")
    }

    /// Write, commit and read back a message
    pub fn roundtrip_message(&self, root: Value) -> Value {
        let mut message = self
            .group
            .write_message(root)
            .expect("message write should succeed");
        message.commit();
        self.group
            .read_message(message)
            .expect("message read should succeed")
    }
}

/// ============================================================================
/// RANDOM GRAPHS
/// ============================================================================

/// Seeded random graph of sendable objects, returned as an array of all nodes
///
/// Slots point at earlier and later nodes alike, so the graph has shared
/// children and cycles of every length. Boxed integers stay outside the
/// small-integer range so they decode boxed.
pub fn random_graph(fx: &GroupFixture, seed: u64, nodes: usize) -> Value {
    let mut rng = StdRng::seed_from_u64(seed);
    let heap = fx.group.heap();

    let objects: Vec<ObjRef> = (0..nodes)
        .map(|i| match rng.gen_range(0..6) {
            0 => heap.new_instance(fx.point, vec![Value::Null, Value::Null]),
            1 => heap.new_array(vec![Value::Null; rng.gen_range(0..4)]),
            2 => heap.new_string(&format!("node-{}", i)),
            3 => heap.new_mint((1i64 << 40) + i as i64),
            4 => heap.new_double(rng.gen::<f64>()),
            _ => heap.new_growable_array(vec![Value::Null; rng.gen_range(1..4)]),
        })
        .collect();

    let pick = |rng: &mut StdRng| {
        if rng.gen_bool(0.25) {
            Value::Smi(rng.gen_range(-100..100))
        } else {
            Value::Ref(objects[rng.gen_range(0..objects.len())])
        }
    };

    for &obj in &objects {
        let backing = {
            let mut object = heap.get_mut(obj).expect("node should be live");
            match &mut object.body {
                ObjectBody::Instance(data) => {
                    data.fields.iter_mut().for_each(|slot| *slot = pick(&mut rng));
                    None
                },
                ObjectBody::Array(data) => {
                    data.elements.iter_mut().for_each(|slot| *slot = pick(&mut rng));
                    None
                },
                ObjectBody::GrowableArray(data) => data.data.as_obj(),
                _ => None,
            }
        };
        if let Some(backing) = backing {
            if let ObjectBody::Array(data) =
                &mut heap.get_mut(backing).expect("backing store should be live").body
            {
                data.elements.iter_mut().for_each(|slot| *slot = pick(&mut rng));
            }
        }
    }

    Value::Ref(heap.new_array(objects.into_iter().map(Value::Ref).collect()))
}

/// ============================================================================
/// ASSERTIONS
/// ============================================================================

/// Assert two graphs are isomorphic: same shapes AND same sharing
///
/// **Bug this finds:** Duplicated shared objects, broken cycles, children
/// attached to the wrong parent, lost scalars
pub fn assert_isomorphic(group: &IsolateGroup, expected: Value, actual: Value) {
    let mut mapping: HashMap<ObjRef, ObjRef> = HashMap::new();
    let mut reverse: HashMap<ObjRef, ObjRef> = HashMap::new();
    let mut work = vec![(expected, actual)];

    while let Some((a, b)) = work.pop() {
        match (a, b) {
            (Value::Ref(a), Value::Ref(b)) => {
                if let Some(&seen) = mapping.get(&a) {
                    assert_eq!(seen, b, "{:?} maps to two different decoded objects", a);
                    continue;
                }
                assert!(
                    reverse.insert(b, a).is_none(),
                    "decoded object {:?} stands for two source objects",
                    b
                );
                mapping.insert(a, b);

                let heap = group.heap();
                let shape_a = heap.get(a).expect("source object should be live").shape();
                let shape_b = heap.get(b).expect("decoded object should be live").shape();
                assert_eq!(shape_a.kind, shape_b.kind, "kind differs");
                assert_eq!(shape_a.scalars, shape_b.scalars, "{} scalars differ", shape_a.kind);
                assert_eq!(
                    shape_a.children.len(),
                    shape_b.children.len(),
                    "{} child count differs",
                    shape_a.kind
                );
                work.extend(shape_a.children.into_iter().zip(shape_b.children));
            },
            (a, b) => assert_eq!(a, b, "immediate differs"),
        }
    }
}

/// Assert the decoded object is a fresh copy, not the source itself
pub fn assert_fresh_copy(source: Value, decoded: Value) {
    let (Some(source), Some(decoded)) = (source.as_obj(), decoded.as_obj()) else {
        panic!("expected two heap objects, got {:?} and {:?}", source, decoded);
    };
    assert_ne!(source, decoded, "decoder returned the source object");
}

/// Elements of an array value
pub fn array_elements(group: &IsolateGroup, value: Value) -> Vec<Value> {
    let obj = value.as_obj().expect("array should be a heap object");
    match &group.heap().get(obj).expect("array should be live").body {
        fsnap::object::ObjectBody::Array(data) => data.elements.clone(),
        other => panic!("expected an array body, got {:?}", other),
    }
}
