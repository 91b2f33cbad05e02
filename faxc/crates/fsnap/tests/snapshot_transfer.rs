//! External Buffer Tests - Externalization and Zero-Copy Transfer
//!
//! These tests verify the hand-off of large buffers through a message's
//! finalizable data:
//! - Buffers above the threshold leave the stream as external blocks
//! - Transferable peers move into the message only on commit
//! - Aborted or dropped sends leave the source untouched
//! - A peer is sent at most once
//!
//! ============================================================================
//! OWNERSHIP OF A BLOCK MUST BE UNAMBIGUOUS AT EVERY POINT
//! ============================================================================

mod common;

use common::{array_elements, GroupFixture};
use fsnap::object::{ElementType, ObjectBody};
use fsnap::snapshot::external::TransferablePeer;
use fsnap::{ObjRef, ObjectKind, SnapshotError, Value};
use std::sync::Arc;

fn peer_of(fx: &GroupFixture, obj: ObjRef) -> Arc<TransferablePeer> {
    match &fx.group.heap().get(obj).unwrap().body {
        ObjectBody::TransferableTypedData(peer) => Arc::clone(peer),
        other => panic!("expected a transferable, got {:?}", other),
    }
}

/// ============================================================================
/// EXTERNALIZATION
/// ============================================================================

/// Test only buffers strictly above the threshold are externalized
///
/// **Bug this finds:** Off-by-one at the threshold, small buffers copied out
/// **Invariant verified:** Large buffers arrive as external typed data with
/// identical contents
#[test]
fn test_externalize_above_threshold() {
    // Arrange
    let fx = GroupFixture::with_threshold(16);
    let heap = fx.group.heap();
    let large = heap.new_typed_data(ElementType::Uint8, (0u8..32).collect());
    let exact = heap.new_typed_data(ElementType::Uint8, vec![7; 16]);
    let root = heap.new_array(vec![Value::Ref(large), Value::Ref(exact)]);

    // Act
    let mut message = fx.group.write_message(Value::Ref(root)).unwrap();
    let blocks = message.external_blocks();
    message.commit();
    let decoded = fx.group.read_message(message).unwrap();

    // Assert
    assert_eq!(blocks, 1);
    let elements = array_elements(&fx.group, decoded);
    match &heap.get(elements[0].as_obj().unwrap()).unwrap().body {
        ObjectBody::ExternalTypedData(body) => {
            assert_eq!(body.element, ElementType::Uint8);
            assert_eq!(&body.block[..], &(0u8..32).collect::<Vec<_>>()[..]);
        },
        other => panic!("expected external typed data, got {:?}", other),
    }
    assert_eq!(
        heap.kind_of(elements[1].as_obj().unwrap()).unwrap(),
        ObjectKind::TypedData
    );
    assert_eq!(heap.external_bytes(), 32);
    // Counted once by the writer and once by the reader
    assert_eq!(fx.group.stats().externalized_bytes, 64);
}

/// Test full snapshots keep external typed data inline
///
/// **Bug this finds:** Full snapshot depending on a hand-off list it never has
#[test]
fn test_external_typed_data_in_full_snapshot() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let block = vec![1u8, 2, 3, 4, 5, 6, 7, 8].into_boxed_slice();
    let external = heap.new_external_typed_data(ElementType::Int32, block);

    // Act
    let decoded = fx.roundtrip_full(Value::Ref(external)).as_obj().unwrap();

    // Assert
    match &heap.get(decoded).unwrap().body {
        ObjectBody::TypedData(body) => {
            assert_eq!(body.element, ElementType::Int32);
            assert_eq!(body.bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        },
        other => panic!("expected inline typed data, got {:?}", other),
    };
}

/// ============================================================================
/// TRANSFER
/// ============================================================================

/// Test a transferable moves on commit and not before
///
/// **Bug this finds:** Source emptied at write time, data copied instead of moved
/// **Invariant verified:** After commit the source reads as empty and the
/// receiver owns the original bytes
#[test]
fn test_transfer_moves_on_commit() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let buffer = heap.new_transferable(&[10, 20, 30, 40, 50]);
    let source = peer_of(&fx, buffer);

    // Act
    let mut message = fx.group.write_message(Value::Ref(buffer)).unwrap();
    let length_before_commit = source.length();
    message.commit();
    let decoded = fx.group.read_message(message).unwrap().as_obj().unwrap();

    // Assert
    assert_eq!(length_before_commit, 5);
    assert!(source.is_transferred());
    assert_eq!(source.length(), 0);
    let received = peer_of(&fx, decoded);
    received.with_data(|data| assert_eq!(data, Some(&[10u8, 20, 30, 40, 50][..])));
    assert_eq!(fx.group.stats().transferred_bytes, 10);
}

/// Test one transferable object referenced twice
///
/// **Bug this finds:** Back-references treated as a second transfer
#[test]
fn test_same_transferable_object_twice() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let buffer = heap.new_transferable(&[1, 2, 3]);
    let root = heap.new_array(vec![Value::Ref(buffer), Value::Ref(buffer)]);

    // Act
    let mut message = fx.group.write_message(Value::Ref(root)).unwrap();
    let blocks = message.external_blocks();
    message.commit();
    let decoded = fx.group.read_message(message).unwrap();

    // Assert
    assert_eq!(blocks, 1);
    let elements = array_elements(&fx.group, decoded);
    assert_eq!(elements[0], elements[1]);
}

/// Test two objects sharing one peer
///
/// **Bug this finds:** One block handed to the receiver twice
/// **Invariant verified:** The write fails and the peer keeps its data
#[test]
fn test_shared_peer_twice_in_one_message() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let peer = TransferablePeer::new(&[1, 2, 3]);
    let first = heap.new_transferable_from_peer(Arc::clone(&peer));
    let second = heap.new_transferable_from_peer(Arc::clone(&peer));
    let root = heap.new_array(vec![Value::Ref(first), Value::Ref(second)]);

    // Act
    let result = fx.group.write_message(Value::Ref(root));

    // Assert
    assert!(matches!(
        result,
        Err(SnapshotError::IllegalTransfer {
            kind: ObjectKind::TransferableTypedData,
            ..
        })
    ));
    assert_eq!(peer.length(), 3);
}

/// Test re-sending an emptied transferable
///
/// **Bug this finds:** Zero-length block sent in place of the moved data
#[test]
fn test_resend_after_transfer() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let buffer = heap.new_transferable(&[1, 2, 3]);
    let mut first = fx.group.write_message(Value::Ref(buffer)).unwrap();
    first.commit();

    // Act
    let result = fx.group.write_message(Value::Ref(buffer));

    // Assert
    match result {
        Err(err @ SnapshotError::IllegalTransfer { .. }) => {
            assert!(err.to_string().contains("transferred already"), "{}", err);
        },
        Err(other) => panic!("expected an illegal transfer, got {}", other),
        Ok(_) => panic!("expected an illegal transfer, got a message"),
    }
}

/// Test a second message written while the first still holds the peer
///
/// **Bug this finds:** Two pending messages both promising the same block,
/// the second one failing only when the receiver reads it
/// **Invariant verified:** The second write is refused; once the first one
/// is dropped the peer can be sent again
#[test]
fn test_peer_in_two_pending_messages() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let buffer = heap.new_transferable(&[3, 1, 4]);
    let source = peer_of(&fx, buffer);
    let first = fx.group.write_message(Value::Ref(buffer)).unwrap();

    // Act
    let second = fx.group.write_message(Value::Ref(buffer));

    // Assert
    assert!(matches!(
        second,
        Err(SnapshotError::IllegalTransfer {
            kind: ObjectKind::TransferableTypedData,
            ..
        })
    ));
    assert!(source.is_reserved());
    assert_eq!(source.length(), 3);

    drop(first);
    assert!(!source.is_reserved());
    let mut retry = fx.group.write_message(Value::Ref(buffer)).unwrap();
    retry.commit();
    let decoded = fx.group.read_message(retry).unwrap().as_obj().unwrap();
    peer_of(&fx, decoded).with_data(|data| assert_eq!(data, Some(&[3u8, 1, 4][..])));
}

/// ============================================================================
/// ABORTED SENDS
/// ============================================================================

/// Test dropping an uncommitted message
///
/// **Bug this finds:** Transfer performed without a delivered message
#[test]
fn test_dropped_message_keeps_source() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let buffer = heap.new_transferable(&[5; 64]);
    let source = peer_of(&fx, buffer);

    // Act
    let message = fx.group.write_message(Value::Ref(buffer)).unwrap();
    drop(message);

    // Assert
    assert!(!source.is_transferred());
    assert_eq!(source.length(), 64);
}

/// Test a write aborted after a transfer was recorded
///
/// **Bug this finds:** Partial sends emptying buffers
/// **Invariant verified:** All-or-nothing; the peer is untouched
#[test]
fn test_aborted_write_keeps_source() {
    // Arrange
    let fx = GroupFixture::with_threshold(4);
    let heap = fx.group.heap();
    let buffer = heap.new_transferable(&[9; 32]);
    let large = heap.new_typed_data(ElementType::Uint8, vec![1; 64]);
    let trace = heap.new_opaque(ObjectKind::StackTrace, 1);
    let root = heap.new_array(vec![Value::Ref(buffer), Value::Ref(large), Value::Ref(trace)]);
    let source = peer_of(&fx, buffer);

    // Act
    let result = fx.group.write_message(Value::Ref(root));

    // Assert
    assert!(result.is_err());
    assert_eq!(source.length(), 32);
    assert_eq!(fx.group.stats().transferred_bytes, 0);
}

/// Test reading a message that was never committed
///
/// **Bug this finds:** Receiver taking blocks the sender still owns
#[test]
fn test_read_uncommitted_message() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let buffer = heap.new_transferable(&[1, 2]);
    let source = peer_of(&fx, buffer);
    let message = fx.group.write_message(Value::Ref(buffer)).unwrap();

    // Act
    let result = fx.group.read_message(message);

    // Assert
    let err = result.unwrap_err();
    assert!(matches!(err, SnapshotError::InvalidState { .. }));
    assert_eq!(source.length(), 2);
}
