//! Corrupt Stream Tests - Reader Robustness
//!
//! These tests feed the reader streams no correct writer produces and
//! verify every one of them is rejected with an error instead of a panic or
//! a half-built graph:
//! - Bad preambles and truncated payloads
//! - Unknown markers, dangling back-references, trailing bytes
//! - Headers with reserved bits or impossible flags
//! - Kinds that may not appear in the stream's snapshot kind
//!
//! ============================================================================
//! THE READER MUST NEVER PANIC ON UNTRUSTED INPUT
//! ============================================================================

mod common;

use common::GroupFixture;
use fsnap::object::Nullability;
use fsnap::{ObjectKind, SnapshotError, SnapshotKind, SnapshotReader, Value};

const MAGIC: &[u8] = b"FXSN";

/// Preamble for `kind` followed by `body`
fn stream(kind: SnapshotKind, body: &[u8]) -> Vec<u8> {
    let mut bytes = MAGIC.to_vec();
    bytes.push(kind.code());
    bytes.extend_from_slice(body);
    bytes
}

fn assert_format_error(result: fsnap::Result<Value>) {
    match result {
        Err(err) => assert!(err.is_format_error(), "expected a format error, got {}", err),
        Ok(value) => panic!("corrupt stream decoded to {:?}", value),
    }
}

/// ============================================================================
/// PREAMBLE
/// ============================================================================

/// Test a stream with the wrong magic
///
/// **Bug this finds:** Arbitrary bytes interpreted as a snapshot
#[test]
fn test_bad_magic() {
    let fx = GroupFixture::with_defaults();
    assert_format_error(fx.group.read_snapshot(b"XXSN\x00\x00"));
}

/// Test streams shorter than the preamble
///
/// **Bug this finds:** Out-of-bounds reads on empty input
#[test]
fn test_short_preamble() {
    let fx = GroupFixture::with_defaults();
    assert_format_error(fx.group.read_snapshot(b""));
    assert_format_error(fx.group.read_snapshot(b"FXS"));
    assert_format_error(fx.group.read_snapshot(b"FXSN"));
}

/// Test a message stream fed to a full-snapshot reader
///
/// **Bug this finds:** Snapshot kind ignored by the reader
#[test]
fn test_message_read_as_full() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let message = fx
        .group
        .write_message(Value::Ref(heap.new_string("hi")))
        .unwrap();

    // Act
    let result = fx.group.read_snapshot(message.bytes());

    // Assert
    assert_format_error(result);
}

/// ============================================================================
/// VALUES
/// ============================================================================

/// Test an unknown marker byte
///
/// **Bug this finds:** Unchecked marker dispatch
#[test]
fn test_unknown_marker() {
    let fx = GroupFixture::with_defaults();
    assert_format_error(fx.group.read_snapshot(&stream(SnapshotKind::Full, &[200])));
}

/// Test a back-reference to an id never bound
///
/// **Bug this finds:** Dangling ids resolving to garbage
#[test]
fn test_dangling_back_reference() {
    let fx = GroupFixture::with_defaults();
    assert_format_error(fx.group.read_snapshot(&stream(SnapshotKind::Full, &[4, 5])));
}

/// Test a small integer outside the representable range
///
/// **Bug this finds:** Oversized immediates accepted without a box
#[test]
fn test_small_integer_out_of_range() {
    let fx = GroupFixture::with_defaults();
    // zigzag(1 << 40) as unsigned LEB128
    let mut body = vec![3u8];
    let mut value: u64 = (1u64 << 40) << 1;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            body.push(byte);
            break;
        }
        body.push(byte | 0x80);
    }
    assert_format_error(fx.group.read_snapshot(&stream(SnapshotKind::Full, &body)));
}

/// Test bytes after a complete graph
///
/// **Bug this finds:** Concatenated or padded streams accepted silently
#[test]
fn test_trailing_bytes() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let mut bytes = fx.group.write_snapshot(Value::Smi(1)).unwrap();
    bytes.push(0);

    // Act
    let result = fx.group.read_snapshot(&bytes);

    // Assert
    assert_format_error(result);
}

/// Test every truncation of a valid stream
///
/// **Bug this finds:** Panics on short payloads, graphs returned with
/// unfilled placeholders
/// **Invariant verified:** No proper prefix of a stream decodes
#[test]
fn test_every_truncation_fails() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let heap = fx.group.heap();
    let inner = heap.new_instance(fx.point, vec![Value::Smi(1), Value::Null]);
    let map = fx
        .group
        .new_map(vec![(Value::Ref(heap.new_string("k")), Value::Ref(inner))])
        .unwrap();
    let root = heap.new_array(vec![
        Value::Ref(heap.new_string("\u{3c0}")),
        Value::Ref(inner),
        Value::Ref(map),
        Value::Ref(heap.new_mint(1 << 50)),
    ]);
    let bytes = fx.group.write_snapshot(Value::Ref(root)).unwrap();

    for len in 0..bytes.len() {
        // Act
        let result = fx.group.read_snapshot(&bytes[..len]);

        // Assert
        assert!(result.is_err(), "prefix of {} bytes decoded", len);
    }
}

/// ============================================================================
/// HEADERS
/// ============================================================================

/// Test an unknown kind tag
///
/// **Bug this finds:** Dispatch table indexed out of range
#[test]
fn test_unknown_kind_tag() {
    let fx = GroupFixture::with_defaults();
    assert_format_error(fx.group.read_snapshot(&stream(SnapshotKind::Full, &[5, 250, 0])));
}

/// Test a tag byte with reserved bits set
///
/// **Bug this finds:** Future header bits silently ignored
#[test]
fn test_reserved_tag_bits() {
    let fx = GroupFixture::with_defaults();
    let body = [5, ObjectKind::Mint.tag(), 0b1110_0000, 0, 0, 0, 0, 0, 0, 0, 0];
    assert_format_error(fx.group.read_snapshot(&stream(SnapshotKind::Full, &body)));
}

/// Test the canonical flag on a kind that is never canonical
///
/// **Bug this finds:** Mutable objects entering the canonical table
#[test]
fn test_canonical_flag_on_growable_array() {
    let fx = GroupFixture::with_defaults();
    let body = [5, ObjectKind::GrowableArray.tag(), 0b0000_0001, 0, 0, 0];
    assert_format_error(fx.group.read_snapshot(&stream(SnapshotKind::Full, &body)));
}

/// Test an allocation header for a kind written in one step
///
/// **Bug this finds:** Placeholders of kinds the forward list never fills
#[test]
fn test_allocate_marker_on_unsplit_kind() {
    let fx = GroupFixture::with_defaults();
    let body = [7, ObjectKind::Double.tag(), 0];
    assert_format_error(fx.group.read_snapshot(&stream(SnapshotKind::Full, &body)));
}

/// Test an allocation that is never filled
///
/// **Bug this finds:** Graphs returned with uninitialized objects
#[test]
fn test_allocation_without_fill() {
    let fx = GroupFixture::with_defaults();
    // Root array of one element whose element is an unfilled allocation
    let body = [
        5,
        ObjectKind::Array.tag(),
        0,
        1,
        0,
        7,
        ObjectKind::Array.tag(),
        0,
        0,
    ];
    assert_format_error(fx.group.read_snapshot(&stream(SnapshotKind::Full, &body)));
}

/// Test a type naming a class the reading group does not know
///
/// **Bug this finds:** Types decoded over class ids that resolve to nothing
#[test]
fn test_type_with_unknown_class() {
    // Arrange
    let sender = GroupFixture::with_defaults();
    let extra = sender.classes.class("Extra").fields(0).register();
    let heap = sender.group.heap();
    let ty = heap.new_type(extra, Nullability::Nullable);
    let bytes = sender.group.write_snapshot(Value::Ref(ty)).unwrap();
    let receiver = GroupFixture::with_defaults();

    // Act
    let known = sender.group.read_snapshot(&bytes);
    let unknown = receiver.group.read_snapshot(&bytes);

    // Assert
    assert!(known.is_ok());
    assert_format_error(unknown);
}

/// ============================================================================
/// KIND POLICY
/// ============================================================================

/// Test a context inside a message stream
///
/// **Bug this finds:** Decoders trusting the sender's boundary policy
/// **Invariant verified:** Kinds no correct writer emits are reported as bugs
#[test]
fn test_context_in_message_stream() {
    // Arrange
    let fx = GroupFixture::with_defaults();
    let bytes = stream(SnapshotKind::Message, &[5, ObjectKind::Context.tag(), 0, 0, 0]);

    // Act
    let result = SnapshotReader::new(&fx.group, &bytes, SnapshotKind::Message).read_object();

    // Assert
    match result {
        Err(err @ SnapshotError::UnreachableDecode { .. }) => assert!(err.is_bug()),
        other => panic!("expected an unreachable decode, got {:?}", other),
    }
}

/// Test a stack trace inside a full snapshot
///
/// **Bug this finds:** Forbidden kinds accepted outside messages
#[test]
fn test_forbidden_kind_in_full_snapshot() {
    let fx = GroupFixture::with_defaults();
    let bytes = stream(SnapshotKind::Full, &[5, ObjectKind::StackTrace.tag(), 0]);
    assert!(matches!(
        fx.group.read_snapshot(&bytes),
        Err(SnapshotError::UnreachableDecode {
            kind: ObjectKind::StackTrace,
            snapshot: SnapshotKind::Full,
        })
    ));
}

/// Test a transferable inside a full snapshot
///
/// **Bug this finds:** Hand-off blocks taken from a stream that has none
#[test]
fn test_transferable_in_full_snapshot() {
    let fx = GroupFixture::with_defaults();
    let bytes = stream(
        SnapshotKind::Full,
        &[5, ObjectKind::TransferableTypedData.tag(), 0, 3],
    );
    assert!(matches!(
        fx.group.read_snapshot(&bytes),
        Err(SnapshotError::UnreachableDecode { .. })
    ));
}

/// Test external string tags in both snapshot kinds
///
/// **Bug this finds:** Receiver building a string over memory it does not own
/// **Invariant verified:** External strings only ever travel as plain strings
#[test]
fn test_external_string_tag() {
    let fx = GroupFixture::with_defaults();
    for kind in [ObjectKind::ExternalOneByteString, ObjectKind::ExternalTwoByteString] {
        for snapshot in [SnapshotKind::Full, SnapshotKind::Message] {
            let bytes = stream(snapshot, &[5, kind.tag(), 0, 1, b'x']);
            let result = SnapshotReader::new(&fx.group, &bytes, snapshot).read_object();
            match result {
                Err(SnapshotError::UnreachableDecode {
                    kind: found,
                    snapshot: during,
                }) => {
                    assert_eq!(found, kind);
                    assert_eq!(during, snapshot);
                },
                other => panic!("expected an unreachable decode, got {:?}", other),
            }
        }
    }
}

/// Test a failed read leaves the group totals alone
///
/// **Bug this finds:** Aborted reads recorded as passes
#[test]
fn test_failed_read_is_not_recorded() {
    let fx = GroupFixture::with_defaults();
    let _ = fx.group.read_snapshot(&stream(SnapshotKind::Full, &[4, 0]));
    assert_eq!(fx.group.stats(), fsnap::PassStats::default());
}
