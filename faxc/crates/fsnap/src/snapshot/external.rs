//! External-Buffer Transfer Protocol
//!
//! Large byte buffers leave a message through the message's
//! [`MessageFinalizableData`] instead of the byte stream. There are two
//! flavors:
//!
//! - **Externalization** copies the buffer once into a fresh block. The copy
//!   is freed if the send aborts.
//! - **Transfer** hands over a [`TransferablePeer`]'s block without copying.
//!   The peer keeps its block if the send aborts and is emptied when the send
//!   commits.
//!
//! On the receiving side the block is taken out of the registry in stream
//! order and the decoded object is built directly over it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SnapshotError};
use crate::logging::{log_event, SnapshotEvent};
use crate::object::ObjectKind;
use crate::runtime::finalizer::MessageFinalizableData;

/// Out-of-heap byte block
pub type ExternalBlock = Box<[u8]>;

/// Owner token of a transferable byte block
///
/// At most one value owns the block at a time. A written message reserves
/// the peer until it commits or aborts; a committed transfer empties the
/// peer and its length reads zero from then on.
pub struct TransferablePeer {
    data: Mutex<Option<ExternalBlock>>,
    reserved: AtomicBool,
}

impl TransferablePeer {
    /// Wrap a copy of `bytes`
    pub fn new(bytes: &[u8]) -> Arc<Self> {
        Self::from_block(bytes.to_vec().into_boxed_slice())
    }

    /// Take ownership of an existing block
    pub fn from_block(block: ExternalBlock) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(Some(block)),
            reserved: AtomicBool::new(false),
        })
    }

    /// Length in bytes; zero once transferred
    pub fn length(&self) -> usize {
        self.data.lock().as_ref().map_or(0, |block| block.len())
    }

    /// Check whether the block has been moved out
    pub fn is_transferred(&self) -> bool {
        self.data.lock().is_none()
    }

    /// Check whether a pending message holds the peer
    pub fn is_reserved(&self) -> bool {
        self.reserved.load(Ordering::Acquire)
    }

    /// Move the block out, leaving the peer empty
    pub fn take_data(&self) -> Option<ExternalBlock> {
        self.data.lock().take()
    }

    /// Claim the peer for one pending message; false if another holds it
    fn try_reserve(&self) -> bool {
        self.reserved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.reserved.store(false, Ordering::Release);
    }

    /// Inspect the block without moving it
    pub fn with_data<R>(&self, f: impl FnOnce(Option<&[u8]>) -> R) -> R {
        let data = self.data.lock();
        f(data.as_deref())
    }
}

impl fmt::Debug for TransferablePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferablePeer")
            .field("length", &self.length())
            .field("reserved", &self.is_reserved())
            .finish()
    }
}

/// Copy `bytes` into a fresh block owned by the message
///
/// Returns the byte length to write into the stream.
pub(crate) fn externalize_copy(registry: &mut MessageFinalizableData, bytes: &[u8]) -> usize {
    let length = bytes.len();
    let block: ExternalBlock = bytes.to_vec().into_boxed_slice();
    registry.put(
        length,
        Some(block),
        None,
        Box::new(|entry| {
            log::debug!("releasing {} externalized bytes of an aborted message", entry.length);
            entry.data = None;
        }),
        Box::new(|_| {}),
    );
    log::debug!("externalized {} bytes", length);
    log_event(SnapshotEvent::Externalized { bytes: length });
    length
}

/// Hand a peer's block to the message without copying
///
/// The source keeps its data until the message commits, but stays reserved
/// so no other message can claim it meanwhile.
pub(crate) fn transfer_peer(
    registry: &mut MessageFinalizableData,
    peer: &Arc<TransferablePeer>,
) -> Result<usize> {
    let length = peer.length();
    if peer.is_transferred() {
        return Err(SnapshotError::illegal(
            ObjectKind::TransferableTypedData,
            "TransferableTypedData has been transferred already",
        ));
    }
    if registry.contains_peer(peer) {
        return Err(SnapshotError::illegal(
            ObjectKind::TransferableTypedData,
            "TransferableTypedData is referenced twice by one message",
        ));
    }
    if !peer.try_reserve() {
        return Err(SnapshotError::illegal(
            ObjectKind::TransferableTypedData,
            "TransferableTypedData is already part of another pending message",
        ));
    }

    registry.put(
        length,
        None,
        Some(Arc::clone(peer)),
        Box::new(|entry| {
            if let Some(peer) = &entry.peer {
                peer.release();
            }
        }),
        Box::new(|entry| {
            if let Some(peer) = &entry.peer {
                entry.data = peer.take_data();
                peer.release();
            }
        }),
    );
    log::debug!("transferring {} bytes", length);
    log_event(SnapshotEvent::Transferred { bytes: length });
    Ok(length)
}

/// Take the next block of a received message
///
/// `expected_len` is the byte length recorded in the stream; a block of
/// another size means the stream and its hand-off list disagree.
pub(crate) fn take_block(
    registry: Option<&mut MessageFinalizableData>,
    expected_len: usize,
    offset: usize,
) -> Result<ExternalBlock> {
    let registry = registry.ok_or_else(|| {
        SnapshotError::format(offset, "external block referenced without finalizable data")
    })?;
    let entry = registry.take()?;
    let block = entry
        .data
        .ok_or_else(|| SnapshotError::Internal("taken hand-off entry without a block".into()))?;
    if block.len() != expected_len {
        return Err(SnapshotError::format(
            offset,
            format!(
                "external block of {} bytes where {} were recorded",
                block.len(),
                expected_len
            ),
        ));
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_empties_peer_on_commit() {
        let peer = TransferablePeer::new(&[1, 2, 3]);
        let mut registry = MessageFinalizableData::new();

        assert_eq!(transfer_peer(&mut registry, &peer).unwrap(), 3);
        assert_eq!(peer.length(), 3);

        registry.commit();
        assert!(peer.is_transferred());
        assert_eq!(peer.length(), 0);

        let block = take_block(Some(&mut registry), 3, 0).unwrap();
        assert_eq!(&block[..], &[1, 2, 3]);
    }

    #[test]
    fn test_abandoned_transfer_keeps_source() {
        let peer = TransferablePeer::new(&[9; 8]);
        {
            let mut registry = MessageFinalizableData::new();
            transfer_peer(&mut registry, &peer).unwrap();
        }
        assert_eq!(peer.length(), 8);
        assert!(!peer.is_transferred());
        assert!(!peer.is_reserved());
    }

    #[test]
    fn test_pending_peer_is_reserved() {
        let peer = TransferablePeer::new(&[4, 5]);
        let mut first = MessageFinalizableData::new();
        let mut second = MessageFinalizableData::new();

        transfer_peer(&mut first, &peer).unwrap();
        assert!(peer.is_reserved());
        let err = transfer_peer(&mut second, &peer).unwrap_err();
        assert!(err.is_catchable());
        assert!(second.is_empty());

        first.commit();
        assert!(!peer.is_reserved());
        assert!(transfer_peer(&mut second, &peer).is_err());
    }

    #[test]
    fn test_emptied_peer_is_rejected() {
        let peer = TransferablePeer::new(&[1]);
        peer.take_data();
        let mut registry = MessageFinalizableData::new();
        let err = transfer_peer(&mut registry, &peer).unwrap_err();
        assert!(err.is_catchable());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_same_peer_twice_in_one_message() {
        let peer = TransferablePeer::new(&[1, 2]);
        let mut registry = MessageFinalizableData::new();
        transfer_peer(&mut registry, &peer).unwrap();
        assert!(transfer_peer(&mut registry, &peer).is_err());
    }

    #[test]
    fn test_take_block_length_mismatch() {
        let mut registry = MessageFinalizableData::new();
        externalize_copy(&mut registry, &[0; 4]);
        registry.commit();
        assert!(take_block(Some(&mut registry), 5, 10)
            .unwrap_err()
            .is_format_error());
        assert!(take_block(None, 1, 0).unwrap_err().is_format_error());
    }
}
