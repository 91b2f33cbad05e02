//! Tag/Header Codec
//!
//! Stream preamble, reference markers and the per-object header.
//!
//! ```text
//! stream    := preamble root fill*
//! preamble  := "FXSN" kind:u8
//! reference := NULL | TRUE | FALSE | SMI zigzag | BACKREF id
//!            | INLINE header payload
//!            | INLINE_WITH_ID id header payload
//!            | ALLOCATE header allocation
//! header    := kind-tag:u8 tag-byte:u8
//! ```
//!
//! Tag byte layout:
//!
//! ```text
//!  7   6   5   4   3   2   1   0
//! ┌───┬───┬───┬───┬───┬───┬───┬───┐
//! │ 0 │ 0 │ 0 │  kind flags   │ C │   C = canonical
//! └───┴───┴───┴───┴───┴───┴───┴───┘
//! ```

use super::stream::{ReadStream, WriteStream};
use super::SnapshotKind;
use crate::error::{Result, SnapshotError};
use crate::object::{ElementType, Nullability, ObjectKind, TypeState};

/// Stream magic
pub const MAGIC: [u8; 4] = *b"FXSN";

/// Preamble length in bytes
pub const PREAMBLE_LEN: usize = MAGIC.len() + 1;

/// Reference marker
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Marker {
    Null = 0,
    True = 1,
    False = 2,
    Smi = 3,
    BackRef = 4,
    /// Object inline; its id is the next id
    Inline = 5,
    /// Forward-list fill of an already allocated id
    InlineWithId = 6,
    /// Allocation header of a split kind; its id is the next id
    Allocate = 7,
}

impl Marker {
    pub fn from_u8(byte: u8) -> Option<Marker> {
        Some(match byte {
            0 => Marker::Null,
            1 => Marker::True,
            2 => Marker::False,
            3 => Marker::Smi,
            4 => Marker::BackRef,
            5 => Marker::Inline,
            6 => Marker::InlineWithId,
            7 => Marker::Allocate,
            _ => return None,
        })
    }

    /// Whether an object header follows
    pub fn has_header(self) -> bool {
        matches!(self, Marker::Inline | Marker::InlineWithId | Marker::Allocate)
    }
}

/// Write the stream preamble
pub fn write_preamble(out: &mut WriteStream, kind: SnapshotKind) {
    out.write_bytes(&MAGIC);
    out.write_u8(kind.code());
}

/// Read and check the stream preamble
pub fn read_preamble(input: &mut ReadStream<'_>, expected: SnapshotKind) -> Result<()> {
    let kind = read_preamble_kind(input)?;
    if kind != expected {
        return Err(SnapshotError::format(
            MAGIC.len(),
            format!("{} stream fed to a {} reader", kind, expected),
        ));
    }
    Ok(())
}

/// Read the preamble and return the snapshot kind it declares
pub fn read_preamble_kind(input: &mut ReadStream<'_>) -> Result<SnapshotKind> {
    let magic = input
        .read_bytes(MAGIC.len())
        .map_err(|_| SnapshotError::format(0, "stream shorter than its preamble"))?;
    if magic != MAGIC {
        return Err(SnapshotError::format(0, "bad magic"));
    }
    let at = input.position();
    let code = input.read_u8()?;
    SnapshotKind::from_code(code)
        .ok_or_else(|| SnapshotError::format(at, format!("unknown snapshot kind {}", code)))
}

/// Auxiliary header bits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagByte(u8);

impl TagByte {
    const CANONICAL: u8 = 0b0000_0001;
    const FLAGS_SHIFT: u8 = 1;
    const FLAGS_MASK: u8 = 0b0001_1110;

    pub fn new(canonical: bool) -> Self {
        TagByte(if canonical { Self::CANONICAL } else { 0 })
    }

    /// Tag byte with four kind-specific flag bits
    pub fn with_flags(canonical: bool, flags: u8) -> Self {
        debug_assert!(flags < 16);
        TagByte(Self::new(canonical).0 | ((flags << Self::FLAGS_SHIFT) & Self::FLAGS_MASK))
    }

    /// Tag byte carrying a typed-data element type
    pub fn with_element(canonical: bool, element: ElementType) -> Self {
        Self::with_flags(canonical, element as u8)
    }

    /// Parse a raw tag byte; the top three bits are reserved
    pub fn from_raw(raw: u8, offset: usize) -> Result<Self> {
        if raw & !(Self::CANONICAL | Self::FLAGS_MASK) != 0 {
            return Err(SnapshotError::format(
                offset,
                format!("reserved tag bits set in {:#04x}", raw),
            ));
        }
        Ok(TagByte(raw))
    }

    #[inline]
    pub fn raw(self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_canonical(self) -> bool {
        self.0 & Self::CANONICAL != 0
    }

    #[inline]
    pub fn flags(self) -> u8 {
        (self.0 & Self::FLAGS_MASK) >> Self::FLAGS_SHIFT
    }

    /// Element type stored in the flag bits
    pub fn element(self, offset: usize) -> Result<ElementType> {
        ElementType::from_u8(self.flags()).ok_or_else(|| {
            SnapshotError::format(offset, format!("unknown element type {}", self.flags()))
        })
    }
}

/// Write an object header
pub fn write_header(out: &mut WriteStream, kind: ObjectKind, tag: TagByte) {
    out.write_u8(kind.tag());
    out.write_u8(tag.raw());
}

/// Read an object header
pub fn read_header(input: &mut ReadStream<'_>) -> Result<(ObjectKind, TagByte)> {
    let at = input.position();
    let code = input.read_u8()?;
    let kind = ObjectKind::from_u8(code)
        .ok_or_else(|| SnapshotError::format(at, format!("unknown kind tag {}", code)))?;
    let tag = TagByte::from_raw(input.read_u8()?, at + 1)?;
    Ok((kind, tag))
}

/// Pack a type's state and nullability into one byte
pub fn pack_type_byte(state: TypeState, nullability: Nullability) -> u8 {
    ((state as u8) << 4) | nullability as u8
}

/// Unpack a type byte
pub fn unpack_type_byte(byte: u8, offset: usize) -> Result<(TypeState, Nullability)> {
    let state = TypeState::from_u8(byte >> 4)
        .ok_or_else(|| SnapshotError::format(offset, "unknown type state"))?;
    let nullability = unpack_nullability(byte, offset)?;
    Ok((state, nullability))
}

/// Pack a type parameter's flags and nullability into one byte
pub fn pack_parameter_byte(flags: u8, nullability: Nullability) -> u8 {
    ((flags & 0x0F) << 4) | nullability as u8
}

/// Unpack a type parameter byte into (flags, nullability)
pub fn unpack_parameter_byte(byte: u8, offset: usize) -> Result<(u8, Nullability)> {
    Ok((byte >> 4, unpack_nullability(byte, offset)?))
}

fn unpack_nullability(byte: u8, offset: usize) -> Result<Nullability> {
    Nullability::from_u8(byte & 0x0F)
        .ok_or_else(|| SnapshotError::format(offset, "unknown nullability"))
}
