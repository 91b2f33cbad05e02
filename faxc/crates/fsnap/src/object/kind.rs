//! Object kinds
//!
//! The closed enumeration of heap object kinds. The discriminant doubles as
//! the kind tag on the wire, so the order below is part of the stream format.

use std::fmt;

/// Heap object kind
///
/// Immediates (null, booleans, small integers) are not heap objects and have
/// no kind; they travel as reference markers.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Mint = 0,
    Double,
    OneByteString,
    TwoByteString,
    ExternalOneByteString,
    ExternalTwoByteString,
    Array,
    ImmutableArray,
    GrowableArray,
    Map,
    Float32x4,
    Int32x4,
    Float64x2,
    TypedData,
    ExternalTypedData,
    TypedDataView,
    TransferableTypedData,
    Instance,
    Closure,
    Context,
    ContextScope,
    Capability,
    SendPort,
    RegExp,
    Type,
    TypeRef,
    TypeParameter,
    TypeParameters,
    TypeArguments,
    ApiError,
    LanguageError,
    UnhandledException,
    WeakProperty,
    Class,
    Function,
    Code,
    StackTrace,
    ReceivePort,
    Pointer,
    UserTag,
}

/// Coarse grouping of kinds used by the dispatch table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindCategory {
    /// Scalar payload, no children
    Plain,
    /// Scalar fields plus child slots in declared order
    Structural,
    /// Runtime metadata written as a table id, full snapshots only
    Metadata,
    /// Never serialized
    Forbidden,
}

impl ObjectKind {
    /// Number of kinds
    pub const COUNT: usize = 40;

    /// Every kind in tag order
    pub const ALL: [ObjectKind; ObjectKind::COUNT] = [
        ObjectKind::Mint,
        ObjectKind::Double,
        ObjectKind::OneByteString,
        ObjectKind::TwoByteString,
        ObjectKind::ExternalOneByteString,
        ObjectKind::ExternalTwoByteString,
        ObjectKind::Array,
        ObjectKind::ImmutableArray,
        ObjectKind::GrowableArray,
        ObjectKind::Map,
        ObjectKind::Float32x4,
        ObjectKind::Int32x4,
        ObjectKind::Float64x2,
        ObjectKind::TypedData,
        ObjectKind::ExternalTypedData,
        ObjectKind::TypedDataView,
        ObjectKind::TransferableTypedData,
        ObjectKind::Instance,
        ObjectKind::Closure,
        ObjectKind::Context,
        ObjectKind::ContextScope,
        ObjectKind::Capability,
        ObjectKind::SendPort,
        ObjectKind::RegExp,
        ObjectKind::Type,
        ObjectKind::TypeRef,
        ObjectKind::TypeParameter,
        ObjectKind::TypeParameters,
        ObjectKind::TypeArguments,
        ObjectKind::ApiError,
        ObjectKind::LanguageError,
        ObjectKind::UnhandledException,
        ObjectKind::WeakProperty,
        ObjectKind::Class,
        ObjectKind::Function,
        ObjectKind::Code,
        ObjectKind::StackTrace,
        ObjectKind::ReceivePort,
        ObjectKind::Pointer,
        ObjectKind::UserTag,
    ];

    /// Kinds a string slot accepts
    pub const STRINGS: &'static [ObjectKind] =
        &[ObjectKind::OneByteString, ObjectKind::TwoByteString];

    /// Kinds a type slot accepts
    pub const TYPES: &'static [ObjectKind] =
        &[ObjectKind::Type, ObjectKind::TypeRef, ObjectKind::TypeParameter];

    /// Kinds a typed-data backing store slot accepts
    pub const TYPED_DATA_STORES: &'static [ObjectKind] =
        &[ObjectKind::TypedData, ObjectKind::ExternalTypedData];

    /// Decode a kind tag
    pub fn from_u8(tag: u8) -> Option<ObjectKind> {
        ObjectKind::ALL.get(tag as usize).copied()
    }

    /// Wire tag of this kind
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Dispatch category
    pub fn category(self) -> KindCategory {
        use ObjectKind::*;
        match self {
            Mint | Double | OneByteString | TwoByteString | ExternalOneByteString
            | ExternalTwoByteString | Float32x4 | Int32x4 | Float64x2 | TypedData
            | ExternalTypedData | TransferableTypedData | Capability | SendPort => {
                KindCategory::Plain
            },
            Array | ImmutableArray | GrowableArray | Map | TypedDataView | Instance | Closure
            | Context | ContextScope | RegExp | Type | TypeRef | TypeParameter
            | TypeParameters | TypeArguments | ApiError | LanguageError | UnhandledException
            | WeakProperty => KindCategory::Structural,
            Class | Function | Code => KindCategory::Metadata,
            StackTrace | ReceivePort | Pointer | UserTag => KindCategory::Forbidden,
        }
    }

    /// Whether the kind is written in two steps when reached in reference mode
    ///
    /// Split kinds get an allocation header first and their contents later,
    /// through the writer's forward list.
    pub fn is_split(self) -> bool {
        matches!(
            self,
            ObjectKind::Array | ObjectKind::ImmutableArray | ObjectKind::Instance
        )
    }

    /// Whether instances of the kind may carry the canonical flag
    pub fn is_canonicalizable(self) -> bool {
        use ObjectKind::*;
        matches!(
            self,
            Mint | Double
                | OneByteString
                | TwoByteString
                | ImmutableArray
                | Map
                | TypedData
                | Instance
                | Type
                | TypeParameter
                | TypeArguments
        )
    }

    /// Whether the kind is a string
    pub fn is_string(self) -> bool {
        ObjectKind::STRINGS.contains(&self) || self.is_external_string()
    }

    /// Strings over out-of-heap code units; written as their in-heap kind
    pub fn is_external_string(self) -> bool {
        matches!(
            self,
            ObjectKind::ExternalOneByteString | ObjectKind::ExternalTwoByteString
        )
    }

    /// Human-readable kind name
    pub fn name(self) -> &'static str {
        use ObjectKind::*;
        match self {
            Mint => "Mint",
            Double => "Double",
            OneByteString => "OneByteString",
            TwoByteString => "TwoByteString",
            ExternalOneByteString => "ExternalOneByteString",
            ExternalTwoByteString => "ExternalTwoByteString",
            Array => "Array",
            ImmutableArray => "ImmutableArray",
            GrowableArray => "GrowableArray",
            Map => "Map",
            Float32x4 => "Float32x4",
            Int32x4 => "Int32x4",
            Float64x2 => "Float64x2",
            TypedData => "TypedData",
            ExternalTypedData => "ExternalTypedData",
            TypedDataView => "TypedDataView",
            TransferableTypedData => "TransferableTypedData",
            Instance => "Instance",
            Closure => "Closure",
            Context => "Context",
            ContextScope => "ContextScope",
            Capability => "Capability",
            SendPort => "SendPort",
            RegExp => "RegExp",
            Type => "Type",
            TypeRef => "TypeRef",
            TypeParameter => "TypeParameter",
            TypeParameters => "TypeParameters",
            TypeArguments => "TypeArguments",
            ApiError => "ApiError",
            LanguageError => "LanguageError",
            UnhandledException => "UnhandledException",
            WeakProperty => "WeakProperty",
            Class => "Class",
            Function => "Function",
            Code => "Code",
            StackTrace => "StackTrace",
            ReceivePort => "ReceivePort",
            Pointer => "Pointer",
            UserTag => "UserTag",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type of a typed byte buffer
///
/// Fits in four bits; stored in the kind-flag bits of the tag byte.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int8 = 0,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Float32x4,
    Int32x4,
    Float64x2,
}

impl ElementType {
    /// Decode an element type from its four-bit code
    pub fn from_u8(code: u8) -> Option<ElementType> {
        use ElementType::*;
        Some(match code {
            0 => Int8,
            1 => Uint8,
            2 => Uint8Clamped,
            3 => Int16,
            4 => Uint16,
            5 => Int32,
            6 => Uint32,
            7 => Int64,
            8 => Uint64,
            9 => Float32,
            10 => Float64,
            11 => Float32x4,
            12 => Int32x4,
            13 => Float64x2,
            _ => return None,
        })
    }

    /// Width of one element in bytes
    pub fn size(self) -> usize {
        use ElementType::*;
        match self {
            Int8 | Uint8 | Uint8Clamped => 1,
            Int16 | Uint16 => 2,
            Int32 | Uint32 | Float32 => 4,
            Int64 | Uint64 | Float64 => 8,
            Float32x4 | Int32x4 | Float64x2 => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_kinds_in_tag_order() {
        for (index, kind) in ObjectKind::ALL.iter().enumerate() {
            assert_eq!(kind.tag() as usize, index);
            assert_eq!(ObjectKind::from_u8(index as u8), Some(*kind));
        }
        assert_eq!(ObjectKind::from_u8(ObjectKind::COUNT as u8), None);
    }

    #[test]
    fn test_split_kinds_are_structural() {
        for kind in ObjectKind::ALL {
            if kind.is_split() {
                assert_eq!(kind.category(), KindCategory::Structural);
            }
        }
    }

    #[test]
    fn test_mutable_array_not_canonicalizable() {
        assert!(!ObjectKind::Array.is_canonicalizable());
        assert!(ObjectKind::ImmutableArray.is_canonicalizable());
        assert!(!ObjectKind::Code.is_canonicalizable());
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(ElementType::Uint8.size(), 1);
        assert_eq!(ElementType::Int16.size(), 2);
        assert_eq!(ElementType::Float32.size(), 4);
        assert_eq!(ElementType::Uint64.size(), 8);
        assert_eq!(ElementType::Float64x2.size(), 16);
        for code in 0..14u8 {
            assert_eq!(ElementType::from_u8(code).map(|e| e as u8), Some(code));
        }
        assert_eq!(ElementType::from_u8(14), None);
    }
}
