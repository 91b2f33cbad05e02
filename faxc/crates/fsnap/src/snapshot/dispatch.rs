//! Kind Dispatch Table
//!
//! Total, read-only map from kind tag to its encode/decode pair. The table is
//! indexed by the kind's wire tag; a unit test checks it is complete and in
//! tag order.

use crate::error::Result;
use crate::object::{ObjectKind, Value};

use super::codecs::{collection, instance, scalar, typed_data, types};
use super::header::TagByte;
use super::reader::{ReadSlot, SnapshotReader};
use super::writer::{SnapshotWriter, WriteSlot};

/// Encoder: writes the header and payload of the object in the slot
pub type EncodeFn = for<'w> fn(&mut SnapshotWriter<'w>, WriteSlot) -> Result<()>;

/// Decoder: reads the payload after the header, binds the slot's id and
/// returns the decoded value
pub type DecodeFn = for<'r> fn(&mut SnapshotReader<'r>, ReadSlot, TagByte) -> Result<Value>;

/// Encode/decode pair of one kind
pub struct KindCodec {
    pub kind: ObjectKind,
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

macro_rules! codec {
    ($kind:ident, $module:ident :: $encode:ident, $decode:ident) => {
        KindCodec {
            kind: ObjectKind::$kind,
            encode: $module::$encode,
            decode: $module::$decode,
        }
    };
}

static DISPATCH_TABLE: [KindCodec; ObjectKind::COUNT] = [
    codec!(Mint, scalar::encode_mint, decode_mint),
    codec!(Double, scalar::encode_double, decode_double),
    codec!(OneByteString, scalar::encode_string, decode_one_byte_string),
    codec!(TwoByteString, scalar::encode_string, decode_two_byte_string),
    codec!(ExternalOneByteString, scalar::encode_string, decode_external_string),
    codec!(ExternalTwoByteString, scalar::encode_string, decode_external_string),
    codec!(Array, collection::encode_array, decode_array),
    codec!(ImmutableArray, collection::encode_array, decode_immutable_array),
    codec!(GrowableArray, collection::encode_growable_array, decode_growable_array),
    codec!(Map, collection::encode_map, decode_map),
    codec!(Float32x4, scalar::encode_simd, decode_float32x4),
    codec!(Int32x4, scalar::encode_simd, decode_int32x4),
    codec!(Float64x2, scalar::encode_simd, decode_float64x2),
    codec!(TypedData, typed_data::encode_typed_data, decode_typed_data),
    codec!(
        ExternalTypedData,
        typed_data::encode_external_typed_data,
        decode_external_typed_data
    ),
    codec!(TypedDataView, typed_data::encode_view, decode_view),
    codec!(TransferableTypedData, typed_data::encode_transferable, decode_transferable),
    codec!(Instance, instance::encode_instance, decode_instance),
    codec!(Closure, instance::encode_closure, decode_closure),
    codec!(Context, instance::encode_context, decode_context),
    codec!(ContextScope, instance::encode_context_scope, decode_context_scope),
    codec!(Capability, scalar::encode_capability, decode_capability),
    codec!(SendPort, scalar::encode_send_port, decode_send_port),
    codec!(RegExp, instance::encode_regexp, decode_regexp),
    codec!(Type, types::encode_type, decode_type),
    codec!(TypeRef, types::encode_type_ref, decode_type_ref),
    codec!(TypeParameter, types::encode_type_parameter, decode_type_parameter),
    codec!(TypeParameters, types::encode_type_parameters, decode_type_parameters),
    codec!(TypeArguments, types::encode_type_arguments, decode_type_arguments),
    codec!(ApiError, instance::encode_api_error, decode_api_error),
    codec!(LanguageError, instance::encode_language_error, decode_language_error),
    codec!(
        UnhandledException,
        instance::encode_unhandled_exception,
        decode_unhandled_exception
    ),
    codec!(WeakProperty, instance::encode_weak_property, decode_weak_property),
    codec!(Class, types::encode_metadata, decode_class),
    codec!(Function, types::encode_metadata, decode_function),
    codec!(Code, types::encode_metadata, decode_code),
    codec!(StackTrace, scalar::encode_forbidden, decode_forbidden),
    codec!(ReceivePort, scalar::encode_forbidden, decode_forbidden),
    codec!(Pointer, scalar::encode_forbidden, decode_forbidden),
    codec!(UserTag, scalar::encode_forbidden, decode_forbidden),
];

/// Codec of a kind
#[inline]
pub fn codec_for(kind: ObjectKind) -> &'static KindCodec {
    &DISPATCH_TABLE[kind.tag() as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_total_and_in_tag_order() {
        for kind in ObjectKind::ALL {
            let codec = codec_for(kind);
            assert_eq!(codec.kind, kind);
        }
    }
}
