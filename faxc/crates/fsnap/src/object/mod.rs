//! Object Model
//!
//! The in-process object model the snapshot engine reads from and writes
//! into. Values are either immediates (null, booleans, small integers) or
//! handles into a [`Heap`] arena.
//!
//! ```text
//! Value ──┬── Null / Bool / Smi          (immediates, no identity)
//!         └── Ref(ObjRef) ──► Heap slot ──► HeapObject { kind, canonical, body }
//! ```
//!
//! Every heap object reports a uniform [`ObjectShape`] (kind, scalar bytes,
//! child values). Canonical keys and graph comparisons are built on it.

pub mod class_table;
pub mod heap;
pub mod kind;

use std::sync::Arc;

pub use class_table::{
    ClassBuilder, ClassDescriptor, ClassId, ClassTable, CodeId, DefaultStubGenerator,
    FunctionDescriptor, FunctionId, StaticClassTable, StubGenerator,
};
pub use heap::{Heap, HeapStats};
pub use kind::{ElementType, KindCategory, ObjectKind};

use crate::snapshot::external::{ExternalBlock, TransferablePeer};

/// Smallest small-integer value
pub const SMI_MIN: i64 = -(1 << 30);
/// Largest small-integer value
pub const SMI_MAX: i64 = (1 << 30) - 1;

/// Handle to a heap-allocated object
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    /// Arena slot index
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A slot value: an immediate or an object reference
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// Small integer, always within [`SMI_MIN`, `SMI_MAX`]
    Smi(i64),
    Ref(ObjRef),
}

impl Value {
    /// Check whether an integer fits the small-integer range
    #[inline]
    pub fn is_smi_range(value: i64) -> bool {
        (SMI_MIN..=SMI_MAX).contains(&value)
    }

    /// Small integer, if `value` fits
    pub fn smi(value: i64) -> Option<Value> {
        Value::is_smi_range(value).then_some(Value::Smi(value))
    }

    #[inline]
    pub fn is_null(self) -> bool {
        matches!(self, Value::Null)
    }

    /// Object handle, if this is a reference
    #[inline]
    pub fn as_obj(self) -> Option<ObjRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Ref(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ============================================================================
// TYPE-SYSTEM SCALARS
// ============================================================================

/// Nullability of a type-system value (four bits on the wire)
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Nullability {
    Nullable = 0,
    NonNullable = 1,
    Legacy = 2,
}

impl Nullability {
    pub fn from_u8(code: u8) -> Option<Nullability> {
        match code {
            0 => Some(Nullability::Nullable),
            1 => Some(Nullability::NonNullable),
            2 => Some(Nullability::Legacy),
            _ => None,
        }
    }
}

/// Finalization state of a type (four bits on the wire)
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeState {
    Allocated = 0,
    BeingFinalized = 1,
    FinalizedInstantiated = 2,
    FinalizedUninstantiated = 3,
}

impl TypeState {
    pub fn from_u8(code: u8) -> Option<TypeState> {
        match code {
            0 => Some(TypeState::Allocated),
            1 => Some(TypeState::BeingFinalized),
            2 => Some(TypeState::FinalizedInstantiated),
            3 => Some(TypeState::FinalizedUninstantiated),
            _ => None,
        }
    }

    pub fn is_finalized(self) -> bool {
        matches!(
            self,
            TypeState::FinalizedInstantiated | TypeState::FinalizedUninstantiated
        )
    }
}

// ============================================================================
// OBJECT BODIES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    pub type_arguments: Value,
    pub elements: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrowableArrayData {
    pub type_arguments: Value,
    pub length: usize,
    /// Backing `Array`
    pub data: Value,
}

/// Insertion-ordered hash map
///
/// `index` is rebuilt by [`crate::IsolateGroup::rehash_map`]; lookups
/// require it.
#[derive(Debug, Clone, Default)]
pub struct MapData {
    pub type_arguments: Value,
    pub entries: Vec<(Value, Value)>,
    pub(crate) index: Option<rustc_hash::FxHashMap<heap::MapKey, usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedDataBody {
    pub element: ElementType,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct ExternalTypedDataBody {
    pub element: ElementType,
    pub block: ExternalBlock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedDataViewBody {
    pub element: ElementType,
    pub offset_in_bytes: usize,
    /// Length in elements
    pub length: usize,
    pub backing: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceData {
    pub class_id: ClassId,
    pub fields: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosureData {
    pub function: FunctionId,
    pub delayed_type_arguments: Value,
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextData {
    pub parent: Value,
    pub variables: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextScopeData {
    pub is_implicit: bool,
    pub receiver_type: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegExpData {
    pub pattern: Value,
    pub capture_name_map: Value,
    pub num_bracket_expressions: i32,
    pub num_one_byte_registers: i32,
    pub num_two_byte_registers: i32,
    pub flags: i8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeData {
    pub class_id: ClassId,
    pub state: TypeState,
    pub nullability: Nullability,
    pub arguments: Value,
    pub testing_stub: Option<CodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeRefData {
    pub target: Value,
    pub testing_stub: Option<CodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeParameterData {
    pub base: u8,
    pub index: u8,
    /// Four bits
    pub flags: u8,
    pub nullability: Nullability,
    pub bound: Value,
    pub default_argument: Value,
    /// `None` for function type parameters
    pub parameterized_class: Option<ClassId>,
    pub testing_stub: Option<CodeId>,
}

/// Type parameters of a generic class or function
#[derive(Debug, Clone, PartialEq)]
pub struct TypeParametersData {
    /// `Array` of parameter names
    pub names: Value,
    /// `Array` of packed per-parameter flags
    pub flags: Value,
    /// `TypeArguments` of upper bounds
    pub bounds: Value,
    /// `TypeArguments` of default arguments
    pub defaults: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageErrorData {
    pub token_pos: i32,
    pub report_after_token: bool,
    pub kind: u8,
    pub previous_error: Value,
    pub message: Value,
    pub formatted_message: Value,
}

/// Object payload
#[derive(Debug)]
pub enum ObjectBody {
    /// Allocated, not yet filled
    Uninitialized,
    Mint(i64),
    Double(f64),
    /// Latin-1 code units
    OneByteString(Vec<u8>),
    /// UTF-16 code units
    TwoByteString(Vec<u16>),
    /// Latin-1 code units owned outside the heap
    ExternalOneByteString(ExternalBlock),
    /// UTF-16 code units owned outside the heap
    ExternalTwoByteString(Box<[u16]>),
    /// `Array` and `ImmutableArray`
    Array(ArrayData),
    GrowableArray(GrowableArrayData),
    Map(MapData),
    Float32x4([f32; 4]),
    Int32x4([u32; 4]),
    Float64x2([f64; 2]),
    TypedData(TypedDataBody),
    ExternalTypedData(ExternalTypedDataBody),
    TypedDataView(TypedDataViewBody),
    TransferableTypedData(Arc<TransferablePeer>),
    Instance(InstanceData),
    Closure(ClosureData),
    Context(ContextData),
    ContextScope(ContextScopeData),
    Capability(u64),
    SendPort { id: u64, origin_id: u64 },
    RegExp(RegExpData),
    Type(TypeData),
    TypeRef(TypeRefData),
    TypeParameter(TypeParameterData),
    TypeParameters(TypeParametersData),
    TypeArguments(Vec<Value>),
    ApiError { message: Value },
    LanguageError(LanguageErrorData),
    UnhandledException { exception: Value, stacktrace: Value },
    WeakProperty { key: Value, value: Value },
    Class(Arc<ClassDescriptor>),
    Function(FunctionId),
    Code(CodeId),
    /// Runtime-internal handle (stack traces, receive ports, pointers, tags)
    Opaque(u64),
}

impl ObjectBody {
    /// Rewrite every child slot in place, in [`HeapObject::shape`] order
    pub fn map_children(&mut self, mut f: impl FnMut(Value) -> Value) {
        let mut apply = |slot: &mut Value| *slot = f(*slot);
        match self {
            ObjectBody::Array(array) => {
                apply(&mut array.type_arguments);
                array.elements.iter_mut().for_each(&mut apply);
            },
            ObjectBody::GrowableArray(growable) => {
                apply(&mut growable.type_arguments);
                apply(&mut growable.data);
            },
            ObjectBody::Map(map) => {
                apply(&mut map.type_arguments);
                for (key, value) in map.entries.iter_mut() {
                    apply(key);
                    apply(value);
                }
            },
            ObjectBody::TypedDataView(view) => apply(&mut view.backing),
            ObjectBody::Instance(instance) => instance.fields.iter_mut().for_each(&mut apply),
            ObjectBody::Closure(closure) => {
                apply(&mut closure.delayed_type_arguments);
                apply(&mut closure.context);
            },
            ObjectBody::Context(context) => {
                apply(&mut context.parent);
                context.variables.iter_mut().for_each(&mut apply);
            },
            ObjectBody::ContextScope(scope) => apply(&mut scope.receiver_type),
            ObjectBody::RegExp(regexp) => {
                apply(&mut regexp.pattern);
                apply(&mut regexp.capture_name_map);
            },
            ObjectBody::Type(ty) => apply(&mut ty.arguments),
            ObjectBody::TypeRef(type_ref) => apply(&mut type_ref.target),
            ObjectBody::TypeParameter(param) => {
                apply(&mut param.bound);
                apply(&mut param.default_argument);
            },
            ObjectBody::TypeParameters(params) => {
                apply(&mut params.names);
                apply(&mut params.flags);
                apply(&mut params.bounds);
                apply(&mut params.defaults);
            },
            ObjectBody::TypeArguments(types) => types.iter_mut().for_each(&mut apply),
            ObjectBody::ApiError { message } => apply(message),
            ObjectBody::LanguageError(error) => {
                apply(&mut error.previous_error);
                apply(&mut error.message);
                apply(&mut error.formatted_message);
            },
            ObjectBody::UnhandledException {
                exception,
                stacktrace,
            } => {
                apply(exception);
                apply(stacktrace);
            },
            ObjectBody::WeakProperty { key, value } => {
                apply(key);
                apply(value);
            },
            _ => {},
        }
    }
}

/// A heap object
#[derive(Debug)]
pub struct HeapObject {
    pub kind: ObjectKind,
    pub canonical: bool,
    pub body: ObjectBody,
}

impl HeapObject {
    pub fn new(kind: ObjectKind, body: ObjectBody) -> Self {
        HeapObject {
            kind,
            canonical: false,
            body,
        }
    }

    /// Uniform view of this object's contents
    pub fn shape(&self) -> ObjectShape {
        let mut shape = ObjectShape::new(self.kind);
        match &self.body {
            ObjectBody::Uninitialized => {},
            ObjectBody::Mint(v) => shape.push_scalar(&v.to_le_bytes()),
            ObjectBody::Double(v) => shape.push_scalar(&v.to_bits().to_le_bytes()),
            ObjectBody::OneByteString(bytes) => shape.push_scalar(bytes),
            ObjectBody::ExternalOneByteString(bytes) => shape.push_scalar(bytes),
            ObjectBody::TwoByteString(units) => {
                for unit in units {
                    shape.push_scalar(&unit.to_le_bytes());
                }
            },
            ObjectBody::ExternalTwoByteString(units) => {
                for unit in units.iter() {
                    shape.push_scalar(&unit.to_le_bytes());
                }
            },
            ObjectBody::Array(array) => {
                shape.children.push(array.type_arguments);
                shape.children.extend_from_slice(&array.elements);
            },
            ObjectBody::GrowableArray(growable) => {
                shape.push_scalar(&(growable.length as u64).to_le_bytes());
                shape.children.push(growable.type_arguments);
                shape.children.push(growable.data);
            },
            ObjectBody::Map(map) => {
                shape.children.push(map.type_arguments);
                for (key, value) in &map.entries {
                    shape.children.push(*key);
                    shape.children.push(*value);
                }
            },
            ObjectBody::Float32x4(lanes) => {
                for lane in lanes {
                    shape.push_scalar(&lane.to_bits().to_le_bytes());
                }
            },
            ObjectBody::Int32x4(lanes) => {
                for lane in lanes {
                    shape.push_scalar(&lane.to_le_bytes());
                }
            },
            ObjectBody::Float64x2(lanes) => {
                for lane in lanes {
                    shape.push_scalar(&lane.to_bits().to_le_bytes());
                }
            },
            ObjectBody::TypedData(data) => {
                shape.scalars.push(data.element as u8);
                shape.push_scalar(&data.bytes);
            },
            ObjectBody::ExternalTypedData(data) => {
                shape.scalars.push(data.element as u8);
                shape.push_scalar(&data.block);
            },
            ObjectBody::TypedDataView(view) => {
                shape.scalars.push(view.element as u8);
                shape.push_scalar(&(view.offset_in_bytes as u64).to_le_bytes());
                shape.push_scalar(&(view.length as u64).to_le_bytes());
                shape.children.push(view.backing);
            },
            ObjectBody::TransferableTypedData(peer) => {
                peer.with_data(|data| shape.push_scalar(data.unwrap_or(&[])));
            },
            ObjectBody::Instance(instance) => {
                shape.push_scalar(&instance.class_id.0.to_le_bytes());
                shape.children.extend_from_slice(&instance.fields);
            },
            ObjectBody::Closure(closure) => {
                shape.push_scalar(&closure.function.0.to_le_bytes());
                shape.children.push(closure.delayed_type_arguments);
                shape.children.push(closure.context);
            },
            ObjectBody::Context(context) => {
                shape.children.push(context.parent);
                shape.children.extend_from_slice(&context.variables);
            },
            ObjectBody::ContextScope(scope) => {
                shape.scalars.push(scope.is_implicit as u8);
                shape.children.push(scope.receiver_type);
            },
            ObjectBody::Capability(id) => shape.push_scalar(&id.to_le_bytes()),
            ObjectBody::SendPort { id, origin_id } => {
                shape.push_scalar(&id.to_le_bytes());
                shape.push_scalar(&origin_id.to_le_bytes());
            },
            ObjectBody::RegExp(regexp) => {
                shape.push_scalar(&regexp.num_bracket_expressions.to_le_bytes());
                shape.push_scalar(&regexp.num_one_byte_registers.to_le_bytes());
                shape.push_scalar(&regexp.num_two_byte_registers.to_le_bytes());
                shape.scalars.push(regexp.flags as u8);
                shape.children.push(regexp.pattern);
                shape.children.push(regexp.capture_name_map);
            },
            ObjectBody::Type(ty) => {
                shape.push_scalar(&ty.class_id.0.to_le_bytes());
                shape.scalars.push(ty.state as u8);
                shape.scalars.push(ty.nullability as u8);
                shape.children.push(ty.arguments);
            },
            ObjectBody::TypeRef(type_ref) => shape.children.push(type_ref.target),
            ObjectBody::TypeParameter(param) => {
                shape.scalars.extend_from_slice(&[
                    param.base,
                    param.index,
                    param.flags,
                    param.nullability as u8,
                ]);
                let class = param.parameterized_class.map_or(0, |c| c.0 + 1);
                shape.push_scalar(&class.to_le_bytes());
                shape.children.push(param.bound);
                shape.children.push(param.default_argument);
            },
            ObjectBody::TypeParameters(params) => {
                shape.children.push(params.names);
                shape.children.push(params.flags);
                shape.children.push(params.bounds);
                shape.children.push(params.defaults);
            },
            ObjectBody::TypeArguments(types) => shape.children.extend_from_slice(types),
            ObjectBody::ApiError { message } => shape.children.push(*message),
            ObjectBody::LanguageError(error) => {
                shape.push_scalar(&error.token_pos.to_le_bytes());
                shape.scalars.push(error.report_after_token as u8);
                shape.scalars.push(error.kind);
                shape.children.push(error.previous_error);
                shape.children.push(error.message);
                shape.children.push(error.formatted_message);
            },
            ObjectBody::UnhandledException {
                exception,
                stacktrace,
            } => {
                shape.children.push(*exception);
                shape.children.push(*stacktrace);
            },
            ObjectBody::WeakProperty { key, value } => {
                shape.children.push(*key);
                shape.children.push(*value);
            },
            ObjectBody::Class(class) => shape.push_scalar(&class.id.0.to_le_bytes()),
            ObjectBody::Function(id) => shape.push_scalar(&id.0.to_le_bytes()),
            ObjectBody::Code(id) => shape.push_scalar(&id.0.to_le_bytes()),
            ObjectBody::Opaque(handle) => shape.push_scalar(&handle.to_le_bytes()),
        }
        shape
    }
}

/// Kind, scalar bytes and child slots of one object
///
/// Two canonical objects are structurally equal exactly when their shapes
/// are equal; children of canonical objects are themselves canonical, so
/// comparing child handles by identity suffices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectShape {
    pub kind: ObjectKind,
    pub scalars: Vec<u8>,
    pub children: Vec<Value>,
}

impl ObjectShape {
    fn new(kind: ObjectKind) -> Self {
        ObjectShape {
            kind,
            scalars: Vec::new(),
            children: Vec::new(),
        }
    }

    fn push_scalar(&mut self, bytes: &[u8]) {
        self.scalars.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smi_range() {
        assert!(Value::is_smi_range(42));
        assert!(Value::is_smi_range(SMI_MAX));
        assert!(Value::is_smi_range(SMI_MIN));
        assert!(!Value::is_smi_range(SMI_MAX + 1));
        assert!(!Value::is_smi_range(1 << 53));
        assert_eq!(Value::smi(7), Some(Value::Smi(7)));
        assert_eq!(Value::smi(1 << 40), None);
    }

    #[test]
    fn test_shape_distinguishes_double_bits() {
        let pos = HeapObject::new(ObjectKind::Double, ObjectBody::Double(0.0));
        let neg = HeapObject::new(ObjectKind::Double, ObjectBody::Double(-0.0));
        assert_ne!(pos.shape(), neg.shape());
    }

    #[test]
    fn test_shape_of_array_lists_children() {
        let array = HeapObject::new(
            ObjectKind::Array,
            ObjectBody::Array(ArrayData {
                type_arguments: Value::Null,
                elements: vec![Value::Smi(1), Value::Bool(true)],
            }),
        );
        let shape = array.shape();
        assert_eq!(shape.kind, ObjectKind::Array);
        assert_eq!(
            shape.children,
            vec![Value::Null, Value::Smi(1), Value::Bool(true)]
        );
    }

    #[test]
    fn test_type_state_finalized() {
        assert!(TypeState::FinalizedInstantiated.is_finalized());
        assert!(!TypeState::BeingFinalized.is_finalized());
        assert_eq!(TypeState::from_u8(4), None);
        assert_eq!(Nullability::from_u8(2), Some(Nullability::Legacy));
    }
}
