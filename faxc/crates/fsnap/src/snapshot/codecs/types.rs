//! Type-system values and metadata references.
//!
//! Every decoded type, type reference and type parameter is queued for a
//! type-testing stub once it is final, after canonicalization. Metadata
//! (classes, functions, code) travels as table ids in full snapshots only.

use crate::error::{Result, SnapshotError};
use crate::object::{
    ClassId, CodeId, FunctionId, ObjRef, ObjectBody, ObjectKind, TypeData, TypeParameterData,
    TypeParametersData, TypeRefData, Value,
};

use super::super::header::{self, TagByte};
use super::super::reader::{ReadSlot, SnapshotReader};
use super::super::writer::{body_mismatch, SnapshotWriter, WriteSlot};
use super::super::{Mode, SnapshotKind};
use super::{finish, update};

// ============================================================================
// TYPES
// ============================================================================

/// Packed state and nullability, class id, then type arguments
pub fn encode_type(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (canonical, data) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Type(data) => (object.canonical, data.clone()),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    if !data.state.is_finalized() {
        return Err(SnapshotError::illegal(
            ObjectKind::Type,
            format!("type of {} is not finalized", data.class_id),
        ));
    }

    w.write_header(ObjectKind::Type, TagByte::new(canonical));
    w.stream()
        .write_u8(header::pack_type_byte(data.state, data.nullability));
    w.stream().write_uleb(data.class_id.0 as u64);
    w.write_value(data.arguments, Mode::Inline)
}

pub fn decode_type(r: &mut SnapshotReader<'_>, slot: ReadSlot, tag: TagByte) -> Result<Value> {
    let at = r.position();
    let (state, nullability) = header::unpack_type_byte(r.stream().read_u8()?, at)?;
    if !state.is_finalized() {
        return Err(SnapshotError::format(at, "type is not finalized"));
    }
    let class_id = read_class_id(r)?;

    let obj = r.heap().allocate(
        ObjectKind::Type,
        ObjectBody::Type(TypeData {
            class_id,
            state,
            nullability,
            arguments: Value::Null,
            testing_stub: None,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let arguments = r.read_child_expecting(Mode::Inline, &[ObjectKind::TypeArguments], true)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::Type(data) => {
            data.arguments = arguments;
            true
        },
        _ => false,
    })?;
    finish_type(r, &slot, obj, tag)
}

/// Target type
pub fn encode_type_ref(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let target = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::TypeRef(data) => data.target,
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::TypeRef, TagByte::new(false));
    w.write_value(target, Mode::Reference)
}

pub fn decode_type_ref(r: &mut SnapshotReader<'_>, slot: ReadSlot, tag: TagByte) -> Result<Value> {
    let obj = r.heap().allocate(
        ObjectKind::TypeRef,
        ObjectBody::TypeRef(TypeRefData {
            target: Value::Null,
            testing_stub: None,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let target = r.read_child_expecting(Mode::Reference, ObjectKind::TYPES, false)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::TypeRef(data) => {
            data.target = target;
            true
        },
        _ => false,
    })?;
    finish_type(r, &slot, obj, tag)
}

/// Base, index, packed flags and nullability, parameterized class id plus
/// one (zero for function type parameters), then bound and default argument
pub fn encode_type_parameter(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (canonical, data) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::TypeParameter(data) => (object.canonical, data.clone()),
            _ => return Err(body_mismatch(object.kind)),
        }
    };

    w.write_header(ObjectKind::TypeParameter, TagByte::new(canonical));
    let out = w.stream();
    out.write_u8(data.base);
    out.write_u8(data.index);
    out.write_u8(header::pack_parameter_byte(data.flags, data.nullability));
    out.write_uleb(data.parameterized_class.map_or(0, |class| class.0 as u64 + 1));
    w.write_value(data.bound, Mode::Inline)?;
    w.write_value(data.default_argument, Mode::Inline)
}

pub fn decode_type_parameter(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
) -> Result<Value> {
    let base = r.stream().read_u8()?;
    let index = r.stream().read_u8()?;
    let at = r.position();
    let (flags, nullability) = header::unpack_parameter_byte(r.stream().read_u8()?, at)?;

    let at = r.position();
    let parameterized_class = match r.stream().read_u32_leb()? {
        0 => None,
        encoded => Some(check_class_id(r, ClassId(encoded - 1), at)?),
    };

    let obj = r.heap().allocate(
        ObjectKind::TypeParameter,
        ObjectBody::TypeParameter(TypeParameterData {
            base,
            index,
            flags,
            nullability,
            bound: Value::Null,
            default_argument: Value::Null,
            parameterized_class,
            testing_stub: None,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let bound = r.read_child_expecting(Mode::Inline, ObjectKind::TYPES, true)?;
    let default_argument = r.read_child_expecting(Mode::Inline, ObjectKind::TYPES, true)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::TypeParameter(data) => {
            data.bound = bound;
            data.default_argument = default_argument;
            true
        },
        _ => false,
    })?;
    finish_type(r, &slot, obj, tag)
}

/// Names, flags, bounds and defaults
pub fn encode_type_parameters(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let params = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::TypeParameters(params) => params.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::TypeParameters, TagByte::new(false));
    w.write_value(params.names, Mode::Reference)?;
    w.write_value(params.flags, Mode::Reference)?;
    w.write_value(params.bounds, Mode::Reference)?;
    w.write_value(params.defaults, Mode::Reference)
}

pub fn decode_type_parameters(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let obj = r.heap().allocate(
        ObjectKind::TypeParameters,
        ObjectBody::TypeParameters(TypeParametersData {
            names: Value::Null,
            flags: Value::Null,
            bounds: Value::Null,
            defaults: Value::Null,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    const LISTS: &[ObjectKind] = &[ObjectKind::Array, ObjectKind::ImmutableArray];
    let names = r.read_child_expecting(Mode::Reference, LISTS, true)?;
    let flags = r.read_child_expecting(Mode::Reference, LISTS, true)?;
    let bounds = r.read_child_expecting(Mode::Reference, &[ObjectKind::TypeArguments], true)?;
    let defaults = r.read_child_expecting(Mode::Reference, &[ObjectKind::TypeArguments], true)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::TypeParameters(params) => {
            *params = TypeParametersData {
                names,
                flags,
                bounds,
                defaults,
            };
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

/// Count, then the types
pub fn encode_type_arguments(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (canonical, types) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::TypeArguments(types) => (object.canonical, types.clone()),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::TypeArguments, TagByte::new(canonical));
    w.stream().write_len(types.len());
    for ty in types {
        w.write_value(ty, Mode::Inline)?;
    }
    Ok(())
}

pub fn decode_type_arguments(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
) -> Result<Value> {
    let count = r.stream().read_len(1)?;
    let obj = r.heap().allocate(
        ObjectKind::TypeArguments,
        ObjectBody::TypeArguments(vec![Value::Null; count]),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        types.push(r.read_child_expecting(Mode::Inline, ObjectKind::TYPES, true)?);
    }
    update(r.heap(), obj, |body| match body {
        ObjectBody::TypeArguments(slots) => {
            *slots = types;
            true
        },
        _ => false,
    })?;
    finish(r, &slot, obj, tag)
}

/// Class id that must name a registered class
fn read_class_id(r: &mut SnapshotReader<'_>) -> Result<ClassId> {
    let at = r.position();
    let class_id = ClassId(r.stream().read_u32_leb()?);
    check_class_id(r, class_id, at)
}

fn check_class_id(r: &SnapshotReader<'_>, class_id: ClassId, at: usize) -> Result<ClassId> {
    if r.group().classes().class_by_id(class_id).is_none() {
        return Err(SnapshotError::format(at, format!("unknown {}", class_id)));
    }
    Ok(class_id)
}

/// Intern if tagged canonical, then queue the final object for its stub
fn finish_type(
    r: &mut SnapshotReader<'_>,
    slot: &ReadSlot,
    obj: ObjRef,
    tag: TagByte,
) -> Result<Value> {
    let value = finish(r, slot, obj, tag)?;
    if let Value::Ref(ty) = value {
        r.enqueue_type_postprocessing(ty)?;
    }
    Ok(value)
}

// ============================================================================
// METADATA
// ============================================================================

/// Table id of a class, function or code object
pub fn encode_metadata(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let heap = w.heap();
    let object = heap.get(slot.object)?;
    if w.kind() == SnapshotKind::Message {
        return Err(SnapshotError::illegal(object.kind, ""));
    }

    let id = match &object.body {
        ObjectBody::Class(class) => w
            .group()
            .classes()
            .id_for_class(class)
            .ok_or_else(|| {
                SnapshotError::illegal(
                    ObjectKind::Class,
                    format!("class {} is not in the class table", class.name),
                )
            })?
            .0,
        ObjectBody::Function(function) => function.0,
        ObjectBody::Code(code) => code.0,
        _ => return Err(body_mismatch(object.kind)),
    };
    w.write_header(object.kind, TagByte::new(false));
    w.stream().write_uleb(id as u64);
    Ok(())
}

/// Classes decode to one object per class within a group
pub fn decode_class(r: &mut SnapshotReader<'_>, slot: ReadSlot, _tag: TagByte) -> Result<Value> {
    let at = r.position();
    let class_id = ClassId(r.stream().read_u32_leb()?);
    let class = r
        .group()
        .classes()
        .class_by_id(class_id)
        .ok_or_else(|| SnapshotError::format(at, format!("unknown {}", class_id)))?;
    let obj = r.heap().allocate(ObjectKind::Class, ObjectBody::Class(class));
    bind_metadata(r, slot, obj)
}

pub fn decode_function(r: &mut SnapshotReader<'_>, slot: ReadSlot, _tag: TagByte) -> Result<Value> {
    let at = r.position();
    let function_id = FunctionId(r.stream().read_u32_leb()?);
    if r.group().classes().function_by_id(function_id).is_none() {
        return Err(SnapshotError::format(
            at,
            format!("unknown function {}", function_id.0),
        ));
    }
    let obj = r
        .heap()
        .allocate(ObjectKind::Function, ObjectBody::Function(function_id));
    bind_metadata(r, slot, obj)
}

pub fn decode_code(r: &mut SnapshotReader<'_>, slot: ReadSlot, _tag: TagByte) -> Result<Value> {
    let code = CodeId(r.stream().read_u32_leb()?);
    let obj = r.heap().allocate(ObjectKind::Code, ObjectBody::Code(code));
    bind_metadata(r, slot, obj)
}

fn bind_metadata(r: &mut SnapshotReader<'_>, slot: ReadSlot, obj: ObjRef) -> Result<Value> {
    r.bind(slot.id, Value::Ref(obj))?;
    Ok(Value::Ref(r.canonicalize(slot.id, obj)?))
}
