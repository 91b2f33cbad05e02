//! Instances, closures, contexts, regular expressions, error objects and
//! weak properties.

use crate::error::{Result, SnapshotError};
use crate::object::{
    ClassId, ClosureData, ContextData, ContextScopeData, FunctionId, InstanceData,
    LanguageErrorData, ObjectBody, ObjectKind, RegExpData, Value,
};

use super::super::header::TagByte;
use super::super::reader::{ReadSlot, SnapshotReader};
use super::super::writer::{body_mismatch, SnapshotWriter, WriteSlot};
use super::super::{Mode, SnapshotKind};
use super::{child_mode, finish, update};

/// Flag bit of an implicit context scope
const IMPLICIT_SCOPE: u8 = 1;

// ============================================================================
// INSTANCES
// ============================================================================

/// Class id, then field count and fields
///
/// An allocation header carries the class id only.
pub fn encode_instance(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (canonical, data) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Instance(data) => (object.canonical, data.clone()),
            _ => return Err(body_mismatch(object.kind)),
        }
    };

    w.write_header(ObjectKind::Instance, TagByte::new(canonical));
    w.stream().write_uleb(data.class_id.0 as u64);
    if slot.is_allocation() {
        return Ok(());
    }

    w.stream().write_len(data.fields.len());
    let mode = child_mode(canonical);
    for field in data.fields {
        w.write_value(field, mode)?;
    }
    Ok(())
}

pub fn decode_instance(r: &mut SnapshotReader<'_>, slot: ReadSlot, tag: TagByte) -> Result<Value> {
    let at = r.position();
    let class_id = ClassId(r.stream().read_u32_leb()?);
    let class = r
        .group()
        .classes()
        .class_by_id(class_id)
        .ok_or_else(|| SnapshotError::format(at, format!("unknown {}", class_id)))?;

    let obj = if slot.is_fill() {
        let obj = r.placeholder(&slot, ObjectKind::Instance)?;
        let allocated = match &r.heap().get(obj)?.body {
            ObjectBody::Instance(data) => data.class_id,
            _ => return Err(body_mismatch(ObjectKind::Instance)),
        };
        if allocated != class_id {
            return Err(SnapshotError::format(
                at,
                format!("fill of {} for an instance of {}", class_id, allocated),
            ));
        }
        obj
    } else {
        let obj = r.heap().allocate(
            ObjectKind::Instance,
            ObjectBody::Instance(InstanceData {
                class_id,
                fields: vec![Value::Null; class.num_fields],
            }),
        );
        if slot.is_allocation() {
            r.bind_allocated(slot.id, obj)?;
            return Ok(Value::Ref(obj));
        }
        r.bind(slot.id, Value::Ref(obj))?;
        obj
    };

    let at = r.position();
    let count = r.stream().read_len(1)?;
    crate::ensure!(
        count == class.num_fields,
        SnapshotError::format(
            at,
            format!("{} fields for {} which declares {}", count, class.name, class.num_fields),
        )
    );
    let mode = child_mode(tag.is_canonical());
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(r.read_value(mode)?);
    }
    update(r.heap(), obj, |body| match body {
        ObjectBody::Instance(data) => {
            data.fields = fields;
            true
        },
        _ => false,
    })?;

    if slot.is_fill() {
        r.materialize(slot.id)?;
        return Ok(Value::Ref(obj));
    }
    finish(r, &slot, obj, tag)
}

// ============================================================================
// CLOSURES AND CONTEXTS
// ============================================================================

/// Function id, delayed type arguments, then the context
pub fn encode_closure(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let data = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Closure(data) => data.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::Closure, TagByte::new(false));
    w.stream().write_uleb(data.function.0 as u64);
    w.write_value(data.delayed_type_arguments, Mode::Inline)?;
    w.write_value(data.context, Mode::Reference)
}

pub fn decode_closure(r: &mut SnapshotReader<'_>, slot: ReadSlot, _tag: TagByte) -> Result<Value> {
    let at = r.position();
    let function_id = FunctionId(r.stream().read_u32_leb()?);
    let function = r
        .group()
        .classes()
        .function_by_id(function_id)
        .ok_or_else(|| SnapshotError::format(at, format!("unknown function {}", function_id.0)))?;
    if r.kind() == SnapshotKind::Message && !function.is_static {
        return Err(SnapshotError::format(
            at,
            format!("message closure over non-static function {}", function.name),
        ));
    }

    let obj = r.heap().allocate(
        ObjectKind::Closure,
        ObjectBody::Closure(ClosureData {
            function: function_id,
            delayed_type_arguments: Value::Null,
            context: Value::Null,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let delayed = r.read_child_expecting(Mode::Inline, &[ObjectKind::TypeArguments], true)?;
    let context = r.read_child_expecting(Mode::Reference, &[ObjectKind::Context], true)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::Closure(data) => {
            data.delayed_type_arguments = delayed;
            data.context = context;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

/// Variable count, parent, then variables
pub fn encode_context(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let data = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::Context(data) => data.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::Context, TagByte::new(false));
    w.stream().write_len(data.variables.len());
    w.write_value(data.parent, Mode::Inline)?;
    for variable in data.variables {
        w.write_value(variable, Mode::Reference)?;
    }
    Ok(())
}

pub fn decode_context(r: &mut SnapshotReader<'_>, slot: ReadSlot, _tag: TagByte) -> Result<Value> {
    let count = r.stream().read_len(1)?;
    let obj = r.heap().allocate(
        ObjectKind::Context,
        ObjectBody::Context(ContextData {
            parent: Value::Null,
            variables: vec![Value::Null; count],
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let parent = r.read_child_expecting(Mode::Inline, &[ObjectKind::Context], true)?;
    let mut variables = Vec::with_capacity(count);
    for _ in 0..count {
        variables.push(r.read_value(Mode::Reference)?);
    }
    update(r.heap(), obj, |body| match body {
        ObjectBody::Context(data) => {
            data.parent = parent;
            data.variables = variables;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

/// Receiver type of an implicit scope
///
/// Only implicit scopes are written; the flag travels in the tag byte.
pub fn encode_context_scope(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let data = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::ContextScope(data) => data.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    if !data.is_implicit {
        return Err(SnapshotError::illegal(
            ObjectKind::ContextScope,
            "only implicit context scopes can be written",
        ));
    }
    w.write_header(
        ObjectKind::ContextScope,
        TagByte::with_flags(false, IMPLICIT_SCOPE),
    );
    w.write_value(data.receiver_type, Mode::Inline)
}

pub fn decode_context_scope(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    tag: TagByte,
) -> Result<Value> {
    if tag.flags() & IMPLICIT_SCOPE == 0 {
        return Err(SnapshotError::UnreachableDecode {
            kind: ObjectKind::ContextScope,
            snapshot: r.kind(),
        });
    }
    let obj = r.heap().allocate(
        ObjectKind::ContextScope,
        ObjectBody::ContextScope(ContextScopeData {
            is_implicit: true,
            receiver_type: Value::Null,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let receiver_type = r.read_child_expecting(Mode::Inline, ObjectKind::TYPES, true)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::ContextScope(data) => {
            data.receiver_type = receiver_type;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

// ============================================================================
// REGULAR EXPRESSIONS
// ============================================================================

/// Bracket and register counts, flags, capture name map, then pattern
pub fn encode_regexp(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let data = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::RegExp(data) => data.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::RegExp, TagByte::new(false));
    let out = w.stream();
    out.write_i32(data.num_bracket_expressions);
    out.write_i32(data.num_one_byte_registers);
    out.write_i32(data.num_two_byte_registers);
    out.write_u8(data.flags as u8);
    w.write_value(data.capture_name_map, Mode::Inline)?;
    w.write_value(data.pattern, Mode::Inline)
}

pub fn decode_regexp(r: &mut SnapshotReader<'_>, slot: ReadSlot, _tag: TagByte) -> Result<Value> {
    let num_bracket_expressions = r.stream().read_i32()?;
    let num_one_byte_registers = r.stream().read_i32()?;
    let num_two_byte_registers = r.stream().read_i32()?;
    let flags = r.stream().read_u8()? as i8;

    let obj = r.heap().allocate(
        ObjectKind::RegExp,
        ObjectBody::RegExp(RegExpData {
            pattern: Value::Null,
            capture_name_map: Value::Null,
            num_bracket_expressions,
            num_one_byte_registers,
            num_two_byte_registers,
            flags,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let capture_name_map = r.read_child_expecting(
        Mode::Inline,
        &[ObjectKind::Array, ObjectKind::ImmutableArray],
        true,
    )?;
    let pattern = r.read_child_expecting(Mode::Inline, ObjectKind::STRINGS, false)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::RegExp(data) => {
            data.capture_name_map = capture_name_map;
            data.pattern = pattern;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

// ============================================================================
// ERRORS
// ============================================================================

/// Message string
pub fn encode_api_error(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let message = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::ApiError { message } => *message,
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::ApiError, TagByte::new(false));
    w.write_value(message, Mode::Inline)
}

pub fn decode_api_error(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let obj = r.heap().allocate(
        ObjectKind::ApiError,
        ObjectBody::ApiError {
            message: Value::Null,
        },
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let text = r.read_child_expecting(Mode::Inline, ObjectKind::STRINGS, true)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::ApiError { message } => {
            *message = text;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

/// Token position, report flag, error kind, then the previous error and
/// both messages
pub fn encode_language_error(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let data = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::LanguageError(data) => data.clone(),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::LanguageError, TagByte::new(false));
    let out = w.stream();
    out.write_i32(data.token_pos);
    out.write_u8(data.report_after_token as u8);
    out.write_u8(data.kind);
    w.write_value(data.previous_error, Mode::Inline)?;
    w.write_value(data.message, Mode::Inline)?;
    w.write_value(data.formatted_message, Mode::Inline)
}

pub fn decode_language_error(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let token_pos = r.stream().read_i32()?;
    let report_after_token = r.stream().read_bool()?;
    let kind = r.stream().read_u8()?;

    let obj = r.heap().allocate(
        ObjectKind::LanguageError,
        ObjectBody::LanguageError(LanguageErrorData {
            token_pos,
            report_after_token,
            kind,
            previous_error: Value::Null,
            message: Value::Null,
            formatted_message: Value::Null,
        }),
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let previous_error = r.read_child_expecting(Mode::Inline, &[ObjectKind::LanguageError], true)?;
    let message = r.read_child_expecting(Mode::Inline, ObjectKind::STRINGS, true)?;
    let formatted_message = r.read_child_expecting(Mode::Inline, ObjectKind::STRINGS, true)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::LanguageError(data) => {
            data.previous_error = previous_error;
            data.message = message;
            data.formatted_message = formatted_message;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

/// Exception, then stack trace
pub fn encode_unhandled_exception(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (exception, stacktrace) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::UnhandledException {
                exception,
                stacktrace,
            } => (*exception, *stacktrace),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::UnhandledException, TagByte::new(false));
    w.write_value(exception, Mode::Reference)?;
    w.write_value(stacktrace, Mode::Reference)
}

pub fn decode_unhandled_exception(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let obj = r.heap().allocate(
        ObjectKind::UnhandledException,
        ObjectBody::UnhandledException {
            exception: Value::Null,
            stacktrace: Value::Null,
        },
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let decoded_exception = r.read_value(Mode::Reference)?;
    let decoded_stacktrace = r.read_value(Mode::Reference)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::UnhandledException {
            exception,
            stacktrace,
        } => {
            *exception = decoded_exception;
            *stacktrace = decoded_stacktrace;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}

// ============================================================================
// WEAK PROPERTIES
// ============================================================================

/// Key, then value; both held strongly on the wire
pub fn encode_weak_property(w: &mut SnapshotWriter<'_>, slot: WriteSlot) -> Result<()> {
    let (key, value) = {
        let object = w.heap().get(slot.object)?;
        match &object.body {
            ObjectBody::WeakProperty { key, value } => (*key, *value),
            _ => return Err(body_mismatch(object.kind)),
        }
    };
    w.write_header(ObjectKind::WeakProperty, TagByte::new(false));
    w.write_value(key, Mode::Reference)?;
    w.write_value(value, Mode::Reference)
}

pub fn decode_weak_property(
    r: &mut SnapshotReader<'_>,
    slot: ReadSlot,
    _tag: TagByte,
) -> Result<Value> {
    let obj = r.heap().allocate(
        ObjectKind::WeakProperty,
        ObjectBody::WeakProperty {
            key: Value::Null,
            value: Value::Null,
        },
    );
    r.bind(slot.id, Value::Ref(obj))?;

    let decoded_key = r.read_value(Mode::Reference)?;
    let decoded_value = r.read_value(Mode::Reference)?;
    update(r.heap(), obj, |body| match body {
        ObjectBody::WeakProperty { key, value } => {
            *key = decoded_key;
            *value = decoded_value;
            true
        },
        _ => false,
    })?;
    Ok(Value::Ref(obj))
}
