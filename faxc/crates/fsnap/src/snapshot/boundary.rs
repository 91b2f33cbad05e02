//! Isolate-Boundary Policy
//!
//! Classifies kinds before they are written into an inter-isolate message.
//! A violation aborts the whole write with an illegal-argument error naming
//! the kind.
//!
//! | Class            | Kinds                                                  |
//! |------------------|--------------------------------------------------------|
//! | Transferable     | scalars, strings, collections, typed data, types, ...  |
//! | Conditional      | `Instance` (class must be sendable), `Closure`         |
//! | Forbidden        | metadata, code, contexts, stack traces, ports, ...     |

use crate::error::{Result, SnapshotError};
use crate::object::{ObjRef, ObjectBody, ObjectKind};
use crate::runtime::IsolateGroup;

/// Boundary classification of a kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transferability {
    Transferable,
    /// Transferable depending on the object
    Conditional,
    Forbidden,
}

/// Classify a kind for inter-isolate messaging
pub fn classify(kind: ObjectKind) -> Transferability {
    use ObjectKind::*;
    match kind {
        Class | Function | Code | Context | ContextScope | StackTrace | ReceivePort | Pointer
        | UserTag => Transferability::Forbidden,
        Instance | Closure => Transferability::Conditional,
        _ => Transferability::Transferable,
    }
}

/// Check one object about to enter a message
pub fn check_message_object(group: &IsolateGroup, obj: ObjRef, kind: ObjectKind) -> Result<()> {
    match classify(kind) {
        Transferability::Transferable => Ok(()),
        Transferability::Forbidden => Err(SnapshotError::illegal(kind, "")),
        Transferability::Conditional => check_conditional(group, obj, kind),
    }
}

fn check_conditional(group: &IsolateGroup, obj: ObjRef, kind: ObjectKind) -> Result<()> {
    let object = group.heap().get(obj)?;
    match &object.body {
        ObjectBody::Instance(instance) => {
            let class = group.classes().class_by_id(instance.class_id).ok_or_else(|| {
                SnapshotError::Internal(format!("instance of unknown {}", instance.class_id))
            })?;
            if !class.transferable {
                return Err(SnapshotError::illegal(
                    kind,
                    format!("instances of {} are not sendable", class.name),
                ));
            }
            Ok(())
        },
        ObjectBody::Closure(closure) => {
            if !closure.context.is_null() {
                return Err(SnapshotError::illegal(
                    kind,
                    "closure captures an execution context",
                ));
            }
            let function = group
                .classes()
                .function_by_id(closure.function)
                .ok_or_else(|| {
                    SnapshotError::Internal(format!(
                        "closure over unknown function {}",
                        closure.function.0
                    ))
                })?;
            if !function.is_static {
                return Err(SnapshotError::illegal(
                    kind,
                    format!("closure over non-static function {}", function.name),
                ));
            }
            Ok(())
        },
        _ => Err(SnapshotError::Internal(format!(
            "{} body does not match its kind",
            kind
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify(ObjectKind::Code), Transferability::Forbidden);
        assert_eq!(classify(ObjectKind::Context), Transferability::Forbidden);
        assert_eq!(classify(ObjectKind::Closure), Transferability::Conditional);
        assert_eq!(classify(ObjectKind::TransferableTypedData), Transferability::Transferable);
        assert_eq!(classify(ObjectKind::RegExp), Transferability::Transferable);
        assert_eq!(classify(ObjectKind::SendPort), Transferability::Transferable);
        assert_eq!(classify(ObjectKind::TypeParameters), Transferability::Transferable);
        assert_eq!(
            classify(ObjectKind::ExternalOneByteString),
            Transferability::Transferable
        );
    }

    #[test]
    fn test_every_metadata_and_forbidden_kind_is_forbidden() {
        use crate::object::KindCategory;
        for kind in ObjectKind::ALL {
            if matches!(kind.category(), KindCategory::Metadata | KindCategory::Forbidden) {
                assert_eq!(classify(kind), Transferability::Forbidden, "{}", kind);
            }
        }
    }
}
