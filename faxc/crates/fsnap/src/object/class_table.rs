//! Class and function metadata collaborators
//!
//! The engine never serializes class or function bodies. It reaches
//! metadata through the [`ClassTable`] trait (`ClassById`, `IdForClass`) and
//! attaches type-testing stubs through the [`StubGenerator`] trait. Both are
//! owned by the runtime; [`StaticClassTable`] and [`DefaultStubGenerator`]
//! are the in-process implementations.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::heap::Heap;
use super::{Nullability, ObjRef, ObjectBody};
use crate::error::{Result, SnapshotError};

/// Class table index
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub u32);

/// Function table index
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub u32);

/// Compiled code handle
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CodeId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Class metadata as seen by the snapshot engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescriptor {
    pub id: ClassId,
    pub name: String,
    /// Number of instance fields, in declaration order
    pub num_fields: usize,
    /// Whether instances may cross an isolate boundary
    pub transferable: bool,
    /// Whether `==`/hash are defined over the field values
    pub value_equality: bool,
}

/// Function metadata as seen by the snapshot engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub id: FunctionId,
    pub name: String,
    pub owner: Option<ClassId>,
    /// Top-level or static member
    pub is_static: bool,
}

/// Class/type table collaborator
pub trait ClassTable: Send + Sync {
    /// Resolve a class id (`ClassById`)
    fn class_by_id(&self, id: ClassId) -> Option<Arc<ClassDescriptor>>;

    /// Resolve the id of a class (`IdForClass`)
    fn id_for_class(&self, class: &ClassDescriptor) -> Option<ClassId>;

    /// Resolve a function id
    fn function_by_id(&self, id: FunctionId) -> Option<Arc<FunctionDescriptor>>;
}

/// Dispatch-stub generator collaborator
///
/// Called only while draining the postprocessing queue, once the type graph
/// of the pass is fully resolved.
pub trait StubGenerator: Send + Sync {
    /// Pick the default type-testing stub for a type-system value
    fn default_code_for_type(&self, heap: &Heap, ty: ObjRef) -> Result<CodeId>;
}

// ============================================================================
// STATIC CLASS TABLE
// ============================================================================

#[derive(Default)]
struct TableInner {
    classes: IndexMap<ClassId, Arc<ClassDescriptor>>,
    by_name: FxHashMap<String, ClassId>,
    functions: IndexMap<FunctionId, Arc<FunctionDescriptor>>,
}

/// In-process class table
///
/// Ids are dense and assigned in registration order, starting at 1.
///
/// # Examples
///
/// ```rust
/// use fsnap::object::{ClassTable, StaticClassTable};
///
/// let table = StaticClassTable::new();
/// let point = table.class("Point").fields(2).value_equality().register();
/// let desc = table.class_by_id(point).unwrap();
/// assert_eq!(desc.num_fields, 2);
/// assert_eq!(table.id_for_class(&desc), Some(point));
/// ```
#[derive(Default)]
pub struct StaticClassTable {
    inner: RwLock<TableInner>,
}

impl StaticClassTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Start describing a class
    pub fn class(&self, name: &str) -> ClassBuilder<'_> {
        ClassBuilder {
            table: self,
            name: name.to_string(),
            num_fields: 0,
            transferable: true,
            value_equality: false,
        }
    }

    /// Register a function
    pub fn register_function(
        &self,
        name: &str,
        owner: Option<ClassId>,
        is_static: bool,
    ) -> FunctionId {
        let mut inner = self.inner.write();
        let id = FunctionId(inner.functions.len() as u32 + 1);
        inner.functions.insert(
            id,
            Arc::new(FunctionDescriptor {
                id,
                name: name.to_string(),
                owner,
                is_static,
            }),
        );
        id
    }

    /// Number of registered classes
    pub fn class_count(&self) -> usize {
        self.inner.read().classes.len()
    }

    fn insert_class(&self, builder: ClassBuilder<'_>) -> ClassId {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.by_name.get(&builder.name) {
            return *existing;
        }
        let id = ClassId(inner.classes.len() as u32 + 1);
        inner.by_name.insert(builder.name.clone(), id);
        inner.classes.insert(
            id,
            Arc::new(ClassDescriptor {
                id,
                name: builder.name,
                num_fields: builder.num_fields,
                transferable: builder.transferable,
                value_equality: builder.value_equality,
            }),
        );
        id
    }
}

impl ClassTable for StaticClassTable {
    fn class_by_id(&self, id: ClassId) -> Option<Arc<ClassDescriptor>> {
        self.inner.read().classes.get(&id).cloned()
    }

    fn id_for_class(&self, class: &ClassDescriptor) -> Option<ClassId> {
        let inner = self.inner.read();
        let id = *inner.by_name.get(&class.name)?;
        (inner.classes.get(&id)?.as_ref() == class).then_some(id)
    }

    fn function_by_id(&self, id: FunctionId) -> Option<Arc<FunctionDescriptor>> {
        self.inner.read().functions.get(&id).cloned()
    }
}

/// Builder for class registration
pub struct ClassBuilder<'t> {
    table: &'t StaticClassTable,
    name: String,
    num_fields: usize,
    transferable: bool,
    value_equality: bool,
}

impl<'t> ClassBuilder<'t> {
    /// Set the instance field count
    pub fn fields(mut self, count: usize) -> Self {
        self.num_fields = count;
        self
    }

    /// Mark instances as unsendable between isolates
    pub fn unsendable(mut self) -> Self {
        self.transferable = false;
        self
    }

    /// Define `==`/hash over field values
    pub fn value_equality(mut self) -> Self {
        self.value_equality = true;
        self
    }

    /// Register the class; a name registered twice returns the first id
    pub fn register(self) -> ClassId {
        self.table.insert_class(self)
    }
}

// ============================================================================
// DEFAULT STUB GENERATOR
// ============================================================================

/// Stub for types that accept any instance of their class
pub const STUB_DEFAULT: CodeId = CodeId(1);
/// Stub for nullable types
pub const STUB_NULLABLE: CodeId = CodeId(2);
/// Stub for instantiated generic types
pub const STUB_GENERIC: CodeId = CodeId(3);
/// Stub for type parameters
pub const STUB_TYPE_PARAMETER: CodeId = CodeId(4);
/// Stub for type references (lazily specialized)
pub const STUB_LAZY: CodeId = CodeId(5);

/// Stub generator picking one of a fixed set of generic stubs
#[derive(Default)]
pub struct DefaultStubGenerator {
    calls: AtomicUsize,
}

impl DefaultStubGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stubs handed out so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl StubGenerator for DefaultStubGenerator {
    fn default_code_for_type(&self, heap: &Heap, ty: ObjRef) -> Result<CodeId> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let object = heap.get(ty)?;
        let code = match &object.body {
            ObjectBody::Type(data) if data.nullability == Nullability::Nullable => STUB_NULLABLE,
            ObjectBody::Type(data) if !data.arguments.is_null() => STUB_GENERIC,
            ObjectBody::Type(_) => STUB_DEFAULT,
            ObjectBody::TypeParameter(_) => STUB_TYPE_PARAMETER,
            ObjectBody::TypeRef(_) => STUB_LAZY,
            _ => {
                return Err(SnapshotError::Internal(format!(
                    "type-testing stub requested for a {}",
                    object.kind
                )))
            },
        };
        Ok(code)
    }
}
