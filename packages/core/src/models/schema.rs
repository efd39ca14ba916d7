//! Declarative Record Metadata
//!
//! Every record type describes itself with a [`RecordSchema`]: the ordered
//! list of its fields, what kind of value each field holds, and the
//! behaviour attached to it (validation rules, encryption, indexing,
//! cross-root references). The engine never inspects Rust types at runtime;
//! it walks documents guided by these schemas.
//!
//! ## Example
//!
//! ```rust,ignore
//! impl Record for Customer {
//!     fn schema() -> RecordSchema {
//!         RecordSchema::root("Customer", "customers")
//!             .field(FieldSchema::text("name").required().max_length(80).indexed())
//!             .field(FieldSchema::text("email").encrypted_searchable())
//!             .field(FieldSchema::records::<Order>("orders"))
//!             .unique_key("name")
//!     }
//!
//!     fn id(&self) -> RecordId {
//!         self.id
//!     }
//! }
//! ```

use crate::models::record::Record;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;

/// Audit field names shared by every root schema
pub const CREATED_AT_FIELD: &str = "created_at";
pub const MODIFIED_AT_FIELD: &str = "modified_at";
pub const CREATED_BY_FIELD: &str = "created_by";
pub const MODIFIED_BY_FIELD: &str = "modified_by";

/// Handle to a statically known record type
///
/// Carries the type's identity and the function that describes it. This is
/// the registry entry the engine dispatches through instead of runtime
/// reflection; equality is by Rust type identity.
#[derive(Clone, Copy)]
pub struct RecordType {
    type_id: TypeId,
    type_name: &'static str,
    describe: fn() -> RecordSchema,
}

impl RecordType {
    /// Handle for the record type `T`
    pub fn of<T: Record>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            describe: T::schema,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified Rust type name (diagnostics only)
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Build the schema for this type
    ///
    /// Prefer [`crate::services::Reflector::schema_of`], which memoizes.
    pub fn describe(&self) -> RecordSchema {
        (self.describe)()
    }
}

impl PartialEq for RecordType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for RecordType {}

impl std::hash::Hash for RecordType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordType({})", self.type_name)
    }
}

/// Scalar value kinds stored inline in a record's own document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Integer,
    Float,
    Boolean,
    Timestamp,
    Uuid,
}

/// Element type of a collection-valued field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Record(RecordType),
    Scalar(ScalarKind),
    Text,
}

/// Container shape of a collection-valued field
///
/// Only `List` supports positional access and removal, which is what child
/// reconciliation needs. `Set` exists so schemas can describe unordered
/// containers; using one for owned children is a usage fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    List,
    Set,
}

/// What a field holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Text,
    Bytes,
    /// A single owned child record
    Record(RecordType),
    /// A collection of values; owned children when the element is a record
    Collection {
        element: ElementKind,
        container: ContainerKind,
    },
    /// Another root, looked up through the sibling `key_field` on read
    Reference { target: RecordType, key_field: String },
}

impl FieldKind {
    /// Record type of an owned single child, if this field holds one
    pub fn child_record(&self) -> Option<&RecordType> {
        match self {
            FieldKind::Record(ty) => Some(ty),
            _ => None,
        }
    }

    /// Record type of owned list elements, if this field holds them
    pub fn child_collection(&self) -> Option<&RecordType> {
        match self {
            FieldKind::Collection {
                element: ElementKind::Record(ty),
                ..
            } => Some(ty),
            _ => None,
        }
    }

    /// Whether the field owns child records (single or collection)
    pub fn owns_records(&self) -> bool {
        self.child_record().is_some() || self.child_collection().is_some()
    }
}

/// Readability/writability of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    ReadWrite,
    /// Populated by the engine (references, computed values); never copied
    /// from a caller's graph
    ReadOnly,
    /// Accepted from callers but never read back (e.g. a password to hash);
    /// skipped by reconciliation
    WriteOnly,
}

/// Encrypted-field marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encryption {
    /// Deterministic scheme so equality predicates can be rewritten
    pub searchable: bool,
}

/// Declarative validation rule attached to a field
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Required,
    MinLength(usize),
    MaxLength(usize),
    /// Regular expression the whole value must match
    Pattern(String),
    Range { min: f64, max: f64 },
}

/// One declared field of a record type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub access: FieldAccess,
    pub encryption: Option<Encryption>,
    pub rules: Vec<Rule>,
    /// Single-column index hint
    pub indexed: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            access: FieldAccess::ReadWrite,
            encryption: None,
            rules: Vec::new(),
            indexed: false,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarKind::Integer))
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarKind::Float))
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarKind::Boolean))
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarKind::Timestamp))
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Scalar(ScalarKind::Uuid))
    }

    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bytes)
    }

    /// Single owned child record of type `T`
    pub fn record<T: Record>(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Record(RecordType::of::<T>()))
    }

    /// Ordered list of owned child records of type `T`
    pub fn records<T: Record>(name: impl Into<String>) -> Self {
        Self::collection(
            name,
            ElementKind::Record(RecordType::of::<T>()),
            ContainerKind::List,
        )
    }

    pub fn collection(
        name: impl Into<String>,
        element: ElementKind,
        container: ContainerKind,
    ) -> Self {
        Self::new(name, FieldKind::Collection { element, container })
    }

    /// Cross-root reference to a `T`, resolved on read from `key_field`
    pub fn reference<T: Record>(name: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            access: FieldAccess::ReadOnly,
            ..Self::new(
                name,
                FieldKind::Reference {
                    target: RecordType::of::<T>(),
                    key_field: key_field.into(),
                },
            )
        }
    }

    pub fn required(mut self) -> Self {
        self.rules.push(Rule::Required);
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.rules.push(Rule::MinLength(min));
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.rules.push(Rule::MaxLength(max));
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.rules.push(Rule::Pattern(pattern.into()));
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.rules.push(Rule::Range { min, max });
        self
    }

    /// Stored encrypted with a randomized scheme
    pub fn encrypted(mut self) -> Self {
        self.encryption = Some(Encryption { searchable: false });
        self
    }

    /// Stored encrypted with a deterministic scheme (equality-searchable)
    pub fn encrypted_searchable(mut self) -> Self {
        self.encryption = Some(Encryption { searchable: true });
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access = FieldAccess::ReadOnly;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.access = FieldAccess::WriteOnly;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn is_read_write(&self) -> bool {
        self.access == FieldAccess::ReadWrite
    }
}

/// Sort direction for index columns and query ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

/// Column of a multi-column index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub field: String,
    pub direction: SortDirection,
}

/// Multi-column index hint with optional include columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub columns: Vec<IndexColumn>,
    pub include: Vec<String>,
}

impl IndexSpec {
    /// Ascending index over `fields`, in order
    pub fn on<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: fields
                .into_iter()
                .map(|f| IndexColumn {
                    field: f.into(),
                    direction: SortDirection::Ascending,
                })
                .collect(),
            include: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Flip one column to descending order
    pub fn descending(mut self, field: &str) -> Self {
        for column in self.columns.iter_mut().filter(|c| c.field == field) {
            column.direction = SortDirection::Descending;
        }
        self
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(fields.into_iter().map(Into::into));
        self
    }
}

/// Complete description of a record type
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    /// Type name used in violation messages and name lookups
    pub name: String,
    /// Table (relational) or collection (document) name
    pub table: String,
    pub is_root: bool,
    pub fields: Vec<FieldSchema>,
    /// Field holding the alternate identity, unique case-insensitively
    pub unique_key: Option<String>,
    pub indexes: Vec<IndexSpec>,
}

impl RecordSchema {
    /// Schema for a root record; audit fields are declared automatically
    pub fn root(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            is_root: true,
            fields: vec![
                FieldSchema::timestamp(CREATED_AT_FIELD),
                FieldSchema::timestamp(MODIFIED_AT_FIELD),
                FieldSchema::text(CREATED_BY_FIELD),
                FieldSchema::text(MODIFIED_BY_FIELD),
            ],
            unique_key: None,
            indexes: Vec::new(),
        }
    }

    /// Schema for an owned child record
    pub fn child(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            is_root: false,
            fields: Vec::new(),
            unique_key: None,
            indexes: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unique_key(mut self, field: impl Into<String>) -> Self {
        self.unique_key = Some(field.into());
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields holding owned child records
    pub fn child_fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields
            .iter()
            .filter(|f| f.is_read_write() && f.kind.owns_records())
    }

    pub fn has_encrypted_fields(&self) -> bool {
        self.fields.iter().any(|f| f.encryption.is_some())
    }
}
