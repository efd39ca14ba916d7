//! Data Models
//!
//! Record capability traits, declarative schema metadata, the predicate AST
//! and the data-grid request/response types.

pub mod predicate;
pub mod query;
pub mod record;
pub mod schema;
pub mod timestamp;

pub use predicate::{CompareOp, Expr, Operand};
pub use query::{FilterKind, FilterSpec, QueryRequest, QueryResult, SortSpec};
pub use record::{
    document_id, document_modified_at, empty_document, from_document, to_document, AuditFields,
    Document, Record, RecordId, RootRecord, ID_FIELD,
};
pub use schema::{
    ContainerKind, ElementKind, Encryption, FieldAccess, FieldKind, FieldSchema, IndexColumn,
    IndexSpec, RecordSchema, RecordType, Rule, ScalarKind, SortDirection, CREATED_AT_FIELD,
    CREATED_BY_FIELD, MODIFIED_AT_FIELD, MODIFIED_BY_FIELD,
};
