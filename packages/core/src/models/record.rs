//! Record Model
//!
//! Records are plain serde structs. The engine exchanges them with stores as
//! JSON [`Document`]s and reasons about their structure through the
//! [`RecordSchema`] each type declares.
//!
//! # Identity
//!
//! Every record document carries its identity under the reserved `"id"` key
//! as a UUID string. Identities are client-generated; nothing in the engine
//! assigns them.
//!
//! # Roots and children
//!
//! A [`RootRecord`] is an aggregate persisted directly in a store collection
//! and carries [`AuditFields`]. Every other record is owned by exactly one
//! parent and lives and dies with the root that owns it.

use crate::models::schema::{RecordSchema, MODIFIED_AT_FIELD};
use crate::models::timestamp;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stable 128-bit record identity
pub type RecordId = Uuid;

/// Field-name to value map for a single record level
pub type Document = serde_json::Map<String, Value>;

/// Reserved key holding a record's identity
pub const ID_FIELD: &str = "id";

/// Capability every persisted record type implements
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Declarative metadata for this type
    fn schema() -> RecordSchema;

    /// Identity of this instance
    fn id(&self) -> RecordId;
}

/// A record that is the root of an aggregate
pub trait RootRecord: Record {
    fn audit(&self) -> &AuditFields;

    fn audit_mut(&mut self) -> &mut AuditFields;

    /// Value of the schema's unique-key field, if declared and textual
    fn unique_key(&self) -> Option<String> {
        let field = Self::schema().unique_key?;
        to_document(self)
            .ok()?
            .get(&field)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Audit columns present on every root record
///
/// Embed with `#[serde(flatten)]` so the fields sit at the root level of the
/// document next to the record's own fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    #[serde(default, with = "timestamp::micros")]
    pub created_at: Option<DateTime<Utc>>,

    /// Optimistic-concurrency witness
    #[serde(default, with = "timestamp::micros")]
    pub modified_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_by: Option<String>,

    #[serde(default)]
    pub modified_by: Option<String>,
}

/// Serialize a record into its document form
pub fn to_document<T: Serialize>(record: &T) -> Result<Document, serde_json::Error> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "record must serialize to a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Deserialize a record from its document form
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(document))
}

/// Identity stored in a document, if present and well-formed
pub fn document_id(document: &Document) -> Option<RecordId> {
    document
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Raw stored modification witness of a root document
pub fn document_modified_at(document: &Document) -> Option<&str> {
    document.get(MODIFIED_AT_FIELD).and_then(Value::as_str)
}

/// Empty document carrying only an identity
pub fn empty_document(id: RecordId) -> Document {
    let mut doc = Document::new();
    doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    doc
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::schema::FieldSchema;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ticket {
        id: RecordId,
        title: String,
        #[serde(flatten)]
        audit: AuditFields,
    }

    impl Record for Ticket {
        fn schema() -> RecordSchema {
            RecordSchema::root("Ticket", "tickets")
                .field(FieldSchema::text("title"))
                .unique_key("title")
        }

        fn id(&self) -> RecordId {
            self.id
        }
    }

    impl RootRecord for Ticket {
        fn audit(&self) -> &AuditFields {
            &self.audit
        }

        fn audit_mut(&mut self) -> &mut AuditFields {
            &mut self.audit
        }
    }

    #[test]
    fn test_audit_fields_flatten_into_root_document() {
        let ticket = Ticket {
            id: Uuid::new_v4(),
            title: "Broken printer".to_string(),
            audit: AuditFields {
                modified_at: timestamp::parse("2025-05-01T08:00:00Z"),
                ..Default::default()
            },
        };

        let doc = to_document(&ticket).unwrap();
        assert_eq!(document_id(&doc), Some(ticket.id));
        assert_eq!(
            document_modified_at(&doc),
            Some("2025-05-01T08:00:00.000000Z")
        );
        assert_eq!(doc.get("created_at"), Some(&Value::Null));

        let back: Ticket = from_document(doc).unwrap();
        assert_eq!(back.audit, ticket.audit);
        assert_eq!(back.id(), ticket.id);
    }

    #[test]
    fn test_unique_key_reads_declared_field() {
        let ticket = Ticket {
            id: Uuid::new_v4(),
            title: "Broken printer".to_string(),
            audit: AuditFields::default(),
        };
        assert_eq!(ticket.unique_key().as_deref(), Some("Broken printer"));
    }

    #[test]
    fn test_to_document_rejects_non_objects() {
        assert!(to_document(&42).is_err());
    }
}
