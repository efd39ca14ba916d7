//! Record Validator
//!
//! Walks a record document depth-first, guided by its schema:
//!
//! 1. Owned child records are validated first (single children, then list
//!    elements).
//! 2. Collection fields must hold records in a positional container, and
//!    every owned child must carry an identity. Anything else is a schema
//!    bug and aborts the walk with a [`UsageFault`].
//! 3. The record's own field rules run last, so children's violations come
//!    before their parent's.

use crate::models::record::json_type_name;
use crate::models::{
    document_id, ContainerKind, Document, ElementKind, FieldKind, FieldSchema, RecordType, Rule,
};
use crate::services::error::UsageFault;
use crate::services::reflector::Reflector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A declarative rule violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Schema name of the record declaring the field
    pub record_type: String,
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(
        record_type: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.record_type, self.field, self.message)
    }
}

/// Graph validator
pub struct Validator<'a> {
    reflector: &'a Reflector,
}

impl<'a> Validator<'a> {
    pub fn new(reflector: &'a Reflector) -> Self {
        Self { reflector }
    }

    /// Validate `record` and everything it owns
    ///
    /// # Errors
    ///
    /// Returns a [`UsageFault`] when the schema or the document's structure
    /// is unusable; rule violations are returned in the `Ok` list instead.
    pub fn validate(
        &self,
        ty: &RecordType,
        record: &Document,
    ) -> Result<Vec<Violation>, UsageFault> {
        let mut violations = Vec::new();
        self.walk(ty, record, &mut violations)?;
        Ok(violations)
    }

    fn walk(
        &self,
        ty: &RecordType,
        record: &Document,
        violations: &mut Vec<Violation>,
    ) -> Result<(), UsageFault> {
        let schema = self.reflector.schema_of(ty);

        for field in schema.fields.iter().filter(|f| f.is_read_write()) {
            let value = record.get(&field.name).unwrap_or(&Value::Null);
            match &field.kind {
                FieldKind::Record(child_ty) => match value {
                    Value::Null => {}
                    Value::Object(child) => {
                        if document_id(child).is_none() {
                            return Err(UsageFault::missing_identity(&schema.name, &field.name));
                        }
                        self.walk(child_ty, child, violations)?;
                    }
                    other => {
                        return Err(UsageFault::shape_mismatch(
                            &schema.name,
                            &field.name,
                            "object",
                            json_type_name(other),
                        ))
                    }
                },
                FieldKind::Collection { element, container } => {
                    let child_ty = match element {
                        ElementKind::Record(child_ty) => child_ty,
                        _ => {
                            return Err(UsageFault::UnsupportedCollection {
                                record_type: schema.name.clone(),
                                field: field.name.clone(),
                                reason: "element type is not a record".to_string(),
                            })
                        }
                    };
                    if *container != ContainerKind::List {
                        return Err(UsageFault::UnsupportedCollection {
                            record_type: schema.name.clone(),
                            field: field.name.clone(),
                            reason: "container does not support positional removal".to_string(),
                        });
                    }
                    match value {
                        Value::Null => {}
                        Value::Array(items) => {
                            for item in items {
                                let child = item.as_object().ok_or_else(|| {
                                    UsageFault::shape_mismatch(
                                        &schema.name,
                                        &field.name,
                                        "object",
                                        json_type_name(item),
                                    )
                                })?;
                                if document_id(child).is_none() {
                                    return Err(UsageFault::missing_identity(
                                        &schema.name,
                                        &field.name,
                                    ));
                                }
                                self.walk(child_ty, child, violations)?;
                            }
                        }
                        other => {
                            return Err(UsageFault::shape_mismatch(
                                &schema.name,
                                &field.name,
                                "array",
                                json_type_name(other),
                            ))
                        }
                    }
                }
                _ => {}
            }
        }

        for field in &schema.fields {
            let value = record.get(&field.name).unwrap_or(&Value::Null);
            for rule in &field.rules {
                if let Some(message) = self.check_rule(&schema.name, field, rule, value)? {
                    violations.push(Violation::new(&schema.name, &field.name, message));
                }
            }
        }

        Ok(())
    }

    fn check_rule(
        &self,
        record_type: &str,
        field: &FieldSchema,
        rule: &Rule,
        value: &Value,
    ) -> Result<Option<String>, UsageFault> {
        let message = match rule {
            Rule::Required => match value {
                Value::Null => Some("is required".to_string()),
                Value::String(s) if s.trim().is_empty() => Some("is required".to_string()),
                _ => None,
            },
            Rule::MinLength(min) => value_length(value)
                .filter(|len| len < min)
                .map(|_| format!("must be at least {} characters", min)),
            Rule::MaxLength(max) => value_length(value)
                .filter(|len| len > max)
                .map(|_| format!("must be at most {} characters", max)),
            Rule::Pattern(pattern) => {
                let regex = self.reflector.pattern(pattern).map_err(|e| {
                    UsageFault::InvalidPattern {
                        record_type: record_type.to_string(),
                        field: field.name.clone(),
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    }
                })?;
                value
                    .as_str()
                    .filter(|s| !regex.is_match(s))
                    .map(|_| format!("must match pattern '{}'", pattern))
            }
            Rule::Range { min, max } => value
                .as_f64()
                .filter(|n| n < min || n > max)
                .map(|_| format!("must be between {} and {}", min, max)),
        };
        Ok(message)
    }
}

fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}
