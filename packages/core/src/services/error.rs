//! Service Layer Error Types
//!
//! [`UsageFault`] reports schema or structural misuse detected while walking
//! a record graph. [`RepositoryError`] is the taxonomy repository callers
//! see; store-native errors are translated into it and never leak.

use crate::crypto::CryptoError;
use crate::db::StoreError;
use crate::services::validator::Violation;
use thiserror::Error;

/// Structural or schema misuse
///
/// Indicates a programming or schema error rather than bad data. Never
/// retried and not meant to be handled in normal flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageFault {
    /// Collection field whose element or container cannot hold owned children
    #[error("{record_type}.{field}: unsupported collection ({reason})")]
    UnsupportedCollection {
        record_type: String,
        field: String,
        reason: String,
    },

    /// Child record without a valid identity
    #[error("{record_type}.{field}: child record has no valid id")]
    MissingIdentity { record_type: String, field: String },

    /// Document value does not have the shape its schema declares
    #[error("{record_type}.{field}: expected {expected}, found {found}")]
    ShapeMismatch {
        record_type: String,
        field: String,
        expected: String,
        found: String,
    },

    /// Source and target field types cannot be converted into each other
    #[error("{field}: cannot convert {source_kind} into {target_kind}")]
    IncompatibleConversion {
        field: String,
        source_kind: String,
        target_kind: String,
    },

    /// Pattern rule that is not a valid regular expression
    #[error("{record_type}.{field}: invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        record_type: String,
        field: String,
        pattern: String,
        reason: String,
    },

    /// Reference field pointing at a type that is not a root
    #[error("{record_type}.{field}: reference target {target} is not a root record")]
    InvalidReference {
        record_type: String,
        field: String,
        target: String,
    },

    /// Transaction handle misuse
    #[error("Transaction misuse: {0}")]
    Transaction(String),
}

impl UsageFault {
    pub fn shape_mismatch(
        record_type: &str,
        field: &str,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::ShapeMismatch {
            record_type: record_type.to_string(),
            field: field.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn missing_identity(record_type: &str, field: &str) -> Self {
        Self::MissingIdentity {
            record_type: record_type.to_string(),
            field: field.to_string(),
        }
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }
}

/// Repository operation errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Declarative rule violations anywhere in the graph
    #[error("Validation failed for {record_type}: {}", format_violations(.violations))]
    Validation {
        record_type: String,
        violations: Vec<Violation>,
    },

    /// Alternate identity already used by a different root
    #[error("Duplicate unique key for {record_type}: '{key}'")]
    DuplicateUniqueKey { record_type: String, key: String },

    /// Persisted graph changed between read and write; reload and reapply
    #[error("Concurrency conflict for {record_type} {id}: {detail}")]
    ConcurrencyConflict {
        record_type: String,
        id: String,
        detail: String,
    },

    /// Structural or schema misuse
    #[error("Usage fault: {0}")]
    UsageFault(#[from] UsageFault),

    /// Underlying store failure, with context
    #[error("Store failure during {operation} on {record_type}: {source}")]
    Store {
        record_type: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// Field encryption or decryption failed
    #[error("Encryption failure: {0}")]
    Encryption(#[from] CryptoError),

    /// Record could not be converted to or from its document form
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed data-grid request
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RepositoryError {
    pub fn validation(record_type: impl Into<String>, violations: Vec<Violation>) -> Self {
        Self::Validation {
            record_type: record_type.into(),
            violations,
        }
    }

    pub fn duplicate_unique_key(record_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateUniqueKey {
            record_type: record_type.into(),
            key: key.into(),
        }
    }

    pub fn concurrency_conflict(
        record_type: impl Into<String>,
        id: impl ToString,
        detail: impl Into<String>,
    ) -> Self {
        Self::ConcurrencyConflict {
            record_type: record_type.into(),
            id: id.to_string(),
            detail: detail.into(),
        }
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Translate a store error raised during `operation`
    pub fn from_store(record_type: &str, operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict { table, id } => Self::ConcurrencyConflict {
                record_type: record_type.to_string(),
                id,
                detail: format!("row in {} changed before commit", table),
            },
            StoreError::ConstraintViolation { detail, .. } => Self::DuplicateUniqueKey {
                record_type: record_type.to_string(),
                key: detail,
            },
            source => Self::Store {
                record_type: record_type.to_string(),
                operation,
                source,
            },
        }
    }

    /// Whether a caller may retry after reloading the record
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Violations carried by a validation failure
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation { violations, .. } => violations,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
