//! Store Error Types
//!
//! Errors raised by the store engines. Concurrency conflicts and constraint
//! violations get their own variants so the repository can translate them
//! into its taxonomy without inspecting engine-specific errors.

use std::path::PathBuf;
use thiserror::Error;

/// Store engine errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open the database
    #[error("Failed to connect to database at {path}: {message}")]
    ConnectionFailed { path: PathBuf, message: String },

    /// Failed to create tables or indexes
    #[error("Failed to initialize store schema: {0}")]
    InitializationFailed(String),

    /// Failed to create the parent directory of a database file
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// The persisted row changed since it was read
    #[error("Concurrency conflict on {table}:{id}")]
    ConcurrencyConflict { table: String, id: String },

    /// A unique index rejected the write
    #[error("Constraint violation on {table}: {detail}")]
    ConstraintViolation { table: String, detail: String },

    /// A child row already belongs to a different parent
    #[error("Child {table}:{id} is owned by another parent")]
    OwnershipConflict { table: String, id: String },

    /// Identifier that cannot be used as a table, field or index name
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    Libsql(#[from] libsql::Error),

    /// SurrealDB operation error
    #[error("SurrealDB operation failed: {0}")]
    Surreal(#[from] surrealdb::Error),

    /// Statement execution error with context
    #[error("Query execution failed: {context}")]
    QueryExecution { context: String },

    /// Stored body could not be decoded or encoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn connection_failed(path: PathBuf, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            path,
            message: message.into(),
        }
    }

    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    pub fn concurrency_conflict(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::ConcurrencyConflict {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn ownership_conflict(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::OwnershipConflict {
            table: table.into(),
            id: id.into(),
        }
    }

    pub fn constraint_violation(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            table: table.into(),
            detail: detail.into(),
        }
    }

    /// Create a query execution error with context
    pub fn query_execution(context: impl Into<String>) -> Self {
        Self::QueryExecution {
            context: context.into(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
