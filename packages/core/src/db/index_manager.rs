//! Index Management
//!
//! Scans a root's schema tree for index hints and turns them into
//! backend-neutral [`IndexPlan`]s. Each store renders the plans in its own
//! dialect during `initialize`.
//!
//! Hints come from three places:
//!
//! - `FieldSchema::indexed()` on any field: single-column index
//! - `RecordSchema::index(IndexSpec)`: multi-column index with explicit
//!   column ordering and optional include columns
//! - `RecordSchema::unique_key(..)` on a root: case-insensitive unique index

use crate::db::error::StoreError;
use crate::models::{IndexColumn, RecordType, SortDirection};
use crate::services::Reflector;

/// One index to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPlan {
    pub table: String,
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub include: Vec<String>,
    pub unique: bool,
}

/// Index-attribute scanner
pub struct IndexManager {
    reflector: &'static Reflector,
}

impl IndexManager {
    pub fn new() -> Self {
        Self {
            reflector: Reflector::global(),
        }
    }

    /// Every index declared by `root` and the records it owns
    pub fn plan(&self, root: &RecordType) -> Result<Vec<IndexPlan>, StoreError> {
        let mut plans = Vec::new();

        for ty in self.reflector.record_types(root) {
            let schema = self.reflector.schema_of(&ty);
            validate_identifier(&schema.table)?;

            for field in schema.fields.iter().filter(|f| f.indexed) {
                validate_identifier(&field.name)?;
                plans.push(IndexPlan {
                    table: schema.table.clone(),
                    name: format!("idx_{}_{}", schema.table, field.name),
                    columns: vec![IndexColumn {
                        field: field.name.clone(),
                        direction: SortDirection::Ascending,
                    }],
                    include: Vec::new(),
                    unique: false,
                });
            }

            for spec in &schema.indexes {
                for field in spec
                    .columns
                    .iter()
                    .map(|c| &c.field)
                    .chain(spec.include.iter())
                {
                    validate_identifier(field)?;
                }
                let name = match &spec.name {
                    Some(name) => name.clone(),
                    None => format!(
                        "idx_{}_{}",
                        schema.table,
                        spec.columns
                            .iter()
                            .map(|c| c.field.as_str())
                            .collect::<Vec<_>>()
                            .join("_")
                    ),
                };
                validate_identifier(&name)?;
                plans.push(IndexPlan {
                    table: schema.table.clone(),
                    name,
                    columns: spec.columns.clone(),
                    include: spec.include.clone(),
                    unique: false,
                });
            }

            if let (true, Some(key)) = (schema.is_root, &schema.unique_key) {
                validate_identifier(key)?;
                plans.push(IndexPlan {
                    table: schema.table.clone(),
                    name: format!("uq_{}_{}", schema.table, key),
                    columns: vec![IndexColumn {
                        field: key.clone(),
                        direction: SortDirection::Ascending,
                    }],
                    include: Vec::new(),
                    unique: true,
                });
            }
        }

        tracing::debug!(root = root.type_name(), count = plans.len(), "planned indexes");
        Ok(plans)
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject names that cannot be spliced into DDL or a JSON path
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Validate a possibly dotted field path segment by segment
pub fn validate_path(path: &str) -> Result<(), StoreError> {
    path.split('.')
        .try_for_each(validate_identifier)
        .map_err(|_| StoreError::InvalidIdentifier(path.to_string()))
}
