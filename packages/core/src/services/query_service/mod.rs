//! Query Service - Data-Grid Request Translation
//!
//! Turns a generic [`QueryRequest`] (column filters, sort keys, 1-based
//! paging) into the predicate AST, sort list and offset/limit the store
//! engines understand.
//!
//! # Architecture
//!
//! - **Filters**: combined with AND; each filter names a single-level field
//!   of the root type (or `id`)
//! - **Between**: expands to `field >= low AND field <= high`
//! - **Contains**: case-insensitive substring match
//! - **Sorting**: first key sorts, later keys break ties; stores append the
//!   identity as the final tie-breaker so paging is stable
//!
//! Encrypted-field rewriting happens afterwards in the repository, on the
//! translated predicate.
//!
//! # Examples
//!
//! ```rust,no_run
//! use docstore_core::models::{FilterKind, FilterSpec, QueryRequest, SortSpec};
//!
//! let request = QueryRequest::page(2, 50)
//!     .filter(FilterSpec::new("status", FilterKind::In, serde_json::json!(["open", "held"])))
//!     .sort_by(SortSpec::desc("total"));
//! ```

use crate::models::{
    Expr, FieldKind, FilterKind, FilterSpec, QueryRequest, RecordType, SortSpec, ID_FIELD,
};
use crate::services::error::RepositoryError;
use crate::services::reflector::Reflector;
use serde_json::Value;

/// Store-ready form of a grid request
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub predicate: Expr,
    pub sort: Vec<SortSpec>,
    pub offset: u64,
    pub limit: u64,
}

/// Grid request translator
pub struct QueryTranslator<'a> {
    reflector: &'a Reflector,
}

impl<'a> QueryTranslator<'a> {
    pub fn new(reflector: &'a Reflector) -> Self {
        Self { reflector }
    }

    /// Validate and translate `request` against the fields of `ty`
    pub fn translate(
        &self,
        ty: &RecordType,
        request: &QueryRequest,
    ) -> Result<TranslatedQuery, RepositoryError> {
        if request.page == 0 {
            return Err(RepositoryError::invalid_query("page numbers start at 1"));
        }
        if request.page_size == 0 {
            return Err(RepositoryError::invalid_query("page size must be positive"));
        }

        let mut predicates = Vec::with_capacity(request.filters.len());
        for filter in &request.filters {
            self.check_field(ty, &filter.field)?;
            predicates.push(Self::filter_expr(filter)?);
        }

        for sort in &request.sort {
            self.check_field(ty, &sort.field)?;
        }

        Ok(TranslatedQuery {
            predicate: Expr::and(predicates),
            sort: request.sort.clone(),
            offset: (request.page - 1).saturating_mul(request.page_size),
            limit: request.page_size,
        })
    }

    /// Number of pages needed for `total` records
    pub fn page_count(total: u64, page_size: u64) -> u64 {
        if page_size == 0 {
            0
        } else {
            total.div_ceil(page_size)
        }
    }

    fn check_field(&self, ty: &RecordType, field: &str) -> Result<(), RepositoryError> {
        if field == ID_FIELD {
            return Ok(());
        }
        let schema = self.reflector.schema_of(ty);
        match schema.get(field).map(|f| &f.kind) {
            Some(FieldKind::Record(_))
            | Some(FieldKind::Collection { .. })
            | Some(FieldKind::Reference { .. }) => Err(RepositoryError::invalid_query(format!(
                "field '{}' of {} is not a single-level value",
                field, schema.name
            ))),
            Some(_) => Ok(()),
            None => Err(RepositoryError::invalid_query(format!(
                "unknown field '{}' on {}",
                field, schema.name
            ))),
        }
    }

    fn filter_expr(filter: &FilterSpec) -> Result<Expr, RepositoryError> {
        let field = filter.field.as_str();
        let value = filter.value.clone();
        Ok(match filter.kind {
            FilterKind::Equals => Expr::eq(field, value),
            FilterKind::NotEqualTo => Expr::ne(field, value),
            FilterKind::GreaterThan => Expr::gt(field, value),
            FilterKind::GreaterThanOrEqual => Expr::ge(field, value),
            FilterKind::LessThan => Expr::lt(field, value),
            FilterKind::LessThanOrEqual => Expr::le(field, value),
            FilterKind::Contains => match value {
                Value::String(needle) => Expr::contains(field, needle),
                other => Expr::contains(field, other.to_string()),
            },
            FilterKind::In => match value {
                Value::Array(values) => Expr::is_in(field, values),
                _ => {
                    return Err(RepositoryError::invalid_query(format!(
                        "In filter on '{}' needs an array value",
                        field
                    )))
                }
            },
            FilterKind::Between => match value {
                Value::Array(bounds) if bounds.len() == 2 => {
                    let mut bounds = bounds.into_iter();
                    let low = bounds.next().unwrap_or(Value::Null);
                    let high = bounds.next().unwrap_or(Value::Null);
                    Expr::and(vec![Expr::ge(field, low), Expr::le(field, high)])
                }
                _ => {
                    return Err(RepositoryError::invalid_query(format!(
                        "Between filter on '{}' needs exactly two bounds",
                        field
                    )))
                }
            },
        })
    }
}
