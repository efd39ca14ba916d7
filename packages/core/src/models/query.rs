//! Data-grid query types
//!
//! The request/response shapes a generic data grid sends to
//! [`crate::services::Repository::query`]. Requests arrive as JSON from a UI
//! layer, so the types use camelCase field names.

use crate::models::schema::SortDirection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter comparison kinds supported by the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    Equals,
    NotEqualTo,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// Case-insensitive substring
    Contains,
    /// `value` is an array of candidates
    In,
    /// `value` is a two-element array, both bounds inclusive
    Between,
}

/// One column filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub field: String,
    pub kind: FilterKind,
    pub value: Value,
}

impl FilterSpec {
    pub fn new(field: impl Into<String>, kind: FilterKind, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            kind,
            value: value.into(),
        }
    }
}

/// One sort key; the first key sorts, later keys break ties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    25
}

/// Paged, filtered, sorted grid request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Filters, combined with AND
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    /// 1-based page number
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: Vec::new(),
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl QueryRequest {
    pub fn page(page: u64, page_size: u64) -> Self {
        Self {
            page,
            page_size,
            ..Default::default()
        }
    }

    pub fn filter(mut self, filter: FilterSpec) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.sort.push(sort);
        self
    }
}

/// One page of grid results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    pub data: Vec<T>,
    pub total_record_count: u64,
    pub total_page_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_accepts_grid_json() {
        let request: QueryRequest = serde_json::from_value(json!({
            "filters": [{"field": "name", "kind": "Contains", "value": "ac"}],
            "sort": [{"field": "name", "direction": "desc"}],
            "pageSize": 10
        }))
        .unwrap();

        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, 10);
        assert_eq!(request.filters[0].kind, FilterKind::Contains);
        assert_eq!(request.sort[0], SortSpec::desc("name"));
    }
}
