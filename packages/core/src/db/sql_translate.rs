//! Predicate translation for the relational store
//!
//! Record bodies live in a JSON `body` column, so field paths become
//! `json_extract(body, '$.path')` expressions. The identity is a real column.
//! Every literal is bound as a positional parameter.

use crate::db::error::StoreError;
use crate::db::index_manager::validate_path;
use crate::models::{CompareOp, Expr, Operand, SortDirection, SortSpec, ID_FIELD};
use serde_json::Value;

/// A WHERE clause and its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub clause: String,
    pub params: Vec<libsql::Value>,
}

/// Column expression for a field path
pub fn field_sql(path: &str) -> Result<String, StoreError> {
    if path == ID_FIELD {
        return Ok("id".to_string());
    }
    validate_path(path)?;
    Ok(format!("json_extract(body, '$.{}')", path))
}

/// Translate `expr` into a WHERE clause
pub fn translate(expr: &Expr) -> Result<SqlFilter, StoreError> {
    let mut params = Vec::new();
    let clause = render(expr, &mut params)?;
    Ok(SqlFilter { clause, params })
}

/// ORDER BY list; the identity always breaks remaining ties
pub fn order_by(sort: &[SortSpec]) -> Result<String, StoreError> {
    let mut keys = Vec::with_capacity(sort.len() + 1);
    for spec in sort {
        let direction = match spec.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        keys.push(format!("{} {}", field_sql(&spec.field)?, direction));
    }
    keys.push("id ASC".to_string());
    Ok(keys.join(", "))
}

/// Convert a JSON literal into a bindable value
pub fn bind_value(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => libsql::Value::Integer(i),
            None => libsql::Value::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => libsql::Value::Text(s.clone()),
        other => libsql::Value::Text(other.to_string()),
    }
}

fn render(expr: &Expr, params: &mut Vec<libsql::Value>) -> Result<String, StoreError> {
    Ok(match expr {
        Expr::True => "1".to_string(),
        Expr::Compare { op, left, right } => match (op, left, right) {
            (CompareOp::Eq, Operand::Field(f), Operand::Literal(Value::Null))
            | (CompareOp::Eq, Operand::Literal(Value::Null), Operand::Field(f)) => {
                format!("{} IS NULL", field_sql(f)?)
            }
            (CompareOp::Ne, Operand::Field(f), Operand::Literal(Value::Null))
            | (CompareOp::Ne, Operand::Literal(Value::Null), Operand::Field(f)) => {
                format!("{} IS NOT NULL", field_sql(f)?)
            }
            // null-safe so missing values count as different
            (CompareOp::Ne, l, r) => {
                format!("{} IS NOT {}", operand(l, params)?, operand(r, params)?)
            }
            (op, l, r) => format!(
                "{} {} {}",
                operand(l, params)?,
                op.as_sql(),
                operand(r, params)?
            ),
        },
        Expr::EqualsIgnoreCase { field, value } => {
            params.push(libsql::Value::Text(value.clone()));
            format!("lower({}) = lower(?)", field_sql(field)?)
        }
        Expr::Contains { field, value } => {
            params.push(libsql::Value::Text(value.clone()));
            format!("instr(lower({}), lower(?)) > 0", field_sql(field)?)
        }
        Expr::In { field, values } => {
            if values.is_empty() {
                "0".to_string()
            } else {
                params.extend(values.iter().map(bind_value));
                let slots = vec!["?"; values.len()].join(", ");
                format!("{} IN ({})", field_sql(field)?, slots)
            }
        }
        Expr::And(exprs) => join(exprs, " AND ", "1", params)?,
        Expr::Or(exprs) => join(exprs, " OR ", "0", params)?,
        Expr::Not(inner) => format!("NOT ({})", render(inner, params)?),
    })
}

fn join(
    exprs: &[Expr],
    separator: &str,
    empty: &str,
    params: &mut Vec<libsql::Value>,
) -> Result<String, StoreError> {
    if exprs.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = exprs
        .iter()
        .map(|e| render(e, params))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(separator)))
}

fn operand(operand: &Operand, params: &mut Vec<libsql::Value>) -> Result<String, StoreError> {
    match operand {
        Operand::Field(path) => field_sql(path),
        Operand::Literal(value) => {
            params.push(bind_value(value));
            Ok("?".to_string())
        }
    }
}
