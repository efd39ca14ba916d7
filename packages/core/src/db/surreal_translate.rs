//! Predicate translation for the document store
//!
//! Each aggregate is stored as `{ doc_id, modified_at, body }`; field paths
//! resolve under `body`, the identity is the top-level `doc_id`. Literals are
//! passed as named bindings (`$p0`, `$p1`, ...).

use crate::db::error::StoreError;
use crate::db::index_manager::validate_path;
use crate::models::{CompareOp, Expr, Operand, ID_FIELD};
use serde_json::{Map, Value};

/// A WHERE clause and its named bindings
#[derive(Debug, Clone, PartialEq)]
pub struct SurrealFilter {
    pub clause: String,
    pub bindings: Map<String, Value>,
}

/// SurrealQL idiom for a field path
pub fn field_idiom(path: &str) -> Result<String, StoreError> {
    if path == ID_FIELD {
        return Ok("doc_id".to_string());
    }
    validate_path(path)?;
    Ok(format!("body.{}", path))
}

pub fn translate(expr: &Expr) -> Result<SurrealFilter, StoreError> {
    let mut bindings = Map::new();
    let clause = render(expr, &mut bindings)?;
    Ok(SurrealFilter { clause, bindings })
}

fn bind(bindings: &mut Map<String, Value>, value: Value) -> String {
    let name = format!("p{}", bindings.len());
    let slot = format!("${}", name);
    bindings.insert(name, value);
    slot
}

fn lowered(idiom: &str) -> String {
    format!("string::lowercase(<string> ({} ?? ''))", idiom)
}

fn render(expr: &Expr, bindings: &mut Map<String, Value>) -> Result<String, StoreError> {
    Ok(match expr {
        Expr::True => "true".to_string(),
        Expr::Compare { op, left, right } => match (op, left, right) {
            (CompareOp::Eq, Operand::Field(f), Operand::Literal(Value::Null))
            | (CompareOp::Eq, Operand::Literal(Value::Null), Operand::Field(f)) => {
                let idiom = field_idiom(f)?;
                format!("({0} = NONE OR {0} = NULL)", idiom)
            }
            (CompareOp::Ne, Operand::Field(f), Operand::Literal(Value::Null))
            | (CompareOp::Ne, Operand::Literal(Value::Null), Operand::Field(f)) => {
                let idiom = field_idiom(f)?;
                format!("({0} != NONE AND {0} != NULL)", idiom)
            }
            (op, l, r) => {
                let comparison = format!(
                    "{} {} {}",
                    operand(l, bindings)?,
                    op.as_sql(),
                    operand(r, bindings)?
                );
                if matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    comparison
                } else {
                    // NONE sorts below every value; absent fields never satisfy a range
                    let mut guards = Vec::new();
                    for side in [l, r] {
                        if let Operand::Field(path) = side {
                            let idiom = field_idiom(path)?;
                            guards.push(format!("{0} != NONE AND {0} != NULL", idiom));
                        }
                    }
                    guards.push(comparison);
                    format!("({})", guards.join(" AND "))
                }
            }
        },
        Expr::EqualsIgnoreCase { field, value } => {
            let slot = bind(bindings, Value::String(value.clone()));
            format!(
                "{} = string::lowercase({})",
                lowered(&field_idiom(field)?),
                slot
            )
        }
        Expr::Contains { field, value } => {
            let slot = bind(bindings, Value::String(value.clone()));
            format!(
                "string::contains({}, string::lowercase({}))",
                lowered(&field_idiom(field)?),
                slot
            )
        }
        Expr::In { field, values } => {
            if values.is_empty() {
                "false".to_string()
            } else {
                let slot = bind(bindings, Value::Array(values.clone()));
                format!("{} INSIDE {}", field_idiom(field)?, slot)
            }
        }
        Expr::And(exprs) => join(exprs, " AND ", "true", bindings)?,
        Expr::Or(exprs) => join(exprs, " OR ", "false", bindings)?,
        Expr::Not(inner) => format!("!({})", render(inner, bindings)?),
    })
}

fn join(
    exprs: &[Expr],
    separator: &str,
    empty: &str,
    bindings: &mut Map<String, Value>,
) -> Result<String, StoreError> {
    if exprs.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = exprs
        .iter()
        .map(|e| render(e, bindings))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(separator)))
}

fn operand(operand: &Operand, bindings: &mut Map<String, Value>) -> Result<String, StoreError> {
    match operand {
        Operand::Field(path) => field_idiom(path),
        Operand::Literal(value) => Ok(bind(bindings, value.clone())),
    }
}
