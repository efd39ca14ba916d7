//! Predicate AST
//!
//! A small expression language for filtering root records. Store engines
//! translate it into their native query language, and the encryption
//! adapter rewrites literals compared against encrypted fields before a
//! predicate reaches a store.
//!
//! Field paths are single-level field names of the root document (`"name"`,
//! `"modified_at"`, or `"id"` for the identity). Dotted paths are accepted
//! and passed to the store as JSON paths.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Binary comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }

    /// Operator with operands swapped (`a < b` is `b > a`)
    pub fn flipped(&self) -> Self {
        match self {
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            other => *other,
        }
    }
}

/// Comparison operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operand {
    Field(String),
    Literal(Value),
}

impl Operand {
    /// Field name if this is a single-level field access
    pub fn direct_field(&self) -> Option<&str> {
        match self {
            Operand::Field(path) if !path.contains('.') => Some(path),
            _ => None,
        }
    }
}

/// Filter expression over root records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    /// Matches everything
    True,
    Compare {
        op: CompareOp,
        left: Operand,
        right: Operand,
    },
    /// Case-insensitive string equality
    EqualsIgnoreCase { field: String, value: String },
    /// Case-insensitive substring match
    Contains { field: String, value: String },
    In { field: String, values: Vec<Value> },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Expr::Compare {
            op,
            left: Operand::Field(field.into()),
            right: Operand::Literal(value.into()),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn equals_ignore_case(field: impl Into<String>, value: impl Into<String>) -> Self {
        Expr::EqualsIgnoreCase {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Expr::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Expr::In {
            field: field.into(),
            values,
        }
    }

    /// Conjunction; an empty list matches everything
    pub fn and(mut exprs: Vec<Expr>) -> Self {
        match exprs.len() {
            0 => Expr::True,
            1 => exprs.remove(0),
            _ => Expr::And(exprs),
        }
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// Every field path referenced anywhere in the expression
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::True => {}
            Expr::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Field(path) = operand {
                        out.push(path);
                    }
                }
            }
            Expr::EqualsIgnoreCase { field, .. }
            | Expr::Contains { field, .. }
            | Expr::In { field, .. } => out.push(field),
            Expr::And(exprs) | Expr::Or(exprs) => {
                for expr in exprs {
                    expr.collect_fields(out);
                }
            }
            Expr::Not(inner) => inner.collect_fields(out),
        }
    }
}
