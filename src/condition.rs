//! Condition trees and row-level evaluation.
//!
//! A [`Condition`] is a tree of `simple | and | or | correlated-exists`
//! nodes. Simple nodes compare two operands (column reference, literal, or
//! named parameter) under one of the SQL comparison operators. Evaluation
//! follows SQL three-valued logic collapsed to boolean: any ordered or
//! equality comparison against `null` is false; `IS` / `IS NOT` are the
//! null-safe forms.
//!
//! Correlated-exists nodes cannot be decided from the row alone; evaluation
//! takes an [`ExistsProbe`] that answers them, and sources use
//! [`Condition::references_exists`] to decide whether they may claim a
//! filter as applied.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{Row, Value};

/// One side of a simple comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// A column of the row under evaluation.
    Column(String),
    /// A literal value.
    Literal(Value),
    /// A named parameter, bound at evaluation time.
    Parameter(String),
}

/// Comparison operator of a simple condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimpleOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
    Is,
    IsNot,
    Exists,
    NotExists,
}

impl SimpleOp {
    /// The operator that accepts exactly the rows this one rejects.
    pub fn inverse(&self) -> SimpleOp {
        match self {
            SimpleOp::Eq => SimpleOp::Ne,
            SimpleOp::Ne => SimpleOp::Eq,
            SimpleOp::Lt => SimpleOp::Ge,
            SimpleOp::Le => SimpleOp::Gt,
            SimpleOp::Gt => SimpleOp::Le,
            SimpleOp::Ge => SimpleOp::Lt,
            SimpleOp::In => SimpleOp::NotIn,
            SimpleOp::NotIn => SimpleOp::In,
            SimpleOp::Like => SimpleOp::NotLike,
            SimpleOp::NotLike => SimpleOp::Like,
            SimpleOp::ILike => SimpleOp::NotILike,
            SimpleOp::NotILike => SimpleOp::ILike,
            SimpleOp::Is => SimpleOp::IsNot,
            SimpleOp::IsNot => SimpleOp::Is,
            SimpleOp::Exists => SimpleOp::NotExists,
            SimpleOp::NotExists => SimpleOp::Exists,
        }
    }
}

/// A predicate tree over rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Simple {
        left: Operand,
        op: SimpleOp,
        right: Operand,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    /// A correlated subquery exists-check against a named relationship.
    CorrelatedExists { relationship: String, negated: bool },
}

/// Answers correlated-exists checks during evaluation.
pub trait ExistsProbe {
    fn exists(&self, relationship: &str, row: &Row) -> bool;
}

/// Probe for contexts without relationships: every exists-check is false.
pub struct NoRelationships;

impl ExistsProbe for NoRelationships {
    fn exists(&self, _relationship: &str, _row: &Row) -> bool {
        false
    }
}

/// Parameter bindings for evaluation.
pub type Params = BTreeMap<String, Value>;

impl Condition {
    pub fn simple(left: Operand, op: SimpleOp, right: Operand) -> Condition {
        Condition::Simple { left, op, right }
    }

    /// Convenience: `column op literal`.
    pub fn cmp(column: &str, op: SimpleOp, value: impl Into<Value>) -> Condition {
        Condition::Simple {
            left: Operand::Column(column.to_string()),
            op,
            right: Operand::Literal(value.into()),
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Condition {
        Condition::And(conditions)
    }

    pub fn or(conditions: Vec<Condition>) -> Condition {
        Condition::Or(conditions)
    }

    pub fn exists(relationship: &str) -> Condition {
        Condition::CorrelatedExists {
            relationship: relationship.to_string(),
            negated: false,
        }
    }

    /// Logical negation, pushed down so the tree stays in the four node
    /// kinds (De Morgan over and/or, operator inversion at the leaves).
    pub fn negated(&self) -> Condition {
        match self {
            Condition::Simple { left, op, right } => Condition::Simple {
                left: left.clone(),
                op: op.inverse(),
                right: right.clone(),
            },
            Condition::And(cs) => Condition::Or(cs.iter().map(|c| c.negated()).collect()),
            Condition::Or(cs) => Condition::And(cs.iter().map(|c| c.negated()).collect()),
            Condition::CorrelatedExists {
                relationship,
                negated,
            } => Condition::CorrelatedExists {
                relationship: relationship.clone(),
                negated: !negated,
            },
        }
    }

    /// Whether any node of this tree needs an exists-probe to decide.
    pub fn references_exists(&self) -> bool {
        match self {
            Condition::Simple { op, .. } => {
                matches!(op, SimpleOp::Exists | SimpleOp::NotExists)
            }
            Condition::And(cs) | Condition::Or(cs) => cs.iter().any(|c| c.references_exists()),
            Condition::CorrelatedExists { .. } => true,
        }
    }

    /// Evaluate against a row with parameter bindings and an exists-probe.
    pub fn eval(&self, row: &Row, params: &Params, probe: &dyn ExistsProbe) -> bool {
        match self {
            Condition::Simple { left, op, right } => {
                eval_simple(row, params, probe, left, *op, right)
            }
            Condition::And(cs) => cs.iter().all(|c| c.eval(row, params, probe)),
            Condition::Or(cs) => cs.iter().any(|c| c.eval(row, params, probe)),
            Condition::CorrelatedExists {
                relationship,
                negated,
            } => probe.exists(relationship, row) != *negated,
        }
    }
}

fn resolve<'a>(operand: &'a Operand, row: &'a Row, params: &'a Params) -> &'a Value {
    static NULL: Value = Value::Null;
    match operand {
        Operand::Column(c) => row.get(c),
        Operand::Literal(v) => v,
        Operand::Parameter(p) => params.get(p).unwrap_or(&NULL),
    }
}

fn eval_simple(
    row: &Row,
    params: &Params,
    probe: &dyn ExistsProbe,
    left: &Operand,
    op: SimpleOp,
    right: &Operand,
) -> bool {
    // EXISTS in simple position names its relationship on the right side.
    if matches!(op, SimpleOp::Exists | SimpleOp::NotExists) {
        let name = match resolve(right, row, params) {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return probe.exists(&name, row) == matches!(op, SimpleOp::Exists);
    }

    let lhs = resolve(left, row, params);
    let rhs = resolve(right, row, params);

    match op {
        // Null-safe identity checks.
        SimpleOp::Is => lhs == rhs,
        SimpleOp::IsNot => lhs != rhs,
        _ if lhs.is_null() || rhs.is_null() => false,
        SimpleOp::Eq => lhs == rhs,
        SimpleOp::Ne => lhs != rhs,
        SimpleOp::Lt => lhs < rhs,
        SimpleOp::Le => lhs <= rhs,
        SimpleOp::Gt => lhs > rhs,
        SimpleOp::Ge => lhs >= rhs,
        SimpleOp::In => in_list(lhs, rhs),
        SimpleOp::NotIn => !in_list(lhs, rhs),
        SimpleOp::Like => like_match(&lhs.to_string(), &rhs.to_string(), false),
        SimpleOp::NotLike => !like_match(&lhs.to_string(), &rhs.to_string(), false),
        SimpleOp::ILike => like_match(&lhs.to_string(), &rhs.to_string(), true),
        SimpleOp::NotILike => !like_match(&lhs.to_string(), &rhs.to_string(), true),
        SimpleOp::Exists | SimpleOp::NotExists => unreachable!("handled above"),
    }
}

/// Membership test for `IN`. The right-hand side is a JSON array literal.
fn in_list(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Json(serde_json::Value::Array(items)) => items
            .iter()
            .any(|item| &Value::from_json(item.clone()) == needle),
        _ => false,
    }
}

/// SQL LIKE matcher: `%` matches any run (including empty), `_` matches one
/// character, `\` escapes the next pattern character.
fn like_match(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (text, pattern) = if case_insensitive {
        (text.to_lowercase(), pattern.to_lowercase())
    } else {
        (text.to_string(), pattern.to_string())
    };
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    like_rec(&t, 0, &p, 0)
}

fn like_rec(t: &[char], ti: usize, p: &[char], pi: usize) -> bool {
    if pi == p.len() {
        return ti == t.len();
    }
    match p[pi] {
        '%' => {
            // Greedy collapse of consecutive wildcards, then try every split.
            let mut next = pi;
            while next < p.len() && p[next] == '%' {
                next += 1;
            }
            if next == p.len() {
                return true;
            }
            (ti..=t.len()).any(|start| like_rec(t, start, p, next))
        }
        '_' => ti < t.len() && like_rec(t, ti + 1, p, pi + 1),
        '\\' if pi + 1 < p.len() => {
            ti < t.len() && t[ti] == p[pi + 1] && like_rec(t, ti + 1, p, pi + 2)
        }
        c => ti < t.len() && t[ti] == c && like_rec(t, ti + 1, p, pi + 1),
    }
}
