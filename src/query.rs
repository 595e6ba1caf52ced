//! Query builder AST.
//!
//! A query is a tree: a root table with ordering, limit, and conditions,
//! plus named relationships that each correlate parent fields to child
//! fields of a subquery. The engine compiles this tree into sources,
//! operators, and a view (see `engine`).
//!
//! Builder expressions `and / or / not / cmp / exists` lower to
//! [`Condition`] trees; `not` is pushed down at lowering time so the
//! compiled tree stays in the four condition node kinds.

use crate::condition::{Condition, SimpleOp};
use crate::error::RivuletError;
use crate::schema::{SortSpec, TableSchema};
use crate::value::Value;

/// How a relationship's rows combine with the parent's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Field correlation between a parent row and the related subquery.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub parent_fields: Vec<String>,
    pub child_fields: Vec<String>,
}

impl Correlation {
    pub fn new(parent_field: &str, child_field: &str) -> Correlation {
        Correlation {
            parent_fields: vec![parent_field.to_string()],
            child_fields: vec![child_field.to_string()],
        }
    }
}

/// One named relationship of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub correlation: Correlation,
    pub subquery: Query,
    pub alias: Option<String>,
    pub kind: JoinKind,
}

impl Relationship {
    pub fn new(name: &str, correlation: Correlation, subquery: Query) -> Relationship {
        Relationship {
            name: name.to_string(),
            correlation,
            subquery,
            alias: None,
            kind: JoinKind::Left,
        }
    }

    pub fn aliased(mut self, alias: &str) -> Relationship {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn inner(mut self) -> Relationship {
        self.kind = JoinKind::Inner;
        self
    }

    /// The column the relationship materializes under.
    pub fn output_alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A query tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub order_by: Option<SortSpec>,
    pub limit: Option<usize>,
    pub conditions: Option<Condition>,
    pub relationships: Vec<Relationship>,
}

impl Query {
    pub fn table(name: &str) -> Query {
        Query {
            table: name.to_string(),
            order_by: None,
            limit: None,
            conditions: None,
            relationships: Vec::new(),
        }
    }

    pub fn order_by(mut self, sort: SortSpec) -> Query {
        self.order_by = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Query {
        self.limit = Some(limit);
        self
    }

    pub fn where_(mut self, condition: Condition) -> Query {
        self.conditions = Some(match self.conditions.take() {
            Some(existing) => Condition::and(vec![existing, condition]),
            None => condition,
        });
        self
    }

    pub fn related(mut self, relationship: Relationship) -> Query {
        self.relationships.push(relationship);
        self
    }

    /// Structural validation against the root table's schema.
    ///
    /// Relationship correlations must be single-field on each side (the
    /// join operators key one column per side), and ordering columns must
    /// be declared.
    pub fn validate(&self, schema: &TableSchema) -> Result<(), RivuletError> {
        if let Some(sort) = &self.order_by {
            for column in sort.columns() {
                if !schema.columns.contains_key(column) {
                    return Err(RivuletError::InvalidArgument(format!(
                        "query on {}: order-by column {column} is not declared",
                        self.table
                    )));
                }
            }
        }
        for relationship in &self.relationships {
            let correlation = &relationship.correlation;
            if correlation.parent_fields.len() != 1 || correlation.child_fields.len() != 1 {
                return Err(RivuletError::InvalidArgument(format!(
                    "relationship {}: only single-field correlations are supported",
                    relationship.name
                )));
            }
        }
        Ok(())
    }
}

// ── Builder expressions ────────────────────────────────────────────────────

pub fn cmp(column: &str, op: SimpleOp, value: impl Into<Value>) -> Condition {
    Condition::cmp(column, op, value)
}

pub fn and(conditions: Vec<Condition>) -> Condition {
    Condition::and(conditions)
}

pub fn or(conditions: Vec<Condition>) -> Condition {
    Condition::or(conditions)
}

pub fn not(condition: Condition) -> Condition {
    condition.negated()
}

pub fn exists(relationship: &str) -> Condition {
    Condition::exists(relationship)
}
