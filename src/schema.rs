//! Table schemas and orderings.
//!
//! A [`TableSchema`] declares a table's typed columns and its ordered
//! primary key. Rows are type-checked against the schema at push boundaries;
//! a disagreement is a `SchemaVersionNotSupported` error, never a panic.
//!
//! A [`SortSpec`] is an ordered list of `(column, direction)` pairs.
//! Normalization appends any missing primary-key columns so every spec
//! yields a total order on rows; the canonical serialized form of a
//! normalized spec keys the secondary-index registry.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RivuletError;
use crate::value::{DirValue, Direction, Row, Value};

/// Declared type of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    String,
    Bytes,
    Json,
}

impl ColumnType {
    /// Whether a value is acceptable for this column type.
    ///
    /// `Float` columns accept integer values (numeric widening); everything
    /// else is exact.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ColumnType::Bool, Value::Bool(_)) => true,
            (ColumnType::Int, Value::Int(_)) => true,
            (ColumnType::Float, Value::Float(_) | Value::Int(_)) => true,
            (ColumnType::String, Value::String(_)) => true,
            (ColumnType::Bytes, Value::Bytes(_)) => true,
            (ColumnType::Json, Value::Json(_)) => true,
            _ => false,
        }
    }
}

/// One column declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column_type: ColumnType,
    /// Optional columns may be absent from a row (and then read as `Null`).
    pub optional: bool,
}

impl ColumnSpec {
    pub fn required(column_type: ColumnType) -> ColumnSpec {
        ColumnSpec {
            column_type,
            optional: false,
        }
    }

    pub fn optional(column_type: ColumnType) -> ColumnSpec {
        ColumnSpec {
            column_type,
            optional: true,
        }
    }
}

/// Schema for one table: typed columns plus an ordered primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: BTreeMap<String, ColumnSpec>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Build a schema, validating that every primary-key column is declared.
    pub fn new(
        table_name: impl Into<String>,
        columns: BTreeMap<String, ColumnSpec>,
        primary_key: Vec<String>,
    ) -> Result<TableSchema, RivuletError> {
        let table_name = table_name.into();
        if primary_key.is_empty() {
            return Err(RivuletError::SchemaVersionNotSupported(format!(
                "table {table_name} declares an empty primary key"
            )));
        }
        for pk in &primary_key {
            if !columns.contains_key(pk) {
                return Err(RivuletError::SchemaVersionNotSupported(format!(
                    "table {table_name} primary-key column {pk} is not declared"
                )));
            }
        }
        Ok(TableSchema {
            table_name,
            columns,
            primary_key,
        })
    }

    /// Type-check a row against this schema.
    ///
    /// Every row column must be declared; required columns must be present
    /// and typed; optional columns may be absent or `Null`; primary-key
    /// columns must be present and non-null.
    pub fn validate_row(&self, row: &Row) -> Result<(), RivuletError> {
        for (name, value) in row.columns() {
            let Some(spec) = self.columns.get(name) else {
                return Err(RivuletError::SchemaVersionNotSupported(format!(
                    "table {}: row carries undeclared column {name}",
                    self.table_name
                )));
            };
            if value.is_null() {
                if !spec.optional {
                    return Err(RivuletError::SchemaVersionNotSupported(format!(
                        "table {}: required column {name} is null",
                        self.table_name
                    )));
                }
                continue;
            }
            if !spec.column_type.accepts(value) {
                return Err(RivuletError::SchemaVersionNotSupported(format!(
                    "table {}: column {name} expects {:?}, got {value}",
                    self.table_name, spec.column_type
                )));
            }
        }
        for (name, spec) in &self.columns {
            if !spec.optional && !row.contains_column(name) {
                return Err(RivuletError::SchemaVersionNotSupported(format!(
                    "table {}: required column {name} is missing",
                    self.table_name
                )));
            }
        }
        for pk in &self.primary_key {
            if row.get(pk).is_null() {
                return Err(RivuletError::SchemaVersionNotSupported(format!(
                    "table {}: primary-key column {pk} is null or missing",
                    self.table_name
                )));
            }
        }
        Ok(())
    }

    /// The primary-key ordering (all ascending).
    pub fn pk_sort(&self) -> SortSpec {
        SortSpec(
            self.primary_key
                .iter()
                .map(|c| (c.clone(), Direction::Asc))
                .collect(),
        )
    }
}

// ── SortSpec ───────────────────────────────────────────────────────────────

/// An ordered sequence of `(column, direction)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec(pub Vec<(String, Direction)>);

impl SortSpec {
    pub fn asc(columns: &[&str]) -> SortSpec {
        SortSpec(
            columns
                .iter()
                .map(|c| (c.to_string(), Direction::Asc))
                .collect(),
        )
    }

    /// Normalize against a schema: append each primary-key column (ascending)
    /// that the spec does not already mention, so the order is total.
    pub fn normalized(&self, schema: &TableSchema) -> SortSpec {
        let mut cols = self.0.clone();
        for pk in &schema.primary_key {
            if !cols.iter().any(|(c, _)| c == pk) {
                cols.push((pk.clone(), Direction::Asc));
            }
        }
        SortSpec(cols)
    }

    /// Prepend an ascending column, as required when a constraint column
    /// leads a secondary index (`[(K, asc), …sort…]`). A column the spec
    /// already mentions is lifted to the front instead of duplicated.
    pub fn with_leading(&self, column: &str) -> SortSpec {
        let mut cols: Vec<(String, Direction)> = vec![(column.to_string(), Direction::Asc)];
        for (c, d) in &self.0 {
            if c != column {
                cols.push((c.clone(), *d));
            }
        }
        SortSpec(cols)
    }

    /// Canonical serialized form, used as the secondary-index registry key.
    pub fn canonical(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Compare two rows under this ordering.
    pub fn cmp_rows(&self, a: &Row, b: &Row) -> CmpOrdering {
        for (column, direction) in &self.0 {
            let ord = direction.apply(a.get(column).total_cmp(b.get(column)));
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    }

    /// The direction-tagged key of a row under this ordering.
    pub fn index_key(&self, row: &Row) -> Vec<DirValue> {
        self.0
            .iter()
            .map(|(column, direction)| DirValue::new(row.get(column).clone(), *direction))
            .collect()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
