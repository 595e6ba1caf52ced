//! Shared helpers for operator unit tests.
//!
//! Row builders, a recording change sink, and canonical join arguments.
//! All helpers are `#[cfg(test)]` only.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RivuletError;
use crate::ivm::operators::join_common::JoinArgs;
use crate::ivm::stream::{Change, Delta, Output};
use crate::value::{Row, Value};

// ── Row builders ────────────────────────────────────────────────────────

/// `{ id, value }` row.
pub fn int_row(id: &str, value: i64) -> Row {
    Row::from_pairs([("id", Value::from(id)), ("value", Value::Int(value))])
}

/// Left-side join row: `{ id, far_id }`.
pub fn a_row(id: &str, far_id: &str) -> Row {
    Row::from_pairs([("id", Value::from(id)), ("far_id", Value::from(far_id))])
}

/// Left-side join row with a null join column.
pub fn a_row_null_key(id: &str) -> Row {
    Row::from_pairs([("id", Value::from(id)), ("far_id", Value::Null)])
}

/// Right-side join row: `{ id, key }` where `key` doubles as the join
/// column via `b_join_col = "id"` in [`join_args`] — the row's own id.
pub fn b_row(id: &str, _key: &str) -> Row {
    Row::from_pairs([("id", Value::from(id))])
}

// ── Join arguments ──────────────────────────────────────────────────────

/// Canonical join: `foo.far_id → far.id`, alias `far`.
pub fn join_args() -> JoinArgs {
    JoinArgs {
        a_table: "foo".to_string(),
        b_table: "far".to_string(),
        a_join_col: "far_id".to_string(),
        b_join_col: "id".to_string(),
        a_pk_cols: vec!["id".to_string()],
        b_pk_cols: vec!["id".to_string()],
        b_alias: "far".to_string(),
    }
}

// ── Recording sink ──────────────────────────────────────────────────────

#[derive(Default)]
struct SinkInner {
    seen: Vec<Change>,
}

impl Output for SinkInner {
    fn push(&mut self, change: Change) -> Result<(), RivuletError> {
        self.seen.push(change);
        Ok(())
    }
}

/// An [`Output`] that records every pushed change.
pub struct ChangeSink {
    inner: Rc<RefCell<SinkInner>>,
}

impl ChangeSink {
    pub fn new() -> ChangeSink {
        ChangeSink {
            inner: Rc::new(RefCell::new(SinkInner::default())),
        }
    }

    pub fn handle(&self) -> Rc<RefCell<dyn Output>> {
        self.inner.clone()
    }

    pub fn take(&self) -> Vec<Change> {
        std::mem::take(&mut self.inner.borrow_mut().seen)
    }
}

// ── Delta assertions ────────────────────────────────────────────────────

/// Net multiplicity of a row in a delta batch.
pub fn net_multiplicity(deltas: &[Delta], row: &Row) -> i64 {
    deltas
        .iter()
        .filter(|d| &d.row == row)
        .map(|d| d.multiplicity)
        .sum()
}
