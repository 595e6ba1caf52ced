//! State and row construction shared by the inner and left join operators.

use std::collections::BTreeMap;

use crate::ivm::row_id;
use crate::value::{Row, RowKey, Value};

/// Static parameters of a join.
#[derive(Debug, Clone)]
pub struct JoinArgs {
    pub a_table: String,
    pub b_table: String,
    pub a_join_col: String,
    pub b_join_col: String,
    pub a_pk_cols: Vec<String>,
    pub b_pk_cols: Vec<String>,
    pub b_alias: String,
}

/// One side's match index: join value → per-PK `(row, multiplicity)`.
///
/// Entries whose multiplicity reaches zero are removed; join-column nulls
/// are never stored (they can never match).
#[derive(Default)]
pub struct SideIndex {
    entries: BTreeMap<Value, BTreeMap<RowKey, (Row, i64)>>,
}

impl SideIndex {
    pub fn new() -> SideIndex {
        SideIndex::default()
    }

    /// Current matches for a join value. A null join value matches nothing.
    pub fn matches(&self, join_value: &Value) -> Vec<(Row, i64)> {
        if join_value.is_null() {
            return Vec::new();
        }
        self.entries
            .get(join_value)
            .map(|per_pk| per_pk.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a signed multiplicity for one row.
    pub fn apply(&mut self, join_value: &Value, pk: RowKey, row: Row, multiplicity: i64) {
        if join_value.is_null() {
            return;
        }
        let per_pk = self.entries.entry(join_value.clone()).or_default();
        let entry = per_pk.entry(pk.clone()).or_insert_with(|| (row, 0));
        entry.1 += multiplicity;
        if entry.1 <= 0 {
            per_pk.remove(&pk);
        }
        if self.entries.get(join_value).is_some_and(|m| m.is_empty()) {
            self.entries.remove(join_value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the synthetic join-result row for an `(a, b?)` pair:
/// `{ id, <a columns…>, <b_alias>: b_row_or_null }`.
pub fn join_result(args: &JoinArgs, a: &Row, b: Option<&Row>) -> Row {
    let a_key = a.key(&args.a_pk_cols);
    let b_key = b.map(|b| b.key(&args.b_pk_cols));
    let id = row_id::join_row_id(&a_key, b_key.as_ref());

    let mut columns: BTreeMap<String, Value> = a
        .columns()
        .map(|(c, v)| (c.clone(), v.clone()))
        .collect();
    columns.insert("id".to_string(), Value::String(id));
    columns.insert(
        args.b_alias.clone(),
        match b {
            Some(b_row) => Value::Json(b_row.to_json()),
            None => Value::Null,
        },
    );
    Row::new(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivm::operators::test_helpers::*;

    #[test]
    fn test_side_index_apply_and_drop_at_zero() {
        let mut index = SideIndex::new();
        let row = b_row("b1", "k");
        let pk = row.key(&["id".to_string()]);
        index.apply(&Value::from("k"), pk.clone(), row.clone(), 1);
        assert_eq!(index.matches(&Value::from("k")).len(), 1);

        index.apply(&Value::from("k"), pk, row, -1);
        assert!(index.matches(&Value::from("k")).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_null_join_value_never_stored_or_matched() {
        let mut index = SideIndex::new();
        let row = b_row("b1", "k");
        let pk = row.key(&["id".to_string()]);
        index.apply(&Value::Null, pk, row, 1);
        assert!(index.is_empty());
        assert!(index.matches(&Value::Null).is_empty());
    }

    #[test]
    fn test_join_result_shape() {
        let args = join_args();
        let a = a_row("a1", "k");
        let b = b_row("b1", "k");

        let matched = join_result(&args, &a, Some(&b));
        assert!(!matched.get("id").is_null());
        assert_eq!(matched.get("far_id"), a.get("far_id"));
        assert!(matches!(matched.get("far"), Value::Json(_)));

        let orphan = join_result(&args, &a, None);
        assert!(orphan.get("far").is_null());
        assert_ne!(matched.get("id"), orphan.get("id"));
    }

    #[test]
    fn test_join_result_id_stable() {
        let args = join_args();
        let a = a_row("a1", "k");
        let b = b_row("b1", "k");
        let r1 = join_result(&args, &a, Some(&b));
        let r2 = join_result(&args, &a, Some(&b));
        assert_eq!(r1.get("id"), r2.get("id"));
    }
}
