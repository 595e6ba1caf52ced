//! Reduce / group-by operator.
//!
//! Groups input rows by a key function and maintains one reduction output
//! per non-empty group. The input index keeps `(value, multiplicity)` per
//! value identity; identities at zero multiplicity are dropped, and empty
//! groups are dropped with them. Each touched group re-runs the reducer
//! over the flat expansion of its multiset and emits a retract/assert pair
//! for the group's output — elided when the new reduction is deeply equal
//! to the previous one.
//!
//! The reducer must be a pure function of the multiset. A reducer error
//! propagates out of the version step with no partial reduction emitted.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::RivuletError;
use crate::ivm::stream::Delta;
use crate::value::{Row, Value};

pub type GroupKeyFn = Box<dyn Fn(&Row) -> Value>;
pub type IdentityFn = Box<dyn Fn(&Row) -> Value>;
pub type ReducerFn = Box<dyn Fn(&mut dyn Iterator<Item = &Row>) -> Result<Row, RivuletError>>;

pub struct Reduce {
    group_key: GroupKeyFn,
    identity: IdentityFn,
    reducer: ReducerFn,
    /// group key → value identity → (value, multiplicity > 0).
    in_index: BTreeMap<Value, BTreeMap<Value, (Row, i64)>>,
    /// group key → last emitted reduction.
    out_index: BTreeMap<Value, Row>,
}

impl Reduce {
    pub fn new(group_key: GroupKeyFn, identity: IdentityFn, reducer: ReducerFn) -> Reduce {
        Reduce {
            group_key,
            identity,
            reducer,
            in_index: BTreeMap::new(),
            out_index: BTreeMap::new(),
        }
    }

    pub fn group_count(&self) -> usize {
        self.in_index.len()
    }

    /// Consume one version's input deltas.
    pub fn step(&mut self, deltas: Vec<Delta>) -> Result<Vec<Delta>, RivuletError> {
        let mut touched: BTreeSet<Value> = BTreeSet::new();

        for delta in deltas {
            let key = (self.group_key)(&delta.row);
            let identity = (self.identity)(&delta.row);
            let group = self.in_index.entry(key.clone()).or_default();
            let entry = group
                .entry(identity.clone())
                .or_insert_with(|| (delta.row.clone(), 0));
            entry.1 += delta.multiplicity;
            if entry.1 <= 0 {
                group.remove(&identity);
            }
            if group.is_empty() {
                self.in_index.remove(&key);
            }
            touched.insert(key);
        }

        let mut out = Vec::new();
        for key in touched {
            let previous = self.out_index.get(&key).cloned();
            match self.in_index.get(&key) {
                None => {
                    if let Some(old) = previous {
                        out.push(Delta::retract(old));
                        self.out_index.remove(&key);
                    }
                }
                Some(group) => {
                    // Flat expansion of the group's multiset.
                    let expanded: Vec<&Row> = group
                        .values()
                        .flat_map(|(row, multiplicity)| {
                            std::iter::repeat_n(row, *multiplicity as usize)
                        })
                        .collect();
                    let reduction = (self.reducer)(&mut expanded.into_iter())?;

                    match previous {
                        Some(old) if old == reduction => {} // unchanged: elide
                        Some(old) => {
                            out.push(Delta::retract(old));
                            out.push(Delta::assert(reduction.clone()));
                            self.out_index.insert(key, reduction);
                        }
                        None => {
                            out.push(Delta::assert(reduction.clone()));
                            self.out_index.insert(key, reduction);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

/// A sum reducer over one integer column, keyed by another column.
///
/// The canonical group-by shape: output rows are `{ key, total }`.
pub fn sum_by(key_column: &str, value_column: &str) -> Reduce {
    let key_col = key_column.to_string();
    let key_col_ident = key_column.to_string();
    let key_col_reduce = key_column.to_string();
    let value_col_ident = value_column.to_string();
    let value_col = value_column.to_string();
    Reduce::new(
        Box::new(move |row| row.get(&key_col).clone()),
        Box::new(move |row| {
            // Identity distinguishes contributions within a group.
            Value::String(format!(
                "{}\x1E{}",
                row.get(&key_col_ident),
                row.get(&value_col_ident)
            ))
        }),
        Box::new(move |rows| {
            let mut total: i64 = 0;
            let mut key = Value::Null;
            for row in rows {
                key = row.get(&key_col_reduce).clone();
                total += match row.get(&value_col) {
                    Value::Int(i) => *i,
                    _ => 0,
                };
            }
            Ok(Row::from_pairs([
                ("key".to_string(), key),
                ("total".to_string(), Value::Int(total)),
            ]))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ivm::operators::test_helpers::*;

    fn kv(key: &str, v: i64) -> Row {
        Row::from_pairs([("k", Value::from(key)), ("v", Value::Int(v))])
    }

    fn sum_reduce() -> Reduce {
        sum_by("k", "v")
    }

    fn out_row(key: &str, total: i64) -> Row {
        Row::from_pairs([("key", Value::from(key)), ("total", Value::Int(total))])
    }

    #[test]
    fn test_groups_accumulate() {
        let mut reduce = sum_reduce();
        let out = reduce
            .step(vec![
                Delta::assert(kv("a", 1)),
                Delta::assert(kv("a", 2)),
                Delta::assert(kv("b", 3)),
            ])
            .unwrap();
        assert_eq!(net_multiplicity(&out, &out_row("a", 3)), 1);
        assert_eq!(net_multiplicity(&out, &out_row("b", 3)), 1);
        assert_eq!(reduce.group_count(), 2);
    }

    #[test]
    fn test_retraction_reemits_group() {
        let mut reduce = sum_reduce();
        reduce
            .step(vec![
                Delta::assert(kv("a", 1)),
                Delta::assert(kv("a", 2)),
                Delta::assert(kv("b", 3)),
            ])
            .unwrap();

        let out = reduce.step(vec![Delta::retract(kv("a", 2))]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Delta::retract(out_row("a", 3)));
        assert_eq!(out[1], Delta::assert(out_row("a", 1)));
    }

    #[test]
    fn test_empty_group_emits_remove_only() {
        let mut reduce = sum_reduce();
        reduce
            .step(vec![Delta::assert(kv("a", 1)), Delta::assert(kv("b", 3))])
            .unwrap();

        let out = reduce.step(vec![Delta::retract(kv("a", 1))]).unwrap();
        assert_eq!(out, vec![Delta::retract(out_row("a", 1))]);
        assert_eq!(reduce.group_count(), 1);
    }

    #[test]
    fn test_unchanged_reduction_elided() {
        let mut reduce = sum_reduce();
        reduce.step(vec![Delta::assert(kv("a", 5))]).unwrap();

        // +3 then −3 in one version nets to the same multiset; add/remove
        // of a zero contribution also reduces identically.
        let out = reduce
            .step(vec![Delta::assert(kv("a", 0))])
            .unwrap();
        assert!(out.is_empty(), "sum unchanged, retract/assert elided: {out:?}");
    }

    #[test]
    fn test_untouched_groups_stay_silent() {
        let mut reduce = sum_reduce();
        reduce
            .step(vec![Delta::assert(kv("a", 1)), Delta::assert(kv("b", 2))])
            .unwrap();
        let out = reduce.step(vec![Delta::assert(kv("b", 1))]).unwrap();
        assert!(out.iter().all(|d| d.row.get("key") == &Value::from("b")));
    }

    #[test]
    fn test_reducer_error_propagates() {
        let mut reduce = Reduce::new(
            Box::new(|row| row.get("k").clone()),
            Box::new(|row| row.get("v").clone()),
            Box::new(|_rows| Err(RivuletError::Internal("reducer failure".into()))),
        );
        let err = reduce.step(vec![Delta::assert(kv("a", 1))]).unwrap_err();
        assert!(err.to_string().contains("reducer failure"));
    }

    #[test]
    fn test_output_contains_one_entry_per_nonempty_group() {
        let mut reduce = sum_reduce();
        reduce
            .step(vec![
                Delta::assert(kv("a", 1)),
                Delta::assert(kv("a", 2)),
                Delta::assert(kv("b", 3)),
            ])
            .unwrap();
        reduce.step(vec![Delta::retract(kv("a", 1))]).unwrap();
        reduce.step(vec![Delta::retract(kv("a", 2))]).unwrap();
        assert_eq!(reduce.group_count(), 1);
    }
}
