//! Row and value model.
//!
//! Rows travel the engine as shared, logically-immutable maps from column
//! name to [`Value`]. The engine is single-threaded (see the concurrency
//! model in `lib.rs`), so sharing is reference counting via `Rc`; cloning a
//! [`Row`] never copies column data.
//!
//! [`Value`] carries a total order so any tuple of values can key an ordered
//! index: `Null` sorts below every non-null value, numerics compare
//! numerically across the int/float divide, and `NaN` sorts above every
//! other float (and equal to itself).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// A single typed cell value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

/// Rank used to order values of different types relative to each other.
/// Int and Float share a rank and compare numerically.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Bytes(_) => 4,
        Value::Json(_) => 5,
    }
}

/// Total order over floats: NaN sorts above every other value and equal
/// to itself.
fn cmp_f64(a: f64, b: f64) -> CmpOrdering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => CmpOrdering::Equal,
        (true, false) => CmpOrdering::Greater,
        (false, true) => CmpOrdering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(CmpOrdering::Equal),
    }
}

impl Value {
    /// Total-order comparison across all value types.
    pub fn total_cmp(&self, other: &Value) -> CmpOrdering {
        let (ra, rb) = (type_rank(self), type_rank(other));
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Value::Null, Value::Null) => CmpOrdering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Float(b)) => cmp_f64(*a as f64, *b),
            (Value::Float(a), Value::Int(b)) => cmp_f64(*a, *b as f64),
            (Value::Float(a), Value::Float(b)) => cmp_f64(*a, *b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            // Json values carry no native order; compare their canonical
            // serialization so the order is at least deterministic.
            (Value::Json(a), Value::Json(b)) => {
                let sa = serde_json::to_string(a).unwrap_or_default();
                let sb = serde_json::to_string(b).unwrap_or_default();
                sa.cmp(&sb)
            }
            _ => CmpOrdering::Equal,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a JSON document value into an engine value.
    ///
    /// Whole numbers land as `Int`, other numbers as `Float`; arrays and
    /// objects stay structured under the `Json` variant.
    pub fn from_json(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            other => Value::Json(other),
        }
    }

    /// Convert back to a JSON document value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::from(b.clone()),
            Value::Json(j) => j.clone(),
        }
    }

    /// Text rendering used for key digests. Distinct from `Display` in that
    /// `Null` uses the digest sentinel.
    pub fn digest_text(&self) -> String {
        match self {
            Value::Null => "\x00NULL\x00".to_string(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.total_cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

// ── Row ────────────────────────────────────────────────────────────────────

static NULL_VALUE: Value = Value::Null;

/// A shared, immutable row. Cloning bumps a reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(Rc<BTreeMap<String, Value>>);

impl Row {
    pub fn new(columns: BTreeMap<String, Value>) -> Row {
        Row(Rc::new(columns))
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, C, V>(pairs: I) -> Row
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: Into<Value>,
    {
        Row(Rc::new(
            pairs
                .into_iter()
                .map(|(c, v)| (c.into(), v.into()))
                .collect(),
        ))
    }

    /// Read a column. Unspecified columns read as `Null`.
    pub fn get(&self, column: &str) -> &Value {
        self.0.get(column).unwrap_or(&NULL_VALUE)
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy-on-write update: returns a new row with `column` set.
    pub fn with(&self, column: impl Into<String>, value: impl Into<Value>) -> Row {
        let mut map = (*self.0).clone();
        map.insert(column.into(), value.into());
        Row(Rc::new(map))
    }

    /// The primary-key tuple of this row under the given key columns.
    pub fn key(&self, pk_columns: &[String]) -> RowKey {
        RowKey(pk_columns.iter().map(|c| self.get(c).clone()).collect())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Build a row from a JSON object. Non-objects produce `None`.
    pub fn from_json(v: &serde_json::Value) -> Option<Row> {
        let obj = v.as_object()?;
        Some(Row(Rc::new(
            obj.iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v.clone())))
                .collect(),
        )))
    }
}

/// The primary-key tuple identifying a row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowKey(pub Vec<Value>);

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

// ── Direction-aware values for index keys ──────────────────────────────────

/// Sort direction for one ordering column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn apply(&self, ord: CmpOrdering) -> CmpOrdering {
        match self {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }
}

/// A value tagged with its column's sort direction, so a plain `Vec<DirValue>`
/// keys a `BTreeMap` in the index's declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirValue {
    pub value: Value,
    pub direction: Direction,
}

impl DirValue {
    pub fn new(value: Value, direction: Direction) -> DirValue {
        DirValue { value, direction }
    }
}

impl PartialOrd for DirValue {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DirValue {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.direction.apply(self.value.total_cmp(&other.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Value ordering ──────────────────────────────────────────────

    #[test]
    fn test_null_sorts_below_everything() {
        let non_nulls = [
            Value::Bool(false),
            Value::Int(i64::MIN),
            Value::Float(f64::NEG_INFINITY),
            Value::String(String::new()),
            Value::Bytes(vec![]),
        ];
        for v in &non_nulls {
            assert_eq!(Value::Null.total_cmp(v), CmpOrdering::Less, "null vs {v:?}");
            assert_eq!(v.total_cmp(&Value::Null), CmpOrdering::Greater);
        }
        assert_eq!(Value::Null.total_cmp(&Value::Null), CmpOrdering::Equal);
    }

    #[test]
    fn test_numeric_cross_type_comparison() {
        assert_eq!(Value::Int(1).total_cmp(&Value::Float(1.0)), CmpOrdering::Equal);
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(1.5)), CmpOrdering::Greater);
        assert_eq!(Value::Float(0.5).total_cmp(&Value::Int(1)), CmpOrdering::Less);
    }

    #[test]
    fn test_nan_total_order() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan.total_cmp(&nan), CmpOrdering::Equal);
        assert_eq!(nan.total_cmp(&Value::Float(f64::INFINITY)), CmpOrdering::Greater);
        assert_eq!(Value::Float(0.0).total_cmp(&nan), CmpOrdering::Less);
    }

    #[test]
    fn test_string_code_point_order() {
        assert_eq!(
            Value::from("a").total_cmp(&Value::from("b")),
            CmpOrdering::Less
        );
        // "Z" < "a" in code-point order
        assert_eq!(
            Value::from("Z").total_cmp(&Value::from("a")),
            CmpOrdering::Less
        );
    }

    #[test]
    fn test_json_order_is_deterministic() {
        let a = Value::Json(serde_json::json!({"x": 1}));
        let b = Value::Json(serde_json::json!({"x": 2}));
        let first = a.total_cmp(&b);
        assert_eq!(a.total_cmp(&b), first);
        assert_ne!(first, CmpOrdering::Equal);
    }

    // ── JSON round-trip ─────────────────────────────────────────────

    #[test]
    fn test_from_json_number_variants() {
        assert_eq!(Value::from_json(serde_json::json!(7)), Value::Int(7));
        assert_eq!(Value::from_json(serde_json::json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from_json(serde_json::json!(null)), Value::Null);
        assert!(matches!(
            Value::from_json(serde_json::json!([1, 2])),
            Value::Json(_)
        ));
    }

    #[test]
    fn test_row_json_round_trip() {
        let row = Row::from_pairs([("id", Value::from("a")), ("value", Value::Int(3))]);
        let json = row.to_json();
        let back = Row::from_json(&json).unwrap();
        assert_eq!(row, back);
    }

    // ── Row ─────────────────────────────────────────────────────────

    #[test]
    fn test_missing_column_reads_null() {
        let row = Row::from_pairs([("id", 1i64)]);
        assert!(row.get("missing").is_null());
        assert!(!row.contains_column("missing"));
    }

    #[test]
    fn test_row_key_extraction() {
        let row = Row::from_pairs([("id", Value::from("a")), ("n", Value::Int(1))]);
        let key = row.key(&["id".to_string()]);
        assert_eq!(key, RowKey(vec![Value::from("a")]));
    }

    #[test]
    fn test_row_with_does_not_mutate_original() {
        let row = Row::from_pairs([("id", 1i64)]);
        let updated = row.with("id", 2i64);
        assert_eq!(row.get("id"), &Value::Int(1));
        assert_eq!(updated.get("id"), &Value::Int(2));
    }

    #[test]
    fn test_row_clone_is_shallow() {
        let row = Row::from_pairs([("id", 1i64)]);
        let clone = row.clone();
        assert!(Rc::ptr_eq(&row.0, &clone.0));
    }

    // ── DirValue ────────────────────────────────────────────────────

    #[test]
    fn test_dir_value_desc_inverts() {
        let lo = DirValue::new(Value::Int(1), Direction::Desc);
        let hi = DirValue::new(Value::Int(2), Direction::Desc);
        assert!(hi < lo);

        let lo_asc = DirValue::new(Value::Int(1), Direction::Asc);
        let hi_asc = DirValue::new(Value::Int(2), Direction::Asc);
        assert!(lo_asc < hi_asc);
    }

    #[test]
    fn test_dir_value_vec_lexicographic() {
        let a = vec![
            DirValue::new(Value::from("k"), Direction::Asc),
            DirValue::new(Value::Int(5), Direction::Desc),
        ];
        let b = vec![
            DirValue::new(Value::from("k"), Direction::Asc),
            DirValue::new(Value::Int(3), Direction::Desc),
        ];
        // Same first column; second column descending, so 5 sorts first.
        assert!(a < b);
    }
}
