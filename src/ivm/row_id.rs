//! xxHash-based row ID generation.
//!
//! Row IDs are deterministic 64-bit digests used to identify synthetic rows
//! (join results, group reductions) across rebuilds. The formula is fixed:
//! stable seed, `\x1E` record separator between parts, and a `\x00NULL\x00`
//! sentinel so a missing part never collides with the literal string
//! `"NULL"`.

use xxhash_rust::xxh64;

use crate::value::RowKey;

/// Fixed seed for deterministic hashing.
const SEED: u64 = 0x517cc1b727220a95;

/// Digest a single text input.
pub fn digest(input: &str) -> u64 {
    xxh64::xxh64(input.as_bytes(), SEED)
}

/// Digest multiple parts with record separation. `None` parts use the NULL
/// sentinel.
pub fn digest_multi<'a, I>(parts: I) -> u64
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut combined = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            combined.push('\x1E'); // record separator
        }
        match part {
            Some(val) => combined.push_str(val),
            None => combined.push_str("\x00NULL\x00"),
        }
    }
    xxh64::xxh64(combined.as_bytes(), SEED)
}

/// Digest a primary-key tuple.
pub fn key_digest(key: &RowKey) -> u64 {
    let parts: Vec<String> = key.0.iter().map(|v| v.digest_text()).collect();
    digest_multi(parts.iter().map(|p| Some(p.as_str())))
}

/// Deterministic join-result id for an `(a_pk, b_pk)` pair.
///
/// Stable across rebuilds and unique per pair; the right side may be absent
/// (left-join orphan rows).
pub fn join_row_id(a_key: &RowKey, b_key: Option<&RowKey>) -> String {
    let a = key_digest(a_key);
    let b = match b_key {
        Some(k) => key_digest(k),
        None => digest_multi([None]),
    };
    format!("{a:016x}{b:016x}")
}
