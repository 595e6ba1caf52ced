//! Key/value persistence boundary.
//!
//! The engine never owns durable storage; it consumes a key/value store
//! through the [`ReadTransaction`] / [`WriteTransaction`] traits, tracks an
//! opaque monotonic [`Cookie`], and replays committed diffs into sources.
//! [`MemStore`] is the in-memory implementation used by the client cache
//! and by tests.
//!
//! Row keys follow the `row/<table>/<pk-digest>` layout; keys outside the
//! `row/` keyspace belong to the embedding client and are ignored by diff
//! replay.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RivuletError;
use crate::value::RowKey;

/// Opaque monotonic token identifying a store version. Compared only for
/// equality; the server defines the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie(pub serde_json::Value);

impl Cookie {
    /// The pre-sync cookie of an empty store.
    pub fn none() -> Cookie {
        Cookie(serde_json::Value::Null)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_null()
    }
}

impl Default for Cookie {
    fn default() -> Self {
        Cookie::none()
    }
}

/// Scan parameters over the ordered keyspace.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub prefix: Option<String>,
    pub start: Option<String>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

pub trait ReadTransaction {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn has(&self, key: &str) -> bool;
    fn scan(&self, options: ScanOptions) -> Vec<(String, serde_json::Value)>;
}

pub trait WriteTransaction: ReadTransaction {
    fn put(&mut self, key: &str, value: serde_json::Value);
    fn del(&mut self, key: &str);
}

// ── Diffs ──────────────────────────────────────────────────────────────────

/// One key's transition in a committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub key: String,
    pub old: Option<serde_json::Value>,
    pub new: Option<serde_json::Value>,
}

/// Receives committed key/value changes for replay into sources.
pub trait DiffSink {
    fn entry(&mut self, entry: &DiffEntry) -> Result<(), RivuletError>;
}

/// Feed a committed diff into a sink, entry by entry, stopping at the
/// first error.
pub fn replay_into(diff: &[DiffEntry], sink: &mut dyn DiffSink) -> Result<(), RivuletError> {
    for entry in diff {
        sink.entry(entry)?;
    }
    Ok(())
}

// ── MemStore ───────────────────────────────────────────────────────────────

/// In-memory ordered key/value store with cookie tracking.
#[derive(Default)]
pub struct MemStore {
    entries: BTreeMap<String, serde_json::Value>,
    cookie: Cookie,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.cookie = cookie;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn read(&self) -> ReadTx<'_> {
        ReadTx { store: self }
    }

    pub fn write(&mut self) -> WriteTx<'_> {
        WriteTx {
            pending: BTreeMap::new(),
            store: self,
        }
    }
}

/// Read transaction over a store snapshot.
pub struct ReadTx<'a> {
    store: &'a MemStore,
}

fn scan_map(
    entries: &BTreeMap<String, serde_json::Value>,
    options: &ScanOptions,
) -> Vec<(String, serde_json::Value)> {
    let mut hits: Vec<(String, serde_json::Value)> = entries
        .iter()
        .filter(|(k, _)| {
            options
                .prefix
                .as_ref()
                .is_none_or(|p| k.starts_with(p.as_str()))
        })
        .filter(|(k, _)| {
            options
                .start
                .as_ref()
                .is_none_or(|s| k.as_str() >= s.as_str())
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if options.reverse {
        hits.reverse();
    }
    if let Some(limit) = options.limit {
        hits.truncate(limit);
    }
    hits
}

impl ReadTransaction for ReadTx<'_> {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.store.entries.get(key).cloned()
    }

    fn has(&self, key: &str) -> bool {
        self.store.entries.contains_key(key)
    }

    fn scan(&self, options: ScanOptions) -> Vec<(String, serde_json::Value)> {
        scan_map(&self.store.entries, &options)
    }
}

/// Write transaction: pending puts/dels layered over the store, visible to
/// its own reads, applied on [`commit`](WriteTx::commit).
pub struct WriteTx<'a> {
    /// `Some(value)` = pending put, `None` = pending del.
    pending: BTreeMap<String, Option<serde_json::Value>>,
    store: &'a mut MemStore,
}

impl WriteTx<'_> {
    /// Apply pending changes and return the diff of keys that actually
    /// transitioned.
    pub fn commit(self) -> Vec<DiffEntry> {
        let mut diff = Vec::new();
        for (key, pending) in self.pending {
            let old = self.store.entries.get(&key).cloned();
            match pending {
                Some(new) => {
                    if old.as_ref() != Some(&new) {
                        self.store.entries.insert(key.clone(), new.clone());
                        diff.push(DiffEntry {
                            key,
                            old,
                            new: Some(new),
                        });
                    }
                }
                None => {
                    if old.is_some() {
                        self.store.entries.remove(&key);
                        diff.push(DiffEntry {
                            key,
                            old,
                            new: None,
                        });
                    }
                }
            }
        }
        diff
    }
}

impl ReadTransaction for WriteTx<'_> {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        match self.pending.get(key) {
            Some(pending) => pending.clone(),
            None => self.store.entries.get(key).cloned(),
        }
    }

    fn has(&self, key: &str) -> bool {
        match self.pending.get(key) {
            Some(pending) => pending.is_some(),
            None => self.store.entries.contains_key(key),
        }
    }

    fn scan(&self, options: ScanOptions) -> Vec<(String, serde_json::Value)> {
        // Overlay pending writes onto the stored entries.
        let mut merged = self.store.entries.clone();
        for (key, pending) in &self.pending {
            match pending {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        scan_map(&merged, &options)
    }
}

impl WriteTransaction for WriteTx<'_> {
    fn put(&mut self, key: &str, value: serde_json::Value) {
        self.pending.insert(key.to_string(), Some(value));
    }

    fn del(&mut self, key: &str) {
        self.pending.insert(key.to_string(), None);
    }
}

// ── Row key layout ─────────────────────────────────────────────────────────

/// Build the storage key for one row: `row/<table>/<pk-digest>`.
pub fn row_key(table: &str, key: &RowKey) -> String {
    format!("row/{table}/{:016x}", crate::ivm::row_id::key_digest(key))
}

/// Extract the table name from a row key; `None` for keys outside the
/// `row/` keyspace.
pub fn parse_row_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("row/")?;
    let slash = rest.rfind('/')?;
    Some(&rest[..slash])
}
