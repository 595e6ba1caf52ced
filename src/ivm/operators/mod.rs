//! Dataflow operators.
//!
//! Two tiers cooperate:
//!
//! - **Stream operators** sit directly on source connections and transform
//!   [`Change`]s synchronously during a push: [`filter`], [`constrain`],
//!   [`start_at`], [`fan_out`]. They implement [`Output`] and forward to a
//!   downstream output.
//! - **Delta operators** consume Z-set deltas once per version:
//!   [`join`] (inner), [`left_join`], [`reduce`]. Their inputs are
//!   [`DeltaBuffer`]s filled by the stream tier; the engine drains and steps
//!   them in topological order at version commit.

pub mod constrain;
pub mod fan_out;
pub mod filter;
pub mod join;
pub mod join_common;
pub mod left_join;
pub mod reduce;
pub mod start_at;

#[cfg(test)]
pub mod test_helpers;

use std::collections::BTreeMap;

use crate::error::RivuletError;
use crate::ivm::stream::{Change, Delta, Output, change_to_deltas};
use crate::value::Row;

/// Bridge from the stream tier to the delta tier: accumulates pushed
/// changes as Z-set deltas until the graph drains them at version commit.
#[derive(Default)]
pub struct DeltaBuffer {
    pending: Vec<Delta>,
}

impl DeltaBuffer {
    pub fn new() -> DeltaBuffer {
        DeltaBuffer::default()
    }

    pub fn drain(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.pending)
    }

    /// Append already-lifted deltas (operator stage outputs).
    pub fn extend(&mut self, deltas: Vec<Delta>) {
        self.pending.extend(deltas);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Output for DeltaBuffer {
    fn push(&mut self, change: Change) -> Result<(), RivuletError> {
        self.pending.extend(change_to_deltas(&change));
        Ok(())
    }
}

/// Collapse a delta batch: sum multiplicities of equal rows, drop net
/// zeros, and order retractions before assertions so a downstream view
/// never observes a transient duplicate.
pub fn consolidate(deltas: Vec<Delta>) -> Vec<Delta> {
    let mut grouped: BTreeMap<String, (Row, i64)> = BTreeMap::new();
    for delta in deltas {
        let key = delta.row.to_json().to_string();
        let entry = grouped.entry(key).or_insert_with(|| (delta.row.clone(), 0));
        entry.1 += delta.multiplicity;
    }
    let mut retractions = Vec::new();
    let mut assertions = Vec::new();
    for (_, (row, multiplicity)) in grouped {
        if multiplicity < 0 {
            retractions.push(Delta { row, multiplicity });
        } else if multiplicity > 0 {
            assertions.push(Delta { row, multiplicity });
        }
    }
    retractions.extend(assertions);
    retractions
}
