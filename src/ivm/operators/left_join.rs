//! Left join operator.
//!
//! LEFT JOIN = inner join + orphan maintenance for non-matching left rows.
//! Every left row owns exactly one of: a set of real match results, or a
//! single orphan result with a null right side. `a_matches` tracks, per
//! left primary key, the most recent join result and the running match
//! multiplicity; transitions of that multiplicity through zero drive orphan
//! retract/assert pairs.
//!
//! The stored join-result reference is refreshed whenever a right-side
//! change alters the current match, so a later retraction always carries
//! the current row rather than a stale one.

use std::collections::BTreeMap;

use crate::ivm::operators::consolidate;
use crate::ivm::operators::join_common::{JoinArgs, SideIndex, join_result};
use crate::ivm::stream::Delta;
use crate::value::{Row, RowKey};

pub struct LeftJoin {
    args: JoinArgs,
    index_a: SideIndex,
    index_b: SideIndex,
    /// Per left PK: the last emitted join result and the current match
    /// multiplicity (0 means the orphan result is live).
    a_matches: BTreeMap<RowKey, (Row, i64)>,
}

impl LeftJoin {
    pub fn new(args: JoinArgs) -> LeftJoin {
        LeftJoin {
            args,
            index_a: SideIndex::new(),
            index_b: SideIndex::new(),
            a_matches: BTreeMap::new(),
        }
    }

    pub fn args(&self) -> &JoinArgs {
        &self.args
    }

    /// Consume one version's `(Δa, Δb)` pair; Δb drains first.
    pub fn step(&mut self, delta_a: Vec<Delta>, delta_b: Vec<Delta>) -> Vec<Delta> {
        let mut out = Vec::new();

        for d in delta_b {
            self.apply_b(&mut out, d);
        }
        for d in delta_a {
            self.apply_a(&mut out, d);
        }

        consolidate(out)
    }

    fn apply_b(&mut self, out: &mut Vec<Delta>, d: Delta) {
        let join_value = d.row.get(&self.args.b_join_col).clone();
        if join_value.is_null() {
            return;
        }
        let b_pk = d.row.key(&self.args.b_pk_cols);

        if d.multiplicity < 0 {
            // Retraction: update the index first so stored-reference
            // refreshes see only surviving matches.
            self.index_b
                .apply(&join_value, b_pk, d.row.clone(), d.multiplicity);

            for (a_row, m_a) in self.index_a.matches(&join_value) {
                out.push(Delta {
                    row: join_result(&self.args, &a_row, Some(&d.row)),
                    multiplicity: m_a * d.multiplicity,
                });
                let a_pk = a_row.key(&self.args.a_pk_cols);
                let Some(entry) = self.a_matches.get_mut(&a_pk) else {
                    continue;
                };
                let old = entry.1;
                let new = old + m_a * d.multiplicity;
                if old > 0 && new == 0 {
                    // Last match gone: re-assert the orphan.
                    let orphan = join_result(&self.args, &a_row, None);
                    out.push(Delta::assert(orphan.clone()));
                    *entry = (orphan, 0);
                } else {
                    entry.1 = new;
                    if let Some((b_remaining, _)) =
                        self.index_b.matches(&join_value).first()
                    {
                        entry.0 = join_result(&self.args, &a_row, Some(b_remaining));
                    }
                }
            }
        } else {
            for (a_row, m_a) in self.index_a.matches(&join_value) {
                let result = join_result(&self.args, &a_row, Some(&d.row));
                out.push(Delta {
                    row: result.clone(),
                    multiplicity: m_a * d.multiplicity,
                });
                let a_pk = a_row.key(&self.args.a_pk_cols);
                let Some(entry) = self.a_matches.get_mut(&a_pk) else {
                    continue;
                };
                let old = entry.1;
                let new = old + m_a * d.multiplicity;
                if old == 0 && new > 0 {
                    // First match arrived: retract the orphan.
                    out.push(Delta::retract(entry.0.clone()));
                }
                *entry = (result, new);
            }
            self.index_b.apply(&join_value, b_pk, d.row, d.multiplicity);
        }
    }

    fn apply_a(&mut self, out: &mut Vec<Delta>, d: Delta) {
        let join_value = d.row.get(&self.args.a_join_col).clone();
        let a_pk = d.row.key(&self.args.a_pk_cols);

        if d.multiplicity > 0 {
            let matches = self.index_b.matches(&join_value);
            if matches.is_empty() {
                let orphan = join_result(&self.args, &d.row, None);
                out.push(Delta {
                    row: orphan.clone(),
                    multiplicity: d.multiplicity,
                });
                self.a_matches.insert(a_pk.clone(), (orphan, 0));
            } else {
                let mut total = 0;
                let mut first: Option<Row> = None;
                for (b_row, m_b) in &matches {
                    let result = join_result(&self.args, &d.row, Some(b_row));
                    if first.is_none() {
                        first = Some(result.clone());
                    }
                    out.push(Delta {
                        row: result,
                        multiplicity: d.multiplicity * m_b,
                    });
                    total += d.multiplicity * m_b;
                }
                if let Some(first) = first {
                    self.a_matches.insert(a_pk.clone(), (first, total));
                }
            }
            self.index_a.apply(&join_value, a_pk, d.row, d.multiplicity);
        } else {
            self.index_a
                .apply(&join_value, a_pk.clone(), d.row.clone(), d.multiplicity);
            let matches = self.index_b.matches(&join_value);
            if matches.is_empty() {
                let orphan = self
                    .a_matches
                    .remove(&a_pk)
                    .map(|(result, _)| result)
                    .unwrap_or_else(|| join_result(&self.args, &d.row, None));
                out.push(Delta {
                    row: orphan,
                    multiplicity: d.multiplicity,
                });
            } else {
                for (b_row, m_b) in matches {
                    out.push(Delta {
                        row: join_result(&self.args, &d.row, Some(&b_row)),
                        multiplicity: d.multiplicity * m_b,
                    });
                }
                self.a_matches.remove(&a_pk);
            }
        }
    }
}
