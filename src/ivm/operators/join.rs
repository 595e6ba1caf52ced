//! Inner join operator.
//!
//! Maintains one match index per side. Each version consumes the pair of
//! input deltas, draining the right side first: right rows join against the
//! pre-version left index, then left rows join against the updated right
//! index, so the emitted stream's running sum always equals the current
//! cross product under the join predicate.

use crate::ivm::operators::consolidate;
use crate::ivm::operators::join_common::{JoinArgs, SideIndex, join_result};
use crate::ivm::stream::Delta;

pub struct Join {
    args: JoinArgs,
    index_a: SideIndex,
    index_b: SideIndex,
}

impl Join {
    pub fn new(args: JoinArgs) -> Join {
        Join {
            args,
            index_a: SideIndex::new(),
            index_b: SideIndex::new(),
        }
    }

    pub fn args(&self) -> &JoinArgs {
        &self.args
    }

    /// Consume one version's `(Δa, Δb)` pair.
    pub fn step(&mut self, delta_a: Vec<Delta>, delta_b: Vec<Delta>) -> Vec<Delta> {
        let mut out = Vec::new();

        for d in delta_b {
            let join_value = d.row.get(&self.args.b_join_col).clone();
            for (a_row, m_a) in self.index_a.matches(&join_value) {
                out.push(Delta {
                    row: join_result(&self.args, &a_row, Some(&d.row)),
                    multiplicity: m_a * d.multiplicity,
                });
            }
            let pk = d.row.key(&self.args.b_pk_cols);
            self.index_b.apply(&join_value, pk, d.row, d.multiplicity);
        }

        for d in delta_a {
            let join_value = d.row.get(&self.args.a_join_col).clone();
            for (b_row, m_b) in self.index_b.matches(&join_value) {
                out.push(Delta {
                    row: join_result(&self.args, &d.row, Some(&b_row)),
                    multiplicity: d.multiplicity * m_b,
                });
            }
            let pk = d.row.key(&self.args.a_pk_cols);
            self.index_a.apply(&join_value, pk, d.row, d.multiplicity);
        }

        consolidate(out)
    }
}
