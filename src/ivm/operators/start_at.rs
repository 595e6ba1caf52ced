//! Start-from operator: gates changes below a pagination boundary.
//!
//! A query anchored at a start row only cares about rows at or after the
//! boundary under the connection's ordering. Adds and removes below the
//! boundary are dropped; edits that cross it degrade to a remove or an add.
//!
//! `Basis::Before` is resolved to a concrete predecessor row by the fetch
//! path at hydration time; at the change-stream level it gates like `At`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RivuletError;
use crate::ivm::stream::{Basis, Change, Node, Output, Start};
use crate::schema::SortSpec;
use crate::value::Row;

pub struct StartAt {
    start: Start,
    sort: SortSpec,
    downstream: Rc<RefCell<dyn Output>>,
}

impl StartAt {
    pub fn new(start: Start, sort: SortSpec, downstream: Rc<RefCell<dyn Output>>) -> StartAt {
        StartAt {
            start,
            sort,
            downstream,
        }
    }

    fn visible(&self, row: &Row) -> bool {
        let ord = self.sort.cmp_rows(row, &self.start.row);
        match self.start.basis {
            Basis::At | Basis::Before => ord.is_ge(),
            Basis::After => ord.is_gt(),
        }
    }
}

impl Output for StartAt {
    fn push(&mut self, change: Change) -> Result<(), RivuletError> {
        let forwarded = match change {
            Change::Add(node) => self.visible(&node.row).then_some(Change::Add(node)),
            Change::Remove(node) => self.visible(&node.row).then_some(Change::Remove(node)),
            Change::Edit { old, new } => match (self.visible(&old), self.visible(&new)) {
                (true, true) => Some(Change::Edit { old, new }),
                (true, false) => Some(Change::Remove(Node::leaf(old))),
                (false, true) => Some(Change::Add(Node::leaf(new))),
                (false, false) => None,
            },
        };
        match forwarded {
            Some(change) => self.downstream.borrow_mut().push(change),
            None => Ok(()),
        }
    }
}
