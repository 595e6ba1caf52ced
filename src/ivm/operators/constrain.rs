//! Constraint operator: equality restriction on one column.
//!
//! The degenerate filter `row[column] == value`, kept separate because the
//! source can push the same restriction into its index choice at fetch
//! time; at push time this operator gates the change stream.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RivuletError;
use crate::ivm::stream::{Change, Constraint, Node, Output};
use crate::value::Row;

pub struct Constrain {
    constraint: Constraint,
    downstream: Rc<RefCell<dyn Output>>,
}

impl Constrain {
    pub fn new(constraint: Constraint, downstream: Rc<RefCell<dyn Output>>) -> Constrain {
        Constrain {
            constraint,
            downstream,
        }
    }

    fn matches(&self, row: &Row) -> bool {
        row.get(&self.constraint.column) == &self.constraint.value
    }
}

impl Output for Constrain {
    fn push(&mut self, change: Change) -> Result<(), RivuletError> {
        let forwarded = match change {
            Change::Add(node) => self.matches(&node.row).then_some(Change::Add(node)),
            Change::Remove(node) => self.matches(&node.row).then_some(Change::Remove(node)),
            Change::Edit { old, new } => match (self.matches(&old), self.matches(&new)) {
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
