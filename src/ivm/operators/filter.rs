//! Condition filter operator.
//!
//! Forwards only changes whose rows satisfy the condition. An edit that
//! crosses the predicate boundary degrades to a remove (left the match set)
//! or an add (entered it); an edit entirely outside the match set is
//! dropped.

use std::cell::RefCell;
use std::rc::Rc;

use crate::condition::{Condition, NoRelationships, Params};
use crate::error::RivuletError;
use crate::ivm::stream::{Change, Node, Output};
use crate::value::Row;

pub struct Filter {
    condition: Condition,
    params: Params,
    downstream: Rc<RefCell<dyn Output>>,
}

impl Filter {
    pub fn new(condition: Condition, downstream: Rc<RefCell<dyn Output>>) -> Filter {
        Filter {
            condition,
            params: Params::new(),
            downstream,
        }
    }

    pub fn with_params(
        condition: Condition,
        params: Params,
        downstream: Rc<RefCell<dyn Output>>,
    ) -> Filter {
        Filter {
            condition,
            params,
            downstream,
        }
    }

    fn passes(&self, row: &Row) -> bool {
        self.condition.eval(row, &self.params, &NoRelationships)
    }
}

impl Output for Filter {
    fn push(&mut self, change: Change) -> Result<(), RivuletError> {
        let forwarded = match change {
            Change::Add(node) => {
                if self.passes(&node.row) {
                    Some(Change::Add(node))
                } else {
                    None
                }
            }
            Change::Remove(node) => {
                if self.passes(&node.row) {
                    Some(Change::Remove(node))
                } else {
                    None
                }
            }
            Change::Edit { old, new } => match (self.passes(&old), self.passes(&new)) {
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
