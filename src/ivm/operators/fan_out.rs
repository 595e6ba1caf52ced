//! Output fan-out: broadcast one change stream to several downstreams.
//!
//! Downstreams are notified in registration order, matching the source's
//! connection-order contract. The first error aborts the broadcast and
//! propagates, so a failed push never half-applies across siblings further
//! down the list.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RivuletError;
use crate::ivm::stream::{Change, Output};

#[derive(Default)]
pub struct FanOut {
    downstreams: Vec<Rc<RefCell<dyn Output>>>,
}

impl FanOut {
    pub fn new() -> FanOut {
        FanOut::default()
    }

    pub fn add(&mut self, downstream: Rc<RefCell<dyn Output>>) {
        self.downstreams.push(downstream);
    }

    pub fn len(&self) -> usize {
        self.downstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.downstreams.is_empty()
    }
}

impl Output for FanOut {
    fn push(&mut self, change: Change) -> Result<(), RivuletError> {
        for downstream in &self.downstreams {
            downstream.borrow_mut().push(change.clone())?;
        }
        Ok(())
    }
}
