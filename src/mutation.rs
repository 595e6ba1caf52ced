//! Mutation layer: registered mutators, pending write transactions, and
//! batch grouping.
//!
//! A mutator is a named, registered function that performs writes through a
//! [`WriteTransaction`]. `begin_mutation` opens a pending mutation whose
//! commit applies the writes to the store and hands the resulting diff to
//! the caller for replay into sources. `batch` groups several mutations
//! under one handle; it must fail when nested or when invoked with a handle
//! that was not opened as a batch.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RivuletError;
use crate::kv::{DiffEntry, MemStore, WriteTransaction};

pub type MutatorFn =
    Rc<dyn Fn(&mut dyn WriteTransaction, &serde_json::Value) -> Result<(), RivuletError>>;

/// What kind of handle `begin_mutation` produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Single,
    Batch,
}

/// An open mutation: recorded name/args plus the handle kind.
pub struct MutationHandle {
    pub name: String,
    pub args: serde_json::Value,
    pub kind: MutationKind,
}

/// Registry of named mutators plus batch bookkeeping.
#[derive(Default)]
pub struct Mutators {
    registry: HashMap<String, MutatorFn>,
    batch_open: Cell<bool>,
}

fn qualified(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

impl Mutators {
    pub fn new() -> Mutators {
        Mutators::default()
    }

    /// Register a mutator under `namespace.name`.
    pub fn register(
        &mut self,
        namespace: &str,
        name: &str,
        mutator: MutatorFn,
    ) -> Result<(), RivuletError> {
        let key = qualified(namespace, name);
        if self.registry.contains_key(&key) {
            return Err(RivuletError::InvalidArgument(format!(
                "mutator {key} already registered"
            )));
        }
        self.registry.insert(key, mutator);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<MutatorFn, RivuletError> {
        self.registry
            .get(name)
            .cloned()
            .ok_or_else(|| RivuletError::UnknownMutator(name.to_string()))
    }

    /// Open a single-mutation handle.
    pub fn begin_mutation(&self, name: &str, args: serde_json::Value) -> MutationHandle {
        MutationHandle {
            name: name.to_string(),
            args,
            kind: MutationKind::Single,
        }
    }

    /// Open a batch handle.
    pub fn begin_batch(&self, name: &str, args: serde_json::Value) -> MutationHandle {
        MutationHandle {
            name: name.to_string(),
            args,
            kind: MutationKind::Batch,
        }
    }

    /// Run a batch of mutations against the store under one handle.
    ///
    /// Fails when a batch is already open (no nesting) or when the handle
    /// was not opened by [`begin_batch`](Mutators::begin_batch). Returns
    /// the combined diff of every mutation in the batch.
    pub fn batch<F>(
        &self,
        handle: &MutationHandle,
        store: &mut MemStore,
        f: F,
    ) -> Result<Vec<DiffEntry>, RivuletError>
    where
        F: FnOnce(&mut dyn WriteTransaction) -> Result<(), RivuletError>,
    {
        if handle.kind != MutationKind::Batch {
            return Err(RivuletError::InvalidBatch(format!(
                "mutator handle {} was not opened as a batch",
                handle.name
            )));
        }
        if self.batch_open.replace(true) {
            return Err(RivuletError::InvalidBatch("batch already open".to_string()));
        }
        let result = self.run_in_tx(store, f);
        self.batch_open.set(false);
        result
    }

    /// Execute a registered mutator for an open handle and commit its
    /// writes, returning the diff for source replay.
    pub fn execute(
        &self,
        handle: &MutationHandle,
        store: &mut MemStore,
    ) -> Result<Vec<DiffEntry>, RivuletError> {
        let mutator = self.lookup(&handle.name)?;
        let args = handle.args.clone();
        self.run_in_tx(store, move |tx| mutator(tx, &args))
    }

    fn run_in_tx<F>(&self, store: &mut MemStore, f: F) -> Result<Vec<DiffEntry>, RivuletError>
    where
        F: FnOnce(&mut dyn WriteTransaction) -> Result<(), RivuletError>,
    {
        let mut tx = store.write();
        f(&mut tx)?;
        Ok(tx.commit())
    }
}
