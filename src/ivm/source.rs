//! In-memory source: per-table ordered storage with overlay-aware scans.
//!
//! A [`MemorySource`] stores the rows of one table in a primary index
//! (ordered by primary key) plus lazily-created, reference-counted secondary
//! indexes (one per distinct ordering). Queries subscribe through
//! [`connect`](MemorySource::connect), which returns a [`SourceInput`]; the
//! source broadcasts every [`push`](MemorySource::push) to its connections
//! in insertion order.
//!
//! # Overlay protocol
//!
//! While connection `i` is being notified of a change, the change has not
//! yet been applied to the indexes. A transient overlay `(i, change)` makes
//! any `fetch` issued by connections `0..=i` observe the table *as if* the
//! change were applied, while connections past `i` still see the pre-change
//! state. After every connection has been notified the overlay is cleared
//! and all indexes are mutated atomically.
//!
//! # Cursors
//!
//! `fetch` returns a lazy single-pass [`FetchCursor`]. Any subsequent push
//! bumps the source epoch; a cursor created before the push fails fast with
//! `ExpiredCursor` instead of serving stale rows.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

use tracing::debug;

use crate::condition::{Condition, NoRelationships, Params};
use crate::error::RivuletError;
use crate::ivm::stream::{Basis, Change, Constraint, FetchRequest, Node, Output};
use crate::schema::{SortSpec, TableSchema};
use crate::value::{DirValue, Row};

type IndexKey = Vec<DirValue>;
type IndexMap = BTreeMap<IndexKey, Row>;

/// A secondary index: rows re-ordered under one non-primary ordering.
struct SecondaryIndex {
    spec: SortSpec,
    rows: IndexMap,
    /// Number of connections holding this index alive.
    refcount: usize,
}

/// The transient per-push overlay.
struct Overlay {
    output_index: usize,
    change: Change,
}

struct ConnState {
    id: u64,
    sort: SortSpec,
    /// Residual predicates the source applies at scan time (those it can
    /// evaluate without an exists-probe).
    applied: Vec<Condition>,
    /// Whether *all* of the connection's filters are applied at scan time.
    applied_filters: bool,
    output: RefCell<Option<Rc<RefCell<dyn Output>>>>,
    /// Canonical keys of secondary indexes this connection holds alive.
    owned_indexes: RefCell<Vec<String>>,
    destroyed: Cell<bool>,
}

struct SourceInner {
    schema: TableSchema,
    pk_sort: SortSpec,
    pk_canonical: String,
    primary: RefCell<IndexMap>,
    secondaries: RefCell<BTreeMap<String, SecondaryIndex>>,
    connections: RefCell<Vec<Rc<ConnState>>>,
    overlay: RefCell<Option<Overlay>>,
    /// Bumped on every push; outstanding cursors fail fast on mismatch.
    epoch: Cell<u64>,
    next_conn_id: Cell<u64>,
}

/// Ordered, overlay-aware storage for one table.
pub struct MemorySource {
    inner: Rc<SourceInner>,
}

impl MemorySource {
    pub fn new(schema: TableSchema) -> MemorySource {
        let pk_sort = schema.pk_sort();
        let pk_canonical = pk_sort.canonical();
        MemorySource {
            inner: Rc::new(SourceInner {
                schema,
                pk_sort,
                pk_canonical,
                primary: RefCell::new(BTreeMap::new()),
                secondaries: RefCell::new(BTreeMap::new()),
                connections: RefCell::new(Vec::new()),
                overlay: RefCell::new(None),
                epoch: Cell::new(0),
                next_conn_id: Cell::new(0),
            }),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.inner.schema.table_name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.inner.schema
    }

    /// Subscribe to this source with an ordering and residual filters.
    ///
    /// The ordering is normalized to include the primary key. A secondary
    /// index for it is created now (if it is not the primary ordering) and
    /// held alive by the returned input.
    pub fn connect(&self, sort: SortSpec, filters: Vec<Condition>) -> SourceInput {
        let sort = sort.normalized(&self.inner.schema);
        let applied: Vec<Condition> = filters
            .iter()
            .filter(|f| !f.references_exists())
            .cloned()
            .collect();
        let applied_filters = !filters.is_empty() && applied.len() == filters.len();

        let id = self.inner.next_conn_id.get();
        self.inner.next_conn_id.set(id + 1);

        let conn = Rc::new(ConnState {
            id,
            sort: sort.clone(),
            applied,
            applied_filters,
            output: RefCell::new(None),
            owned_indexes: RefCell::new(Vec::new()),
            destroyed: Cell::new(false),
        });

        if sort.canonical() != self.inner.pk_canonical {
            self.inner.ensure_secondary(&sort, &conn);
        }

        self.inner.connections.borrow_mut().push(conn.clone());
        SourceInput {
            source: self.inner.clone(),
            conn,
        }
    }

    /// Apply one change: validate, notify every connection in order under
    /// the overlay, then mutate all indexes atomically.
    ///
    /// On any failure the source state is unchanged and the overlay is
    /// cleared; the caller is expected to abort its transaction.
    pub fn push(&self, change: Change) -> Result<(), RivuletError> {
        self.inner.push(change)
    }

    /// Rows in primary-key order (snapshot).
    pub fn primary_rows(&self) -> Vec<Row> {
        self.inner.primary.borrow().values().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.inner.primary.borrow().len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.borrow().len()
    }

    pub fn secondary_index_count(&self) -> usize {
        self.inner.secondaries.borrow().len()
    }

    /// Check that every secondary index holds exactly the primary index's
    /// rows as a multiset.
    pub fn verify_index_invariants(&self) -> Result<(), RivuletError> {
        let primary = self.inner.primary.borrow();
        let mut expected: Vec<Row> = primary.values().cloned().collect();
        expected.sort_by(|a, b| self.inner.pk_sort.cmp_rows(a, b));

        for (canonical, index) in self.inner.secondaries.borrow().iter() {
            let mut got: Vec<Row> = index.rows.values().cloned().collect();
            got.sort_by(|a, b| self.inner.pk_sort.cmp_rows(a, b));
            if got != expected {
                return Err(RivuletError::Internal(format!(
                    "table {}: secondary index {canonical} diverged from primary",
                    self.inner.schema.table_name
                )));
            }
        }
        Ok(())
    }
}

impl SourceInner {
    fn ensure_secondary(self: &Rc<Self>, spec: &SortSpec, conn: &Rc<ConnState>) {
        let canonical = spec.canonical();
        if conn.owned_indexes.borrow().contains(&canonical) {
            return;
        }
        let mut secondaries = self.secondaries.borrow_mut();
        match secondaries.get_mut(&canonical) {
            Some(index) => index.refcount += 1,
            None => {
                let mut rows = BTreeMap::new();
                for row in self.primary.borrow().values() {
                    rows.insert(spec.index_key(row), row.clone());
                }
                debug!(
                    table = %self.schema.table_name,
                    ordering = %canonical,
                    rows = rows.len(),
                    "built secondary index"
                );
                secondaries.insert(
                    canonical.clone(),
                    SecondaryIndex {
                        spec: spec.clone(),
                        rows,
                        refcount: 1,
                    },
                );
            }
        }
        conn.owned_indexes.borrow_mut().push(canonical);
    }

    fn release_indexes(&self, conn: &ConnState) {
        let mut secondaries = self.secondaries.borrow_mut();
        for canonical in conn.owned_indexes.borrow_mut().drain(..) {
            if let Some(index) = secondaries.get_mut(&canonical) {
                index.refcount -= 1;
                if index.refcount == 0 {
                    secondaries.remove(&canonical);
                }
            }
        }
    }

    fn connection_position(&self, id: u64) -> Option<usize> {
        self.connections.borrow().iter().position(|c| c.id == id)
    }

    fn push(self: &Rc<Self>, change: Change) -> Result<(), RivuletError> {
        self.validate(&change)?;

        // Outstanding cursors must not serve rows that straddle this push.
        self.epoch.set(self.epoch.get() + 1);

        let connections: Vec<Rc<ConnState>> = self.connections.borrow().clone();
        for (i, conn) in connections.iter().enumerate() {
            *self.overlay.borrow_mut() = Some(Overlay {
                output_index: i,
                change: change.clone(),
            });
            let output = conn.output.borrow().clone();
            if let Some(out) = output {
                if let Err(e) = out.borrow_mut().push(change.clone()) {
                    *self.overlay.borrow_mut() = None;
                    return Err(e);
                }
            }
        }
        *self.overlay.borrow_mut() = None;

        self.apply_to_indexes(&change);
        Ok(())
    }

    fn validate(&self, change: &Change) -> Result<(), RivuletError> {
        let pk = &self.schema.primary_key;
        let primary = self.primary.borrow();
        match change {
            Change::Add(node) => {
                self.schema.validate_row(&node.row)?;
                let key = self.pk_sort.index_key(&node.row);
                if primary.contains_key(&key) {
                    return Err(RivuletError::DuplicateRow(format!(
                        "table {}: add of existing row {}",
                        self.schema.table_name,
                        node.row.key(pk)
                    )));
                }
            }
            Change::Remove(node) => {
                let key = self.pk_sort.index_key(&node.row);
                if !primary.contains_key(&key) {
                    return Err(RivuletError::RowNotFound(format!(
                        "table {}: remove of missing row {}",
                        self.schema.table_name,
                        node.row.key(pk)
                    )));
                }
            }
            Change::Edit { old, new } => {
                self.schema.validate_row(new)?;
                let old_key = self.pk_sort.index_key(old);
                if !primary.contains_key(&old_key) {
                    return Err(RivuletError::RowNotFound(format!(
                        "table {}: edit of missing row {}",
                        self.schema.table_name,
                        old.key(pk)
                    )));
                }
                let new_key = self.pk_sort.index_key(new);
                if new_key != old_key && primary.contains_key(&new_key) {
                    return Err(RivuletError::DuplicateRow(format!(
                        "table {}: edit collides with existing row {}",
                        self.schema.table_name,
                        new.key(pk)
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply_to_indexes(&self, change: &Change) {
        {
            let mut primary = self.primary.borrow_mut();
            apply_to_index(&mut primary, &self.pk_sort, change);
        }
        let mut secondaries = self.secondaries.borrow_mut();
        for index in secondaries.values_mut() {
            let spec = index.spec.clone();
            apply_to_index(&mut index.rows, &spec, change);
        }
    }
}

/// Apply one change to one index. Edits delete the old row and insert the
/// new one even when the index key is unchanged.
fn apply_to_index(map: &mut IndexMap, spec: &SortSpec, change: &Change) {
    match change {
        Change::Add(node) => {
            map.insert(spec.index_key(&node.row), node.row.clone());
        }
        Change::Remove(node) => {
            map.remove(&spec.index_key(&node.row));
        }
        Change::Edit { old, new } => {
            map.remove(&spec.index_key(old));
            map.insert(spec.index_key(new), new.clone());
        }
    }
}

// ── SourceInput ────────────────────────────────────────────────────────────

/// One connection's handle to its source.
pub struct SourceInput {
    source: Rc<SourceInner>,
    conn: Rc<ConnState>,
}

impl SourceInput {
    pub fn get_schema(&self) -> &TableSchema {
        &self.source.schema
    }

    pub fn sort(&self) -> &SortSpec {
        &self.conn.sort
    }

    /// Whether the source applies every one of this connection's filters at
    /// scan time. When false, downstream operators must re-check.
    pub fn applied_filters(&self) -> bool {
        self.conn.applied_filters
    }

    /// Attach the downstream endpoint that receives this connection's
    /// pushes.
    pub fn set_output(&self, output: Rc<RefCell<dyn Output>>) {
        *self.conn.output.borrow_mut() = Some(output);
    }

    /// Lazy ordered scan. Single-pass; invalidated by any subsequent push.
    pub fn fetch(&self, req: FetchRequest) -> Result<FetchCursor, RivuletError> {
        if self.conn.destroyed.get() {
            return Err(RivuletError::InvalidArgument(
                "fetch on a destroyed connection".to_string(),
            ));
        }
        FetchCursor::create(&self.source, &self.conn, req)
    }

    /// Semantically a `fetch` for the purpose of releasing downstream
    /// per-row state; never mutates the source.
    pub fn cleanup(&self, req: FetchRequest) -> Result<FetchCursor, RivuletError> {
        self.fetch(req)
    }

    /// Detach from the source: remove this connection from the broadcast
    /// list, cancel its cursors, and release its index references.
    pub fn destroy(&self) {
        if self.conn.destroyed.replace(true) {
            return;
        }
        self.source
            .connections
            .borrow_mut()
            .retain(|c| c.id != self.conn.id);
        self.source.release_indexes(&self.conn);
    }
}

impl Drop for SourceInput {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ── FetchCursor ────────────────────────────────────────────────────────────

enum IndexSel {
    Primary,
    Secondary(String),
}

/// An overlay row spliced into or elided from the scan.
enum OverlayOp {
    Add(IndexKey, Row),
    Remove(IndexKey),
}

/// Lazy single-pass scan over one index, with overlay merge.
pub struct FetchCursor {
    source: Rc<SourceInner>,
    conn: Rc<ConnState>,
    index: IndexSel,
    epoch: u64,
    constraint: Option<Constraint>,
    /// Splice-ins sorted by index key, consumed front to back.
    pending_adds: Vec<(IndexKey, Row)>,
    add_pos: usize,
    removed_keys: Vec<IndexKey>,
    lower: Bound<IndexKey>,
    done: bool,
}

impl FetchCursor {
    fn create(
        source: &Rc<SourceInner>,
        conn: &Rc<ConnState>,
        req: FetchRequest,
    ) -> Result<FetchCursor, RivuletError> {
        // Constraint on a column the schema does not declare matches no
        // rows: empty stream, no error.
        if let Some(c) = &req.constraint {
            if !source.schema.columns.contains_key(&c.column) {
                return Ok(FetchCursor::empty(source, conn));
            }
        }

        // Index choice: a constraint on the sole primary-key column pins the
        // row set to at most one PK prefix, so sort beyond it is irrelevant
        // and the primary index serves. Otherwise the scan needs
        // [(K, asc), …sort…], building it on demand.
        let (index, spec) = match &req.constraint {
            Some(c)
                if source.schema.primary_key.len() == 1
                    && source.schema.primary_key[0] == c.column =>
            {
                (IndexSel::Primary, source.pk_sort.clone())
            }
            Some(c) => {
                let required = conn.sort.with_leading(&c.column);
                if required.canonical() == source.pk_canonical {
                    (IndexSel::Primary, source.pk_sort.clone())
                } else {
                    source.ensure_secondary(&required, conn);
                    (IndexSel::Secondary(required.canonical()), required)
                }
            }
            None => {
                if conn.sort.canonical() == source.pk_canonical {
                    (IndexSel::Primary, source.pk_sort.clone())
                } else {
                    source.ensure_secondary(&conn.sort, conn);
                    (IndexSel::Secondary(conn.sort.canonical()), conn.sort.clone())
                }
            }
        };

        // Scan lower bound from the constraint: the one-element key vector
        // [(K=V)] sorts before every full key whose first column equals V,
        // so descending columns after K still yield the first matching row.
        let mut lower: Bound<IndexKey> = match (&req.constraint, &spec.0.first()) {
            (Some(c), Some((_, dir))) => {
                Bound::Included(vec![DirValue::new(c.value.clone(), *dir)])
            }
            _ => Bound::Unbounded,
        };

        // Start bound.
        if let Some(start) = &req.start {
            let start_key = spec.index_key(&start.row);
            let start_bound = match start.basis {
                Basis::At => Bound::Included(start_key),
                Basis::After => Bound::Excluded(start_key),
                Basis::Before => {
                    Self::predecessor_bound(source, conn, &index, &spec, &start_key)
                }
            };
            lower = max_lower(lower, start_bound);
        }

        // Capture the overlay if it is visible to this connection.
        let mut pending_adds: Vec<(IndexKey, Row)> = Vec::new();
        let mut removed_keys: Vec<IndexKey> = Vec::new();
        if let Some(overlay) = source.overlay.borrow().as_ref() {
            let position = source
                .connection_position(conn.id)
                .ok_or_else(|| RivuletError::Internal("connection not registered".into()))?;
            if position <= overlay.output_index {
                for op in overlay_ops(&overlay.change, &spec) {
                    match op {
                        OverlayOp::Add(key, row) => {
                            if !passes_lower(&key, &lower) {
                                continue; // below start: discarded
                            }
                            if let Some(c) = &req.constraint {
                                if row.get(&c.column) != &c.value {
                                    continue;
                                }
                            }
                            if !passes_filters(&conn.applied, &row) {
                                continue;
                            }
                            pending_adds.push((key, row));
                        }
                        OverlayOp::Remove(key) => removed_keys.push(key),
                    }
                }
                pending_adds.sort_by(|a, b| a.0.cmp(&b.0));
            }
        }

        Ok(FetchCursor {
            source: source.clone(),
            conn: conn.clone(),
            index,
            epoch: source.epoch.get(),
            constraint: req.constraint,
            pending_adds,
            add_pos: 0,
            removed_keys,
            lower,
            done: false,
        })
    }

    fn empty(source: &Rc<SourceInner>, conn: &Rc<ConnState>) -> FetchCursor {
        FetchCursor {
            source: source.clone(),
            conn: conn.clone(),
            index: IndexSel::Primary,
            epoch: source.epoch.get(),
            constraint: None,
            pending_adds: Vec::new(),
            add_pos: 0,
            removed_keys: Vec::new(),
            lower: Bound::Unbounded,
            done: true,
        }
    }

    /// Start bound for `Basis::Before`: the latest stored row below the
    /// start key that survives filters and overlay elision; the first row
    /// when none exists.
    fn predecessor_bound(
        source: &SourceInner,
        conn: &ConnState,
        index: &IndexSel,
        spec: &SortSpec,
        start_key: &IndexKey,
    ) -> Bound<IndexKey> {
        let overlay_removed: Vec<IndexKey> = source
            .overlay
            .borrow()
            .as_ref()
            .map(|ov| {
                overlay_ops(&ov.change, spec)
                    .into_iter()
                    .filter_map(|op| match op {
                        OverlayOp::Remove(k) => Some(k),
                        OverlayOp::Add(..) => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let scan = |map: &IndexMap| -> Bound<IndexKey> {
            let mut upper = start_key.clone();
            loop {
                let pred = map
                    .range::<IndexKey, _>((Bound::Unbounded, Bound::Excluded(upper.clone())))
                    .next_back()
                    .map(|(k, r)| (k.clone(), r.clone()));
                match pred {
                    Some((key, row)) => {
                        if overlay_removed.contains(&key) || !passes_filters(&conn.applied, &row)
                        {
                            upper = key;
                            continue;
                        }
                        return Bound::Included(key);
                    }
                    None => return Bound::Unbounded,
                }
            }
        };

        match index {
            IndexSel::Primary => scan(&source.primary.borrow()),
            IndexSel::Secondary(canonical) => {
                let secondaries = source.secondaries.borrow();
                match secondaries.get(canonical) {
                    Some(idx) => scan(&idx.rows),
                    None => Bound::Unbounded,
                }
            }
        }
    }

    /// Next stored row at or past the current lower bound.
    fn peek_base(&self) -> Option<(IndexKey, Row)> {
        let pick = |map: &IndexMap| {
            map.range::<IndexKey, _>((self.lower.clone(), Bound::Unbounded))
                .next()
                .map(|(k, r)| (k.clone(), r.clone()))
        };
        match &self.index {
            IndexSel::Primary => pick(&self.source.primary.borrow()),
            IndexSel::Secondary(canonical) => {
                let secondaries = self.source.secondaries.borrow();
                secondaries.get(canonical).and_then(|idx| pick(&idx.rows))
            }
        }
    }

    fn peek_add(&self) -> Option<&(IndexKey, Row)> {
        self.pending_adds[self.add_pos..]
            .iter()
            .find(|(k, _)| passes_lower(k, &self.lower))
    }
}

impl Iterator for FetchCursor {
    type Item = Result<Node, RivuletError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.conn.destroyed.get() || self.source.epoch.get() != self.epoch {
            self.done = true;
            return Some(Err(RivuletError::ExpiredCursor));
        }

        loop {
            let base = self.peek_base();
            let add = self.peek_add().cloned();

            // Merge: the smaller index key goes first. Keys are unique
            // because every ordering ends with the primary key.
            let (key, row, from_overlay) = match (base, add) {
                (Some((bk, br)), Some((ak, ar))) => {
                    if ak < bk {
                        (ak, ar, true)
                    } else {
                        (bk, br, false)
                    }
                }
                (Some((bk, br)), None) => (bk, br, false),
                (None, Some((ak, ar))) => (ak, ar, true),
                (None, None) => {
                    self.done = true;
                    return None;
                }
            };

            self.lower = Bound::Excluded(key.clone());
            if from_overlay {
                self.add_pos += 1;
            } else if self.removed_keys.contains(&key) {
                continue; // elided by the overlay
            }

            // A constraint scan emits a contiguous prefix: stop at the
            // first non-match.
            if let Some(c) = &self.constraint {
                if row.get(&c.column) != &c.value {
                    self.done = true;
                    return None;
                }
            }

            if !from_overlay && !passes_filters(&self.conn.applied, &row) {
                continue;
            }

            return Some(Ok(Node::leaf(row)));
        }
    }
}

fn passes_filters(filters: &[Condition], row: &Row) -> bool {
    let params = Params::new();
    filters.iter().all(|f| f.eval(row, &params, &NoRelationships))
}

fn passes_lower(key: &IndexKey, lower: &Bound<IndexKey>) -> bool {
    match lower {
        Bound::Unbounded => true,
        Bound::Included(b) => key >= b,
        Bound::Excluded(b) => key > b,
    }
}

/// The later of two scan lower bounds. On an equal key, the exclusive
/// bound wins (it admits fewer rows).
fn max_lower(a: Bound<IndexKey>, b: Bound<IndexKey>) -> Bound<IndexKey> {
    let a_wins = match (&a, &b) {
        (Bound::Unbounded, _) => false,
        (_, Bound::Unbounded) => true,
        (Bound::Included(ka), Bound::Included(kb)) => ka >= kb,
        (Bound::Excluded(ka), Bound::Excluded(kb)) => ka >= kb,
        (Bound::Included(ka), Bound::Excluded(kb)) => ka > kb,
        (Bound::Excluded(ka), Bound::Included(kb)) => ka >= kb,
    };
    if a_wins { a } else { b }
}

/// Scan-visible operations for one overlaid change.
///
/// An edit splits into remove+add whenever its index key moves (which
/// includes every primary-key change); an edit whose key is unchanged
/// leaves the scan alone — the stored row is emitted and the old/new
/// column distinction is handled downstream.
fn overlay_ops(change: &Change, spec: &SortSpec) -> Vec<OverlayOp> {
    match change {
        Change::Add(node) => vec![OverlayOp::Add(spec.index_key(&node.row), node.row.clone())],
        Change::Remove(node) => vec![OverlayOp::Remove(spec.index_key(&node.row))],
        Change::Edit { old, new } => {
            let old_key = spec.index_key(old);
            let new_key = spec.index_key(new);
            if old_key == new_key {
                Vec::new()
            } else {
                vec![
                    OverlayOp::Remove(old_key),
                    OverlayOp::Add(new_key, new.clone()),
                ]
            }
        }
    }
}
