//! View apply: ordered materialized query results.
//!
//! A [`View`] maintains an ordered sequence of [`Node`]s equal to the
//! current query result. Changes apply by binary search under the view's
//! comparator: duplicate primary keys on add and absent rows on remove fail
//! fast — those indicate a prerequisite change was never applied upstream.
//!
//! Updates between two ticks coalesce: the working sequence absorbs every
//! change, and [`View::flush`] publishes an immutable snapshot at most once
//! per tick, only when something changed. Observers hold the snapshot `Rc`
//! and never see a partially-applied batch.

use std::rc::Rc;

use crate::error::RivuletError;
use crate::ivm::stream::{Change, Delta, Node};
use crate::schema::SortSpec;
use crate::value::Row;

pub struct View {
    sort: SortSpec,
    /// Relationship alias columns: a `Json` object under one of these
    /// columns becomes a child node of the row.
    relationship_aliases: Vec<String>,
    /// Published row cap. The working sequence keeps every row so rows
    /// re-enter the window when earlier ones leave.
    limit: Option<usize>,
    entries: Vec<Node>,
    snapshot: Rc<Vec<Node>>,
    version: u64,
    dirty: bool,
}

impl View {
    pub fn new(sort: SortSpec) -> View {
        View {
            sort,
            relationship_aliases: Vec::new(),
            limit: None,
            entries: Vec::new(),
            snapshot: Rc::new(Vec::new()),
            version: 0,
            dirty: false,
        }
    }

    pub fn with_relationships(mut self, aliases: Vec<String>) -> View {
        self.relationship_aliases = aliases;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> View {
        self.limit = limit;
        self
    }

    /// The last published snapshot. Stable until the next flush.
    pub fn snapshot(&self) -> Rc<Vec<Node>> {
        self.snapshot.clone()
    }

    /// Published rows without relationship structure.
    pub fn rows(&self) -> Vec<Row> {
        self.snapshot.iter().map(|n| n.row.clone()).collect()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Publish the working sequence if anything changed since the last
    /// tick. Returns whether a new snapshot was published.
    pub fn flush(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        let visible = match self.limit {
            Some(limit) => self.entries.iter().take(limit).cloned().collect(),
            None => self.entries.clone(),
        };
        self.snapshot = Rc::new(visible);
        self.version += 1;
        self.dirty = false;
        true
    }

    /// Apply one change at the top level.
    pub fn apply(&mut self, change: Change) -> Result<(), RivuletError> {
        let sort = self.sort.clone();
        Self::apply_to(&mut self.entries, &sort, change)?;
        self.dirty = true;
        Ok(())
    }

    /// Apply one change inside a relationship sub-sequence, addressed by a
    /// path of `(relationship, parent primary-key columns, parent key row)`
    /// hops. The same ordering rules recurse into the child sequence.
    pub fn apply_at(
        &mut self,
        path: &[(String, Row)],
        child_sort: &SortSpec,
        change: Change,
    ) -> Result<(), RivuletError> {
        let top_sort = self.sort.clone();
        let entries = &mut self.entries;
        Self::apply_path(entries, &top_sort, path, child_sort, change)?;
        self.dirty = true;
        Ok(())
    }

    fn apply_path(
        entries: &mut Vec<Node>,
        sort: &SortSpec,
        path: &[(String, Row)],
        child_sort: &SortSpec,
        change: Change,
    ) -> Result<(), RivuletError> {
        match path.split_first() {
            None => Self::apply_to(entries, child_sort, change),
            Some(((relationship, parent_row), rest)) => {
                let position = entries
                    .binary_search_by(|n| sort.cmp_rows(&n.row, parent_row))
                    .map_err(|_| {
                        RivuletError::RowNotFound(format!(
                            "view: relationship parent {} not present",
                            parent_row.key(&key_columns(sort))
                        ))
                    })?;
                let children = entries[position]
                    .relationships
                    .entry(relationship.clone())
                    .or_default();
                Self::apply_path(children, child_sort, rest, child_sort, change)
            }
        }
    }

    fn apply_to(
        entries: &mut Vec<Node>,
        sort: &SortSpec,
        change: Change,
    ) -> Result<(), RivuletError> {
        match change {
            Change::Add(node) => {
                match entries.binary_search_by(|n| sort.cmp_rows(&n.row, &node.row)) {
                    Ok(_) => Err(RivuletError::DuplicateRow(format!(
                        "view: add of row already present at {}",
                        node.row.key(&key_columns(sort))
                    ))),
                    Err(position) => {
                        entries.insert(position, node);
                        Ok(())
                    }
                }
            }
            Change::Remove(node) => {
                match entries.binary_search_by(|n| sort.cmp_rows(&n.row, &node.row)) {
                    Ok(position) => {
                        entries.remove(position);
                        Ok(())
                    }
                    Err(_) => Err(RivuletError::RowNotFound(format!(
                        "view: remove of absent row {}",
                        node.row.key(&key_columns(sort))
                    ))),
                }
            }
            Change::Edit { old, new } => {
                if sort.cmp_rows(&old, &new) == std::cmp::Ordering::Equal {
                    // Comparator-equal: replace in place, keeping children.
                    match entries.binary_search_by(|n| sort.cmp_rows(&n.row, &old)) {
                        Ok(position) => {
                            entries[position].row = new;
                            Ok(())
                        }
                        Err(_) => Err(RivuletError::RowNotFound(format!(
                            "view: edit of absent row {}",
                            old.key(&key_columns(sort))
                        ))),
                    }
                } else {
                    let position = entries
                        .binary_search_by(|n| sort.cmp_rows(&n.row, &old))
                        .map_err(|_| {
                            RivuletError::RowNotFound(format!(
                                "view: edit of absent row {}",
                                old.key(&key_columns(sort))
                            ))
                        })?;
                    let mut node = entries.remove(position);
                    node.row = new;
                    match entries.binary_search_by(|n| sort.cmp_rows(&n.row, &node.row)) {
                        Ok(_) => Err(RivuletError::DuplicateRow(format!(
                            "view: edit lands on occupied position {}",
                            node.row.key(&key_columns(sort))
                        ))),
                        Err(new_position) => {
                            entries.insert(new_position, node);
                            Ok(())
                        }
                    }
                }
            }
        }
    }

    /// Apply a consolidated delta batch from the delta tier. Retractions
    /// arrive before assertions (see `operators::consolidate`), so an
    /// update never trips the duplicate-add check.
    pub fn apply_deltas(&mut self, deltas: Vec<Delta>) -> Result<(), RivuletError> {
        for delta in deltas {
            let node = self.row_to_node(&delta.row);
            let times = delta.multiplicity.unsigned_abs();
            for _ in 0..times {
                if delta.multiplicity < 0 {
                    self.apply(Change::Remove(node.clone()))?;
                } else {
                    self.apply(Change::Add(node.clone()))?;
                }
            }
        }
        Ok(())
    }

    /// Materialize relationship children from alias columns.
    fn row_to_node(&self, row: &Row) -> Node {
        let mut node = Node::leaf(row.clone());
        for alias in &self.relationship_aliases {
            let children = match row.get(alias) {
                crate::value::Value::Json(j) => Row::from_json(j)
                    .map(|child| vec![Node::leaf(child)])
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            node.relationships.insert(alias.clone(), children);
        }
        node
    }
}

fn key_columns(sort: &SortSpec) -> Vec<String> {
    sort.columns().map(str::to_string).collect()
}

/// Terminal [`Output`](crate::ivm::stream::Output) for change-stream
/// pipelines: applies each pushed change straight into a shared view.
pub struct ViewSink {
    view: std::rc::Rc<std::cell::RefCell<View>>,
}

impl ViewSink {
    pub fn new(view: std::rc::Rc<std::cell::RefCell<View>>) -> ViewSink {
        ViewSink { view }
    }
}

impl crate::ivm::stream::Output for ViewSink {
    fn push(&mut self, change: Change) -> Result<(), RivuletError> {
        self.view.borrow_mut().apply(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Direction, Value};

    fn row(id: &str, v: i64) -> Row {
        Row::from_pairs([("id", Value::from(id)), ("value", Value::Int(v))])
    }

    fn id_sort() -> SortSpec {
        SortSpec::asc(&["id"])
    }

    // ── Apply rules ─────────────────────────────────────────────────

    #[test]
    fn test_adds_keep_sort_order() {
        let mut view = View::new(id_sort());
        view.apply(Change::add(row("b", 2))).unwrap();
        view.apply(Change::add(row("a", 1))).unwrap();
        view.apply(Change::add(row("c", 3))).unwrap();
        view.flush();
        assert_eq!(view.rows(), vec![row("a", 1), row("b", 2), row("c", 3)]);
    }

    #[test]
    fn test_duplicate_add_fails_fast() {
        let mut view = View::new(id_sort());
        view.apply(Change::add(row("a", 1))).unwrap();
        let err = view.apply(Change::add(row("a", 9))).unwrap_err();
        assert!(matches!(err, RivuletError::DuplicateRow(_)));
    }

    #[test]
    fn test_remove_absent_fails_fast() {
        let mut view = View::new(id_sort());
        let err = view.apply(Change::remove(row("a", 1))).unwrap_err();
        assert!(matches!(err, RivuletError::RowNotFound(_)));
    }

    #[test]
    fn test_edit_in_place_when_comparator_equal() {
        let mut view = View::new(id_sort());
        view.apply(Change::add(row("a", 1))).unwrap();
        // Sort is by id only: value change keeps the position.
        view.apply(Change::edit(row("a", 1), row("a", 11))).unwrap();
        view.flush();
        assert_eq!(view.rows(), vec![row("a", 11)]);
    }

    #[test]
    fn test_edit_moves_when_sort_key_changes() {
        let sort = SortSpec(vec![
            ("value".to_string(), Direction::Asc),
            ("id".to_string(), Direction::Asc),
        ]);
        let mut view = View::new(sort);
        view.apply(Change::add(row("a", 1))).unwrap();
        view.apply(Change::add(row("b", 5))).unwrap();
        view.apply(Change::edit(row("a", 1), row("a", 9))).unwrap();
        view.flush();
        assert_eq!(view.rows(), vec![row("b", 5), row("a", 9)]);
    }

    // ── Batching ────────────────────────────────────────────────────

    #[test]
    fn test_flush_publishes_once_per_tick() {
        let mut view = View::new(id_sort());
        assert!(!view.flush(), "clean view publishes nothing");

        view.apply(Change::add(row("a", 1))).unwrap();
        view.apply(Change::add(row("b", 2))).unwrap();

        // Observer still sees the pre-batch snapshot until the flush.
        let before = view.snapshot();
        assert!(before.is_empty());

        assert!(view.flush());
        assert_eq!(view.version(), 1);
        assert_eq!(view.rows().len(), 2);
        // The old snapshot handle is unaffected.
        assert!(before.is_empty());

        assert!(!view.flush(), "no second publish without changes");
    }

    #[test]
    fn test_add_remove_round_trip_restores_snapshot() {
        let mut view = View::new(id_sort());
        view.apply(Change::add(row("a", 1))).unwrap();
        view.flush();
        let baseline = view.rows();

        view.apply(Change::add(row("b", 2))).unwrap();
        view.apply(Change::remove(row("b", 2))).unwrap();
        view.flush();
        assert_eq!(view.rows(), baseline);
    }

    // ── Deltas ──────────────────────────────────────────────────────

    #[test]
    fn test_apply_deltas_retract_then_assert() {
        let mut view = View::new(id_sort());
        view.apply(Change::add(row("a", 1))).unwrap();

        view.apply_deltas(vec![
            Delta::retract(row("a", 1)),
            Delta::assert(row("a", 2)),
        ])
        .unwrap();
        view.flush();
        assert_eq!(view.rows(), vec![row("a", 2)]);
    }

    #[test]
    fn test_relationship_alias_materialized() {
        let child = row("c1", 7);
        let parent = Row::from_pairs([
            ("id", Value::from("p1")),
            ("comment", Value::Json(child.to_json())),
        ]);
        let mut view = View::new(id_sort()).with_relationships(vec!["comment".to_string()]);
        view.apply_deltas(vec![Delta::assert(parent)]).unwrap();
        view.flush();

        let snapshot = view.snapshot();
        let children = &snapshot[0].relationships["comment"];
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].row, child);
    }

    #[test]
    fn test_null_alias_yields_empty_relationship() {
        let parent = Row::from_pairs([("id", Value::from("p1")), ("comment", Value::Null)]);
        let mut view = View::new(id_sort()).with_relationships(vec!["comment".to_string()]);
        view.apply_deltas(vec![Delta::assert(parent)]).unwrap();
        view.flush();
        assert!(view.snapshot()[0].relationships["comment"].is_empty());
    }

    // ── Relationship recursion ──────────────────────────────────────

    #[test]
    fn test_apply_at_recurses_into_children() {
        let mut view = View::new(id_sort());
        view.apply(Change::add(row("p1", 0))).unwrap();

        let child_sort = SortSpec::asc(&["id"]);
        let path = vec![("comments".to_string(), row("p1", 0))];
        view.apply_at(&path, &child_sort, Change::add(row("c2", 2)))
            .unwrap();
        view.apply_at(&path, &child_sort, Change::add(row("c1", 1)))
            .unwrap();
        view.flush();

        let snapshot = view.snapshot();
        let children = &snapshot[0].relationships["comments"];
        assert_eq!(children[0].row, row("c1", 1));
        assert_eq!(children[1].row, row("c2", 2));

        // Same rules apply in the child sequence.
        let err = view
            .apply_at(&path, &child_sort, Change::add(row("c1", 9)))
            .unwrap_err();
        assert!(matches!(err, RivuletError::DuplicateRow(_)));
    }
}
