//! End-to-end view maintenance over a single table: insert / update /
//! delete round trips, ordering, limits, and boundary scans.

mod common;

use common::*;
use rivulet::{
    Basis, Change, Condition, Direction, FetchRequest, Query, Row, SimpleOp, SortSpec, Value,
};

#[test]
fn test_insert_update_delete_round_trip() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();

    engine
        .apply_change("issues", Change::add(issue_row("a", 1)))
        .unwrap();
    engine.flush_views();
    assert_eq!(engine.query_rows(id).unwrap(), vec![issue_row("a", 1)]);

    engine
        .apply_change("issues", Change::add(issue_row("b", 2)))
        .unwrap();
    engine.flush_views();
    assert_eq!(
        engine.query_rows(id).unwrap(),
        vec![issue_row("a", 1), issue_row("b", 2)]
    );

    // Upsert a → 11.
    engine
        .apply_change("issues", Change::edit(issue_row("a", 1), issue_row("a", 11)))
        .unwrap();
    engine.flush_views();
    assert_eq!(
        engine.query_rows(id).unwrap(),
        vec![issue_row("a", 11), issue_row("b", 2)]
    );

    engine
        .apply_change("issues", Change::remove(issue_row("b", 2)))
        .unwrap();
    engine.flush_views();
    assert_eq!(engine.query_rows(id).unwrap(), vec![issue_row("a", 11)]);
}

#[test]
fn test_self_identical_edit_is_view_noop() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();
    engine
        .apply_change("issues", Change::add(issue_row("a", 1)))
        .unwrap();
    engine.flush_views();

    engine
        .apply_change("issues", Change::edit(issue_row("a", 1), issue_row("a", 1)))
        .unwrap();
    engine.flush_views();
    assert_eq!(engine.query_rows(id).unwrap(), vec![issue_row("a", 1)]);
    engine
        .source("issues")
        .unwrap()
        .verify_index_invariants()
        .unwrap();
}

#[test]
fn test_ordered_view_with_descending_sort() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine
        .register_query(
            Query::table("issues")
                .order_by(SortSpec(vec![("value".to_string(), Direction::Desc)])),
        )
        .unwrap();

    for (key, value) in [("a", 1), ("b", 3), ("c", 2)] {
        engine
            .apply_change("issues", Change::add(issue_row(key, value)))
            .unwrap();
    }
    engine.flush_views();
    assert_eq!(
        engine.query_rows(id).unwrap(),
        vec![issue_row("b", 3), issue_row("c", 2), issue_row("a", 1)]
    );
}

#[test]
fn test_filtered_query_tracks_predicate_boundary() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine
        .register_query(
            Query::table("issues").where_(Condition::cmp("value", SimpleOp::Gt, 10i64)),
        )
        .unwrap();

    engine
        .apply_change("issues", Change::add(issue_row("a", 5)))
        .unwrap();
    engine
        .apply_change("issues", Change::add(issue_row("b", 20)))
        .unwrap();
    engine.flush_views();
    assert_eq!(engine.query_rows(id).unwrap(), vec![issue_row("b", 20)]);

    // Edits move a into the match set and b out of it.
    engine
        .apply_change("issues", Change::edit(issue_row("a", 5), issue_row("a", 15)))
        .unwrap();
    engine
        .apply_change("issues", Change::edit(issue_row("b", 20), issue_row("b", 3)))
        .unwrap();
    engine.flush_views();
    assert_eq!(engine.query_rows(id).unwrap(), vec![issue_row("a", 15)]);
}

#[test]
fn test_limit_caps_published_rows() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine
        .register_query(Query::table("issues").limit(2))
        .unwrap();

    for (key, value) in [("a", 1), ("b", 2), ("c", 3)] {
        engine
            .apply_change("issues", Change::add(issue_row(key, value)))
            .unwrap();
    }
    engine.flush_views();
    assert_eq!(
        engine.query_rows(id).unwrap(),
        vec![issue_row("a", 1), issue_row("b", 2)]
    );

    // Removing a published row pulls the next one into the window.
    engine
        .apply_change("issues", Change::remove(issue_row("a", 1)))
        .unwrap();
    engine.flush_views();
    assert_eq!(
        engine.query_rows(id).unwrap(),
        vec![issue_row("b", 2), issue_row("c", 3)]
    );
}

// ── Boundary scans through the public source API ───────────────────────

#[test]
fn test_constraint_on_missing_column_yields_empty_stream() {
    let mut engine = engine_with(vec![issues_schema()]);
    engine
        .apply_change("issues", Change::add(issue_row("a", 1)))
        .unwrap();

    let input = engine
        .source("issues")
        .unwrap()
        .connect(SortSpec::asc(&["id"]), vec![]);
    let rows: Vec<Row> = input
        .fetch(FetchRequest::constrained("no_such_column", "x"))
        .unwrap()
        .map(|n| n.unwrap().row)
        .collect();
    assert!(rows.is_empty());
}

#[test]
fn test_start_basis_boundaries() {
    let mut engine = engine_with(vec![issues_schema()]);
    for (key, value) in [("a", 1), ("b", 2)] {
        engine
            .apply_change("issues", Change::add(issue_row(key, value)))
            .unwrap();
    }
    let input = engine
        .source("issues")
        .unwrap()
        .connect(SortSpec::asc(&["id"]), vec![]);

    // before at the first row → scan starts at the first row.
    let rows: Vec<Row> = input
        .fetch(FetchRequest::starting(issue_row("a", 1), Basis::Before))
        .unwrap()
        .map(|n| n.unwrap().row)
        .collect();
    assert_eq!(rows.first(), Some(&issue_row("a", 1)));

    // after at the last row → empty stream.
    let rows: Vec<Row> = input
        .fetch(FetchRequest::starting(issue_row("b", 2), Basis::After))
        .unwrap()
        .map(|n| n.unwrap().row)
        .collect();
    assert!(rows.is_empty());
}

#[test]
fn test_push_round_trip_leaves_tables_identical() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();
    engine
        .apply_change("issues", Change::add(issue_row("a", 1)))
        .unwrap();
    engine.flush_views();

    let rows_before = engine.source("issues").unwrap().primary_rows();
    let view_before = engine.query_rows(id).unwrap();

    engine
        .apply_change("issues", Change::add(issue_row("tmp", 9)))
        .unwrap();
    engine
        .apply_change("issues", Change::remove(issue_row("tmp", 9)))
        .unwrap();
    engine.flush_views();

    assert_eq!(engine.source("issues").unwrap().primary_rows(), rows_before);
    assert_eq!(engine.query_rows(id).unwrap(), view_before);
    engine
        .source("issues")
        .unwrap()
        .verify_index_invariants()
        .unwrap();
}

#[test]
fn test_invalid_pushes_reported_with_kinds() {
    let mut engine = engine_with(vec![issues_schema()]);
    engine
        .apply_change("issues", Change::add(issue_row("a", 1)))
        .unwrap();

    let dup = engine
        .apply_change("issues", Change::add(issue_row("a", 5)))
        .unwrap_err();
    assert_eq!(dup.kind(), rivulet::ErrorKind::Invariant);

    let missing = engine
        .apply_change("issues", Change::remove(issue_row("zz", 0)))
        .unwrap_err();
    assert_eq!(missing.kind(), rivulet::ErrorKind::Invariant);

    let bad_type = engine
        .apply_change(
            "issues",
            Change::add(Row::from_pairs([
                ("id", Value::from("x")),
                ("value", Value::from("not an int")),
            ])),
        )
        .unwrap_err();
    assert_eq!(bad_type.kind(), rivulet::ErrorKind::Protocol);

    let unknown = engine
        .apply_change("ghost_table", Change::add(issue_row("a", 1)))
        .unwrap_err();
    assert_eq!(unknown.kind(), rivulet::ErrorKind::Usage);
}
