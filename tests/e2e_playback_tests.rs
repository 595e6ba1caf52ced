//! End-to-end poke playback: pacing across ticks, merge equivalence,
//! out-of-order recovery, and disconnect.

mod common;

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use common::*;
use rivulet::kv::row_key;
use rivulet::{Cookie, PatchOp, Poke, Query, RowKey, Value};
use serde_json::json;

fn issue_patch(id: &str, value: i64) -> PatchOp {
    PatchOp::Put {
        key: row_key("issues", &RowKey(vec![Value::from(id)])),
        value: json!({"id": id, "value": value}),
    }
}

fn poke(base: i64, next: i64, timestamp: Option<f64>, patch: Vec<PatchOp>) -> Poke {
    Poke {
        base_cookie: if base == 0 {
            Cookie::none()
        } else {
            Cookie(json!(base))
        },
        cookie: Cookie(json!(next)),
        last_mutation_id_changes: BTreeMap::new(),
        patch,
        timestamp,
    }
}

/// Three pokes stamped +100/+120/+140 ms delivered
/// together at t=0. The first tick initializes the offset with 250 ms of
/// batching; the first poke applies once due, the rest individually on
/// later ticks.
#[test]
fn test_timed_pokes_pace_across_ticks() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();

    engine
        .enqueue_poke(poke(0, 1, Some(100.0), vec![issue_patch("a", 1)]))
        .unwrap();
    engine
        .enqueue_poke(poke(1, 2, Some(120.0), vec![issue_patch("b", 2)]))
        .unwrap();
    engine
        .enqueue_poke(poke(2, 3, Some(140.0), vec![issue_patch("c", 3)]))
        .unwrap();

    // First tick only schedules.
    let outcome = engine.tick(0.0).unwrap();
    assert_eq!(outcome.applied_pokes, 0);
    assert!(outcome.reschedule);
    assert!(engine.query_rows(id).unwrap().is_empty());

    // Due at 100 + (0 − 100 + 250) = 250.
    let outcome = engine.tick(250.0).unwrap();
    assert_eq!(outcome.applied_pokes, 1);
    assert_eq!(engine.query_rows(id).unwrap(), vec![issue_row("a", 1)]);
    assert_eq!(engine.cookie(), &Cookie(json!(1)));

    engine.tick(270.0).unwrap();
    assert_eq!(engine.query_rows(id).unwrap().len(), 2);

    let outcome = engine.tick(290.0).unwrap();
    assert_eq!(engine.query_rows(id).unwrap().len(), 3);
    assert!(!outcome.reschedule);
    assert_eq!(engine.cookie(), &Cookie(json!(3)));

    let stats = engine.playback_stats();
    assert_eq!(stats.timed_pokes, 3);
    assert_eq!(stats.missed_pokes, 0);
}

#[test]
fn test_untimed_pokes_apply_on_first_tick() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();

    engine
        .enqueue_poke(poke(0, 1, None, vec![issue_patch("a", 1)]))
        .unwrap();
    engine
        .enqueue_poke(poke(1, 2, None, vec![issue_patch("b", 2)]))
        .unwrap();

    let outcome = engine.tick(5.0).unwrap();
    assert_eq!(outcome.applied_pokes, 2);
    assert_eq!(engine.query_rows(id).unwrap().len(), 2);
    assert_eq!(engine.cookie(), &Cookie(json!(2)));
}

/// Merging two mergeable pokes then applying equals applying each in
/// order.
#[test]
fn test_merge_then_apply_equivalence() {
    // Apply individually.
    let mut sequential = engine_with(vec![issues_schema()]);
    let seq_query = sequential.register_query(Query::table("issues")).unwrap();
    sequential
        .enqueue_poke(poke(0, 1, None, vec![issue_patch("a", 1)]))
        .unwrap();
    sequential.tick(0.0).unwrap();
    sequential
        .enqueue_poke(poke(1, 2, None, vec![issue_patch("a", 11), issue_patch("b", 2)]))
        .unwrap();
    sequential.tick(1.0).unwrap();

    // Deliver both before one tick so they merge.
    let mut merged = engine_with(vec![issues_schema()]);
    let merged_query = merged.register_query(Query::table("issues")).unwrap();
    merged
        .enqueue_poke(poke(0, 1, None, vec![issue_patch("a", 1)]))
        .unwrap();
    merged
        .enqueue_poke(poke(1, 2, None, vec![issue_patch("a", 11), issue_patch("b", 2)]))
        .unwrap();
    let outcome = merged.tick(0.0).unwrap();
    assert_eq!(outcome.applied_pokes, 2);

    assert_eq!(
        sequential.query_rows(seq_query).unwrap(),
        merged.query_rows(merged_query).unwrap()
    );
    assert_eq!(sequential.cookie(), merged.cookie());
}

#[test]
fn test_out_of_order_chain_drops_buffer_and_signals() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();

    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    engine.set_on_out_of_order(Box::new(move || {
        counter.set(counter.get() + 1);
    }));

    engine
        .enqueue_poke(poke(0, 1, None, vec![issue_patch("a", 1)]))
        .unwrap();
    // Chain break: base 7 does not follow cookie 1.
    engine
        .enqueue_poke(poke(7, 8, None, vec![issue_patch("b", 2)]))
        .unwrap();

    let outcome = engine.tick(0.0).unwrap();
    assert!(outcome.out_of_order);
    assert_eq!(fired.get(), 1);
    // Nothing was applied: the engine awaits a fresh chain.
    assert!(engine.query_rows(id).unwrap().is_empty());
    assert!(engine.cookie().is_none());

    // A fresh chain replays cleanly.
    engine
        .enqueue_poke(poke(0, 1, None, vec![issue_patch("a", 1)]))
        .unwrap();
    engine.tick(10.0).unwrap();
    assert_eq!(engine.query_rows(id).unwrap(), vec![issue_row("a", 1)]);
}

#[test]
fn test_self_originated_poke_is_untimed() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();

    let mut self_poke = poke(0, 1, Some(100.0), vec![issue_patch("a", 1)]);
    self_poke
        .last_mutation_id_changes
        .insert("test-client".to_string(), 3);
    engine.enqueue_poke(self_poke).unwrap();

    // Applies immediately despite the timestamp.
    let outcome = engine.tick(0.0).unwrap();
    assert_eq!(outcome.applied_pokes, 1);
    assert_eq!(engine.query_rows(id).unwrap(), vec![issue_row("a", 1)]);
    assert_eq!(engine.last_mutation_id("test-client"), 3);
    assert_eq!(engine.playback_stats().timed_pokes, 0);
}

#[test]
fn test_poke_del_removes_row() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();

    engine
        .enqueue_poke(poke(0, 1, None, vec![issue_patch("a", 1)]))
        .unwrap();
    engine.tick(0.0).unwrap();
    assert_eq!(engine.query_rows(id).unwrap().len(), 1);

    let del = PatchOp::Del {
        key: row_key("issues", &RowKey(vec![Value::from("a")])),
    };
    engine.enqueue_poke(poke(1, 2, None, vec![del])).unwrap();
    engine.tick(1.0).unwrap();
    assert!(engine.query_rows(id).unwrap().is_empty());
}

#[test]
fn test_disconnect_clears_pending_playback() {
    let mut engine = engine_with(vec![issues_schema()]);
    let id = engine.register_query(Query::table("issues")).unwrap();

    engine
        .enqueue_poke(poke(0, 1, Some(100.0), vec![issue_patch("a", 1)]))
        .unwrap();
    engine.tick(0.0).unwrap(); // schedules only

    engine.disconnect();
    let outcome = engine.tick(1_000.0).unwrap();
    assert_eq!(outcome.applied_pokes, 0);
    assert!(!outcome.reschedule);
    assert!(engine.query_rows(id).unwrap().is_empty());
}
