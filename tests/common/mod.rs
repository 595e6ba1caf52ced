//! Shared helpers for engine integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use rivulet::{
    ColumnSpec, ColumnType, Engine, EngineConfig, Row, TableSchema, Value,
};

/// `issues(id pk text, value int)`.
pub fn issues_schema() -> TableSchema {
    TableSchema::new(
        "issues",
        BTreeMap::from([
            ("id".to_string(), ColumnSpec::required(ColumnType::String)),
            ("value".to_string(), ColumnSpec::required(ColumnType::Int)),
        ]),
        vec!["id".to_string()],
    )
    .unwrap()
}

/// `foo(id pk text, far_id text?)`.
pub fn foo_schema() -> TableSchema {
    TableSchema::new(
        "foo",
        BTreeMap::from([
            ("id".to_string(), ColumnSpec::required(ColumnType::String)),
            (
                "far_id".to_string(),
                ColumnSpec::optional(ColumnType::String),
            ),
        ]),
        vec!["id".to_string()],
    )
    .unwrap()
}

/// `far(id pk text)`.
pub fn far_schema() -> TableSchema {
    TableSchema::new(
        "far",
        BTreeMap::from([("id".to_string(), ColumnSpec::required(ColumnType::String))]),
        vec!["id".to_string()],
    )
    .unwrap()
}

/// `issue(id pk text)`.
pub fn issue_schema() -> TableSchema {
    TableSchema::new(
        "issue",
        BTreeMap::from([("id".to_string(), ColumnSpec::required(ColumnType::String))]),
        vec!["id".to_string()],
    )
    .unwrap()
}

/// `comment(id pk text, issue_id text)`.
pub fn comment_schema() -> TableSchema {
    TableSchema::new(
        "comment",
        BTreeMap::from([
            ("id".to_string(), ColumnSpec::required(ColumnType::String)),
            (
                "issue_id".to_string(),
                ColumnSpec::required(ColumnType::String),
            ),
        ]),
        vec!["id".to_string()],
    )
    .unwrap()
}

pub fn issue_row(id: &str, value: i64) -> Row {
    Row::from_pairs([("id", Value::from(id)), ("value", Value::Int(value))])
}

/// Engine with the default config and the given tables registered.
pub fn engine_with(schemas: Vec<TableSchema>) -> Engine {
    let mut engine = Engine::new("test-client", EngineConfig::default());
    for schema in schemas {
        engine.register_table(schema).unwrap();
    }
    engine
}
