//! rivulet — incremental view maintenance core for a sync-capable
//! client/server database.
//!
//! The engine maintains materialized views over in-memory tables. When
//! rows change — local mutations, server pokes, replication — only the
//! deltas needed to keep each view correct propagate through the operator
//! graph, in deterministic sort order, with well-defined overlay semantics
//! while a push is in flight to multiple outputs.
//!
//! # Theoretical Basis
//!
//! - **DBSP**: Budiu et al., "DBSP: Automatic Incremental View
//!   Maintenance for Rich Query Languages", PVLDB 2023.
//!   <https://arxiv.org/abs/2203.16684>
//! - **Gupta & Mumick (1995)**: "Maintenance of Materialized Views:
//!   Problems, Techniques, and Applications", IEEE Data Engineering
//!   Bulletin.
//!
//! # Architecture
//!
//! | Layer | Module | Responsibility |
//! |---|---|---|
//! | Row/value model | [`value`], [`schema`] | typed rows, comparators, orderings |
//! | Source/index | [`ivm::source`] | per-table ordered storage, overlay-aware scans |
//! | Operators | [`ivm::operators`] | filter, constrain, start-at, joins, reduce, fan-out |
//! | Apply/view | [`ivm::view`] | stable ordered view updates, per-tick batching |
//! | Poke playback | [`playback`] | paced replay of server patches |
//!
//! The surrounding glue — [`kv`] persistence boundary, [`mutation`] layer,
//! [`query`] builder, and the [`engine`] assembly — consumes these through
//! narrow interfaces.
//!
//! # Concurrency model
//!
//! The core is single-threaded and cooperative: state is shared with
//! `Rc`/`RefCell`, pushes complete atomically with respect to the current
//! task, and fetch cursors are lazy but fail fast once a subsequent push
//! invalidates them. An embedding host that wants several engines runs
//! several instances.

pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod ivm;
pub mod kv;
pub mod mutation;
pub mod playback;
pub mod query;
pub mod schema;
pub mod value;

pub use condition::{Condition, Operand, SimpleOp};
pub use config::EngineConfig;
pub use engine::{Engine, QueryId};
pub use error::{ErrorKind, RivuletError};
pub use ivm::{Basis, Change, Constraint, FetchRequest, MemorySource, Node, Start, View};
pub use kv::{Cookie, MemStore, ReadTransaction, ScanOptions, WriteTransaction};
pub use playback::{PatchOp, Poke, PokePlayer};
pub use query::{Correlation, JoinKind, Query, Relationship};
pub use schema::{ColumnSpec, ColumnType, SortSpec, TableSchema};
pub use value::{Direction, Row, RowKey, Value};
