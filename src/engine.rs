//! Engine assembly.
//!
//! An [`Engine`] owns the per-table sources, the client-side key/value
//! store, the mutator registry, the poke playback scheduler, and every
//! registered query's compiled pipeline. It is the narrow surface the
//! embedding layer talks to:
//!
//! - `register_table` / `register_query` / `retire_query`
//! - `mutate` — run a registered mutator, replay its diff into sources
//! - `enqueue_poke` / `tick` — server-driven updates at paced ticks
//!
//! Query compilation turns a builder tree into a linear pipeline: source
//! connections feed filters, relationship subqueries feed joins, and the
//! terminal stage applies consolidated deltas to the view. Stage order is
//! the topological order of the compiled operator graph.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::debug;

use crate::condition::Condition;
use crate::config::EngineConfig;
use crate::error::RivuletError;
use crate::ivm::graph::{NodeId, OpGraph};
use crate::ivm::operators::join::Join;
use crate::ivm::operators::join_common::JoinArgs;
use crate::ivm::operators::left_join::LeftJoin;
use crate::ivm::operators::reduce::Reduce;
use crate::ivm::operators::{DeltaBuffer, consolidate};
use crate::ivm::operators::filter::Filter;
use crate::ivm::source::{MemorySource, SourceInput};
use crate::ivm::stream::{Change, FetchRequest, Output};
use crate::ivm::view::{View, ViewSink};
use crate::kv::{Cookie, DiffEntry, DiffSink, MemStore, WriteTransaction, parse_row_key};
use crate::mutation::{MutationHandle, Mutators};
use crate::playback::{ClientId, PatchOp, Poke, PokePlayer, TickOutcome};
use crate::query::{JoinKind, Query};
use crate::schema::{SortSpec, TableSchema};
use crate::value::{Direction, Row};

/// Handle to a registered query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

enum Stage {
    InnerJoin {
        node: NodeId,
        op: Join,
        a: Rc<RefCell<DeltaBuffer>>,
        b: Rc<RefCell<DeltaBuffer>>,
        out: Rc<RefCell<DeltaBuffer>>,
    },
    LeftJoin {
        node: NodeId,
        op: LeftJoin,
        a: Rc<RefCell<DeltaBuffer>>,
        b: Rc<RefCell<DeltaBuffer>>,
        out: Rc<RefCell<DeltaBuffer>>,
    },
    Reduce {
        node: NodeId,
        op: Reduce,
        input: Rc<RefCell<DeltaBuffer>>,
        out: Rc<RefCell<DeltaBuffer>>,
    },
    ViewApply {
        node: NodeId,
        input: Rc<RefCell<DeltaBuffer>>,
        view: Rc<RefCell<View>>,
    },
}

impl Stage {
    fn node(&self) -> NodeId {
        match self {
            Stage::InnerJoin { node, .. }
            | Stage::LeftJoin { node, .. }
            | Stage::Reduce { node, .. }
            | Stage::ViewApply { node, .. } => *node,
        }
    }

    fn run(&mut self) -> Result<(), RivuletError> {
        match self {
            Stage::InnerJoin { op, a, b, out, .. } => {
                let delta_a = a.borrow_mut().drain();
                let delta_b = b.borrow_mut().drain();
                if !delta_a.is_empty() || !delta_b.is_empty() {
                    out.borrow_mut().extend(op.step(delta_a, delta_b));
                }
                Ok(())
            }
            Stage::LeftJoin { op, a, b, out, .. } => {
                let delta_a = a.borrow_mut().drain();
                let delta_b = b.borrow_mut().drain();
                if !delta_a.is_empty() || !delta_b.is_empty() {
                    out.borrow_mut().extend(op.step(delta_a, delta_b));
                }
                Ok(())
            }
            Stage::Reduce { op, input, out, .. } => {
                let deltas = input.borrow_mut().drain();
                if !deltas.is_empty() {
                    out.borrow_mut().extend(op.step(deltas)?);
                }
                Ok(())
            }
            Stage::ViewApply { input, view, .. } => {
                let deltas = consolidate(input.borrow_mut().drain());
                if !deltas.is_empty() {
                    view.borrow_mut().apply_deltas(deltas)?;
                }
                Ok(())
            }
        }
    }
}

struct CompiledQuery {
    /// Source connections, destroyed on retire (dropping them detaches
    /// from the sources and releases index refcounts).
    inputs: Vec<SourceInput>,
    /// Delta stages in topological order. Empty for direct pipelines that
    /// sink changes straight into the view.
    stages: Vec<Stage>,
    view: Rc<RefCell<View>>,
}

pub struct Engine {
    config: EngineConfig,
    sources: HashMap<String, MemorySource>,
    store: MemStore,
    mutators: Mutators,
    player: PokePlayer,
    last_mutation_ids: BTreeMap<ClientId, u64>,
    queries: BTreeMap<u64, CompiledQuery>,
    next_query_id: u64,
}

impl Engine {
    pub fn new(client_id: impl Into<ClientId>, config: EngineConfig) -> Engine {
        let player = PokePlayer::new(client_id, &config);
        Engine {
            config,
            sources: HashMap::new(),
            store: MemStore::new(),
            mutators: Mutators::new(),
            player,
            last_mutation_ids: BTreeMap::new(),
            queries: BTreeMap::new(),
            next_query_id: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Tables ─────────────────────────────────────────────────────────

    pub fn register_table(&mut self, schema: TableSchema) -> Result<(), RivuletError> {
        let name = schema.table_name.clone();
        if self.sources.contains_key(&name) {
            return Err(RivuletError::InvalidArgument(format!(
                "table {name} already registered"
            )));
        }
        self.sources.insert(name, MemorySource::new(schema));
        Ok(())
    }

    pub fn source(&self, table: &str) -> Result<&MemorySource, RivuletError> {
        self.sources
            .get(table)
            .ok_or_else(|| RivuletError::UnknownTable(table.to_string()))
    }

    /// Apply one change to a table and run every registered pipeline.
    pub fn apply_change(&mut self, table: &str, change: Change) -> Result<(), RivuletError> {
        self.source(table)?.push(change)?;
        commit_version(&mut self.queries)
    }

    // ── Mutations ──────────────────────────────────────────────────────

    pub fn register_mutator(
        &mut self,
        namespace: &str,
        name: &str,
        mutator: crate::mutation::MutatorFn,
    ) -> Result<(), RivuletError> {
        self.mutators.register(namespace, name, mutator)
    }

    pub fn begin_mutation(&self, name: &str, args: serde_json::Value) -> MutationHandle {
        self.mutators.begin_mutation(name, args)
    }

    pub fn begin_batch(&self, name: &str, args: serde_json::Value) -> MutationHandle {
        self.mutators.begin_batch(name, args)
    }

    /// Execute a registered mutator and replay its committed diff into
    /// sources.
    pub fn mutate(&mut self, name: &str, args: serde_json::Value) -> Result<(), RivuletError> {
        let handle = self.mutators.begin_mutation(name, args);
        let diff = self.mutators.execute(&handle, &mut self.store)?;
        replay_diff(&self.sources, &diff)?;
        commit_version(&mut self.queries)
    }

    /// Run several mutations as one batch under a batch handle.
    pub fn batch<F>(&mut self, handle: &MutationHandle, f: F) -> Result<(), RivuletError>
    where
        F: FnOnce(&mut dyn crate::kv::WriteTransaction) -> Result<(), RivuletError>,
    {
        let diff = self.mutators.batch(handle, &mut self.store, f)?;
        replay_diff(&self.sources, &diff)?;
        commit_version(&mut self.queries)
    }

    pub fn last_mutation_id(&self, client: &str) -> u64 {
        self.last_mutation_ids.get(client).copied().unwrap_or(0)
    }

    pub fn cookie(&self) -> &Cookie {
        self.store.cookie()
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// Compile a query tree and hydrate its view from current table
    /// contents. The initial snapshot publishes immediately.
    pub fn register_query(&mut self, query: Query) -> Result<QueryId, RivuletError> {
        let root_schema = self.source(&query.table)?.schema().clone();
        query.validate(&root_schema)?;
        if query
            .conditions
            .as_ref()
            .is_some_and(|c| c.references_exists())
        {
            return Err(RivuletError::InvalidArgument(format!(
                "query on {}: exists conditions are expressed as relationships",
                query.table
            )));
        }

        let parent_sort = query
            .order_by
            .clone()
            .unwrap_or_else(|| root_schema.pk_sort())
            .normalized(&root_schema);

        let aliases: Vec<String> = query
            .relationships
            .iter()
            .map(|r| r.output_alias().to_string())
            .collect();

        let view_sort = if query.relationships.is_empty() {
            parent_sort.clone()
        } else {
            // Join results need the synthetic id as the final tiebreak:
            // one parent row may own several result rows.
            let mut columns = parent_sort.0.clone();
            columns.push(("id".to_string(), Direction::Asc));
            SortSpec(columns)
        };

        let view = Rc::new(RefCell::new(
            View::new(view_sort)
                .with_relationships(aliases)
                .with_limit(query.limit),
        ));

        let mut graph = OpGraph::new();
        let mut inputs = Vec::new();
        let mut stages = Vec::new();

        if query.relationships.is_empty() {
            let (input, node) =
                self.connect_pipeline_endpoint(&query, &parent_sort, &mut graph, {
                    let sink: Rc<RefCell<dyn Output>> =
                        Rc::new(RefCell::new(ViewSink::new(view.clone())));
                    sink
                })?;
            let view_node = graph.add_node("view");
            graph.add_edge(node, view_node);

            // Hydrate straight into the view.
            for node in input.fetch(FetchRequest::all())? {
                view.borrow_mut().apply(Change::Add(node?))?;
            }
            inputs.push(input);
        } else {
            let (buffer, _pk, node) =
                self.compile_pipeline(&query, &mut graph, &mut inputs, &mut stages)?;
            let view_node = graph.add_node("view");
            graph.add_edge(node, view_node);
            stages.push(Stage::ViewApply {
                node: view_node,
                input: buffer,
                view: view.clone(),
            });
        }

        // Stage order = topological order of the compiled graph.
        let order = graph.topological_order()?;
        let position: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        stages.sort_by_key(|s| position.get(&s.node()).copied().unwrap_or(usize::MAX));

        let mut compiled = CompiledQuery {
            inputs,
            stages,
            view: view.clone(),
        };
        // Flush hydration deltas through the pipeline.
        for stage in &mut compiled.stages {
            stage.run()?;
        }
        view.borrow_mut().flush();

        let id = self.next_query_id;
        self.next_query_id += 1;
        self.queries.insert(id, compiled);
        debug!(query = id, table = %query.table, "query registered");
        Ok(QueryId(id))
    }

    /// Compile a subtree: source connection (+ filter) into a delta
    /// buffer, then one join per relationship. Returns the terminal
    /// buffer, its rows' key columns, and its graph node.
    fn compile_pipeline(
        &mut self,
        query: &Query,
        graph: &mut OpGraph,
        inputs: &mut Vec<SourceInput>,
        stages: &mut Vec<Stage>,
    ) -> Result<(Rc<RefCell<DeltaBuffer>>, Vec<String>, NodeId), RivuletError> {
        let schema = self.source(&query.table)?.schema().clone();
        query.validate(&schema)?;
        if query
            .conditions
            .as_ref()
            .is_some_and(|c| c.references_exists())
        {
            // Relationship presence compiles to joins; a residual exists
            // filter has no child data to probe here.
            return Err(RivuletError::InvalidArgument(format!(
                "query on {}: exists conditions are expressed as relationships",
                query.table
            )));
        }
        let sort = query
            .order_by
            .clone()
            .unwrap_or_else(|| schema.pk_sort())
            .normalized(&schema);

        let buffer = Rc::new(RefCell::new(DeltaBuffer::new()));
        let (input, node) = self.connect_pipeline_endpoint(query, &sort, graph, {
            let endpoint: Rc<RefCell<dyn Output>> = buffer.clone();
            endpoint
        })?;

        // Hydrate the buffer with the current table contents.
        for fetched in input.fetch(FetchRequest::all())? {
            buffer.borrow_mut().push(Change::Add(fetched?))?;
        }
        inputs.push(input);

        let mut current = (buffer, schema.primary_key.clone(), node);
        for relationship in &query.relationships {
            let (child_buffer, child_pk, child_node) =
                self.compile_pipeline(&relationship.subquery, graph, inputs, stages)?;

            let args = JoinArgs {
                a_table: query.table.clone(),
                b_table: relationship.subquery.table.clone(),
                a_join_col: relationship.correlation.parent_fields[0].clone(),
                b_join_col: relationship.correlation.child_fields[0].clone(),
                a_pk_cols: current.1.clone(),
                b_pk_cols: child_pk,
                b_alias: relationship.output_alias().to_string(),
            };
            let out = Rc::new(RefCell::new(DeltaBuffer::new()));
            let join_node = graph.add_node(format!("join:{}", relationship.name));
            graph.add_edge(current.2, join_node);
            graph.add_edge(child_node, join_node);

            match relationship.kind {
                JoinKind::Inner => stages.push(Stage::InnerJoin {
                    node: join_node,
                    op: Join::new(args),
                    a: current.0,
                    b: child_buffer,
                    out: out.clone(),
                }),
                JoinKind::Left => stages.push(Stage::LeftJoin {
                    node: join_node,
                    op: LeftJoin::new(args),
                    a: current.0,
                    b: child_buffer,
                    out: out.clone(),
                }),
            }
            // Join results key on the synthetic id.
            current = (out, vec!["id".to_string()], join_node);
        }
        Ok(current)
    }

    /// Connect to a query's table with its conditions as residual filters,
    /// interposing a filter operator when the source does not apply them
    /// all.
    fn connect_pipeline_endpoint(
        &mut self,
        query: &Query,
        sort: &SortSpec,
        graph: &mut OpGraph,
        endpoint: Rc<RefCell<dyn Output>>,
    ) -> Result<(SourceInput, NodeId), RivuletError> {
        let filters: Vec<Condition> = query.conditions.clone().into_iter().collect();
        let input = self.source(&query.table)?.connect(sort.clone(), filters);

        let node = graph.add_node(format!("source:{}", query.table));
        let output: Rc<RefCell<dyn Output>> = match (&query.conditions, input.applied_filters()) {
            (Some(condition), false) => {
                Rc::new(RefCell::new(Filter::new(condition.clone(), endpoint)))
            }
            _ => endpoint,
        };
        input.set_output(output);
        Ok((input, node))
    }

    /// Register a group-by reduction over one table's (filtered) rows.
    ///
    /// The query's relationships must be empty; its conditions prefilter
    /// the reduced multiset. Output rows order under `output_sort`.
    pub fn register_reduction(
        &mut self,
        query: Query,
        reduce: Reduce,
        output_sort: SortSpec,
    ) -> Result<QueryId, RivuletError> {
        if !query.relationships.is_empty() {
            return Err(RivuletError::InvalidArgument(
                "reductions do not take relationships".to_string(),
            ));
        }
        let view = Rc::new(RefCell::new(View::new(output_sort)));

        let mut graph = OpGraph::new();
        let mut inputs = Vec::new();
        let mut stages = Vec::new();

        let (buffer, _pk, node) =
            self.compile_pipeline(&query, &mut graph, &mut inputs, &mut stages)?;
        let reduce_node = graph.add_node("reduce");
        let view_node = graph.add_node("view");
        graph.add_edge(node, reduce_node);
        graph.add_edge(reduce_node, view_node);

        let out = Rc::new(RefCell::new(DeltaBuffer::new()));
        stages.push(Stage::Reduce {
            node: reduce_node,
            op: reduce,
            input: buffer,
            out: out.clone(),
        });
        stages.push(Stage::ViewApply {
            node: view_node,
            input: out,
            view: view.clone(),
        });

        let order = graph.topological_order()?;
        let position: HashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        stages.sort_by_key(|s| position.get(&s.node()).copied().unwrap_or(usize::MAX));

        let mut compiled = CompiledQuery {
            inputs,
            stages,
            view: view.clone(),
        };
        for stage in &mut compiled.stages {
            stage.run()?;
        }
        view.borrow_mut().flush();

        let id = self.next_query_id;
        self.next_query_id += 1;
        self.queries.insert(id, compiled);
        Ok(QueryId(id))
    }

    /// The view of a registered query.
    pub fn view(&self, id: QueryId) -> Result<Rc<RefCell<View>>, RivuletError> {
        self.queries
            .get(&id.0)
            .map(|q| q.view.clone())
            .ok_or_else(|| RivuletError::InvalidArgument(format!("unknown query {:?}", id)))
    }

    /// Published rows of a registered query.
    pub fn query_rows(&self, id: QueryId) -> Result<Vec<Row>, RivuletError> {
        Ok(self.view(id)?.borrow().rows())
    }

    /// Retire a query: destroy its connections and drop its state.
    pub fn retire_query(&mut self, id: QueryId) {
        if let Some(compiled) = self.queries.remove(&id.0) {
            for input in &compiled.inputs {
                input.destroy();
            }
            debug!(query = id.0, "query retired");
        }
    }

    // ── Pokes and ticks ────────────────────────────────────────────────

    pub fn set_on_out_of_order(&mut self, callback: Box<dyn FnMut()>) {
        self.player.set_on_out_of_order(callback);
    }

    pub fn enqueue_poke(&mut self, poke: Poke) -> Result<(), RivuletError> {
        self.player.enqueue(poke)
    }

    pub fn playback_stats(&self) -> crate::playback::PlaybackStats {
        self.player.stats()
    }

    /// One animation tick: play back due pokes, then publish every dirty
    /// view exactly once.
    pub fn tick(&mut self, now_ms: f64) -> Result<TickOutcome, RivuletError> {
        let Engine {
            player,
            store,
            sources,
            queries,
            last_mutation_ids,
            ..
        } = self;
        let mut apply = |poke: Poke| {
            apply_poke(store, sources, queries, last_mutation_ids, poke)
        };
        let outcome = player.tick(now_ms, &mut apply)?;
        self.flush_views();
        Ok(outcome)
    }

    /// Disconnect from the server: drop buffered pokes and playback
    /// offset. Local state stays intact.
    pub fn disconnect(&mut self) {
        self.player.disconnect();
    }

    /// Publish every dirty view.
    pub fn flush_views(&mut self) {
        for compiled in self.queries.values() {
            compiled.view.borrow_mut().flush();
        }
    }
}

/// Run every query's delta stages in topological order.
fn commit_version(queries: &mut BTreeMap<u64, CompiledQuery>) -> Result<(), RivuletError> {
    for compiled in queries.values_mut() {
        for stage in &mut compiled.stages {
            stage.run()?;
        }
    }
    Ok(())
}

/// Diff sink that replays row transitions into sources. Keys outside the
/// `row/` keyspace, and tables without a registered source, belong to the
/// embedding client and are skipped.
struct SourceReplay<'a> {
    sources: &'a HashMap<String, MemorySource>,
}

impl DiffSink for SourceReplay<'_> {
    fn entry(&mut self, entry: &DiffEntry) -> Result<(), RivuletError> {
        let Some(table) = parse_row_key(&entry.key) else {
            return Ok(());
        };
        let Some(source) = self.sources.get(table) else {
            return Ok(());
        };
        let decode = |value: &serde_json::Value| {
            Row::from_json(value).ok_or_else(|| {
                RivuletError::InvalidMessage(format!(
                    "key {}: row value is not a JSON object",
                    entry.key
                ))
            })
        };
        let old = entry.old.as_ref().map(&decode).transpose()?;
        let new = entry.new.as_ref().map(&decode).transpose()?;
        let change = match (old, new) {
            (None, Some(new)) => Change::add(new),
            (Some(old), None) => Change::remove(old),
            (Some(old), Some(new)) => Change::edit(old, new),
            (None, None) => return Ok(()),
        };
        source.push(change)
    }
}

fn replay_diff(
    sources: &HashMap<String, MemorySource>,
    diff: &[DiffEntry],
) -> Result<(), RivuletError> {
    crate::kv::replay_into(diff, &mut SourceReplay { sources })
}

/// Apply one (merged) poke: verify the cookie chain, commit the patch,
/// replay the diff into sources, and advance mutation ids.
fn apply_poke(
    store: &mut MemStore,
    sources: &HashMap<String, MemorySource>,
    queries: &mut BTreeMap<u64, CompiledQuery>,
    last_mutation_ids: &mut BTreeMap<ClientId, u64>,
    poke: Poke,
) -> Result<(), RivuletError> {
    if store.cookie() != &poke.base_cookie {
        return Err(RivuletError::InvalidConnectionRequestBaseCookie(format!(
            "unexpected base cookie: have {:?}, poke expects {:?}",
            store.cookie(),
            poke.base_cookie
        )));
    }

    let mut tx = store.write();
    for op in &poke.patch {
        match op {
            PatchOp::Put { key, value } => tx.put(key, value.clone()),
            PatchOp::Del { key } => tx.del(key),
        }
    }
    let diff = tx.commit();
    replay_diff(sources, &diff)?;
    commit_version(queries)?;

    store.set_cookie(poke.cookie);
    for (client, id) in &poke.last_mutation_id_changes {
        let entry = last_mutation_ids.entry(client.clone()).or_insert(*id);
        *entry = (*entry).max(*id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::row_key;
    use crate::schema::{ColumnSpec, ColumnType};
    use crate::value::{RowKey, Value};
    use serde_json::json;

    fn issues_schema() -> TableSchema {
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

    fn issue(id: &str, v: i64) -> Row {
        Row::from_pairs([("id", Value::from(id)), ("value", Value::Int(v))])
    }

    fn engine() -> Engine {
        let mut engine = Engine::new("c1", EngineConfig::default());
        engine.register_table(issues_schema()).unwrap();
        engine
    }

    #[test]
    fn test_register_table_twice_rejected() {
        let mut engine = engine();
        let err = engine.register_table(issues_schema()).unwrap_err();
        assert!(matches!(err, RivuletError::InvalidArgument(_)));
    }

    #[test]
    fn test_query_over_prepopulated_table_hydrates() {
        let mut engine = engine();
        engine
            .apply_change("issues", Change::add(issue("b", 2)))
            .unwrap();
        engine
            .apply_change("issues", Change::add(issue("a", 1)))
            .unwrap();

        let id = engine.register_query(Query::table("issues")).unwrap();
        assert_eq!(engine.query_rows(id).unwrap(), vec![issue("a", 1), issue("b", 2)]);
    }

    #[test]
    fn test_mutation_flows_into_view() {
        let mut engine = engine();
        engine
            .register_mutator(
                "issue",
                "put",
                Rc::new(|tx, args| {
                    let row = Row::from_json(args).ok_or_else(|| {
                        RivuletError::InvalidArgument("expected row object".into())
                    })?;
                    let key = row_key("issues", &row.key(&["id".to_string()]));
                    tx.put(&key, args.clone());
                    Ok(())
                }),
            )
            .unwrap();

        let id = engine.register_query(Query::table("issues")).unwrap();
        engine
            .mutate("issue.put", json!({"id": "a", "value": 1}))
            .unwrap();
        engine.flush_views();
        assert_eq!(engine.query_rows(id).unwrap(), vec![issue("a", 1)]);
    }

    #[test]
    fn test_poke_apply_updates_cookie_and_views() {
        let mut engine = engine();
        let id = engine.register_query(Query::table("issues")).unwrap();

        let key = row_key("issues", &RowKey(vec![Value::from("a")]));
        let poke = Poke {
            base_cookie: Cookie::none(),
            cookie: Cookie(json!(1)),
            last_mutation_id_changes: BTreeMap::from([("c1".to_string(), 4)]),
            patch: vec![PatchOp::Put {
                key,
                value: json!({"id": "a", "value": 7}),
            }],
            timestamp: None,
        };
        engine.enqueue_poke(poke).unwrap();
        let outcome = engine.tick(0.0).unwrap();
        assert_eq!(outcome.applied_pokes, 1);
        assert_eq!(engine.cookie(), &Cookie(json!(1)));
        assert_eq!(engine.last_mutation_id("c1"), 4);
        assert_eq!(engine.query_rows(id).unwrap(), vec![issue("a", 7)]);
    }

    #[test]
    fn test_poke_with_wrong_base_cookie_signals() {
        let mut engine = engine();
        let poke = Poke {
            base_cookie: Cookie(json!(99)),
            cookie: Cookie(json!(100)),
            last_mutation_id_changes: BTreeMap::new(),
            patch: vec![],
            timestamp: None,
        };
        engine.enqueue_poke(poke).unwrap();
        let outcome = engine.tick(0.0).unwrap();
        assert!(outcome.out_of_order);
        assert!(engine.cookie().is_none());
    }

    #[test]
    fn test_retire_query_releases_connections() {
        let mut engine = engine();
        let id = engine.register_query(Query::table("issues")).unwrap();
        assert_eq!(engine.source("issues").unwrap().connection_count(), 1);
        engine.retire_query(id);
        assert_eq!(engine.source("issues").unwrap().connection_count(), 0);
        assert!(engine.query_rows(id).is_err());
    }
}
