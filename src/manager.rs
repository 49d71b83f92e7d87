//! Table-level orchestration facade
//!
//! [`TableManager`] is the single entry point for queries, fetches, and
//! mutations against the tables a process serves. It owns the two worker
//! pools, the query status registry with its background sweeper, and the
//! fetch and mutation engines. Shard resolution always goes through the
//! [`IndexServer`] handed in at construction; the manager never talks to
//! storage directly.

use crate::config::TablexConfig;
use crate::error::TablexError;
use crate::fanout::{FanoutExecutor, WorkerPool};
use crate::fetch::RowFetchEngine;
use crate::merge::{FacetAccumulator, HitMerger, SumMerger, TermsMerger};
use crate::mutation::MutationEngine;
use crate::query::{Predicate, SearchQuery, SearchResults};
use crate::row::RowMutation;
use crate::selector::{FetchResult, Selector};
use crate::shard::IndexServer;
use crate::status::{QueryState, QueryStatusRegistry, QueryStatusSnapshot};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

/// Query and mutation orchestration over the locally-served shards
pub struct TableManager {
    config: TablexConfig,
    server: Arc<dyn IndexServer>,
    registry: Arc<QueryStatusRegistry>,
    read_executor: Arc<FanoutExecutor>,
    fetch: RowFetchEngine,
    mutations: MutationEngine,
    closed: AtomicBool,
}

impl TableManager {
    /// Create a manager over the given server
    ///
    /// Validates the configuration, builds both worker pools, and starts
    /// the status sweeper.
    pub async fn new(server: Arc<dyn IndexServer>, config: TablexConfig) -> Result<Self> {
        let config = config.build()?;

        let registry = Arc::new(QueryStatusRegistry::new(
            config.status_retention(),
            config.status_sweep_interval(),
        ));
        registry.start_sweeper();

        let read_executor = Arc::new(FanoutExecutor::new(
            WorkerPool::new("reads", config.worker_threads)?,
            config.task_timeout(),
        ));
        let mutate_executor = Arc::new(FanoutExecutor::new(
            WorkerPool::new("mutations", config.mutate_worker_threads)?,
            config.task_timeout(),
        ));
        let fetch = RowFetchEngine::new(
            Arc::clone(&server),
            Arc::clone(&read_executor),
            config.max_heap_per_row_fetch,
        );
        let mutations = MutationEngine::new(
            Arc::clone(&server),
            Arc::new(fetch.clone()),
            mutate_executor,
        );

        info!(
            worker_threads = config.worker_threads,
            mutate_worker_threads = config.mutate_worker_threads,
            "table manager started"
        );
        Ok(Self {
            config,
            server,
            registry,
            read_executor,
            fetch,
            mutations,
            closed: AtomicBool::new(false),
        })
    }

    /// Run a query against every shard of a table and merge the results
    ///
    /// The query is registered for status introspection and cancellation
    /// for exactly as long as it runs. When the query carries a selector,
    /// fetch results are materialized for the merged window hits only.
    /// Cancellation surfaces as [`TablexError::QueryCancelled`] or
    /// [`TablexError::BackPressureCancelled`] depending on who asked.
    pub async fn query(&self, table: &str, query: SearchQuery) -> Result<SearchResults> {
        self.ensure_open()?;
        let started = Instant::now();
        let shard_map = self.server.shard_map(table).await?;
        let total_shards = shard_map.len();
        debug!(table, uuid = %query.uuid, shards = total_shards, "running query");

        let running = Arc::new(AtomicBool::new(true));
        let status = self
            .registry
            .new_status(table, &query, total_shards, Arc::clone(&running));

        let window = usize::try_from(query.start)
            .unwrap_or(usize::MAX)
            .saturating_add(query.fetch);
        let merger = HitMerger {
            start: query.start,
            fetch: query.fetch,
        };
        let accumulator = Arc::new(FacetAccumulator::new(&query.facets));
        let facet_list = Arc::new(query.facets.clone());
        let delay = self.config.debug_run_slow();
        let score_mode = query.score_mode;

        let dispatched = self
            .read_executor
            .dispatch(
                table,
                "query",
                shard_map,
                |shard, index| {
                    let status = Arc::clone(&status);
                    let running = Arc::clone(&running);
                    let accumulator = Arc::clone(&accumulator);
                    let facet_list = Arc::clone(&facet_list);
                    let predicate = query.predicate.clone();
                    async move {
                        let _attachment = status.attach(shard);
                        if let Some(delay) = delay {
                            debug_delay(delay, &running).await;
                        }
                        let hits = index
                            .search(&predicate, score_mode, window, Arc::clone(&running))
                            .await?;
                        for (position, facet) in facet_list.iter().enumerate() {
                            if accumulator.reached_minimum(position) {
                                continue;
                            }
                            let count = index.count(&facet.predicate, Arc::clone(&running)).await?;
                            accumulator.add(position, count);
                        }
                        Ok(hits)
                    }
                },
                &merger,
                || running.store(false, Ordering::SeqCst),
            )
            .await;

        let finished = match dispatched {
            Ok(mut results) => {
                if !accumulator.is_empty() {
                    results.facet_counts = Some(accumulator.counts());
                }
                match &query.selector {
                    Some(selector) => self
                        .materialize_hits(table, selector, &query.predicate, &mut results)
                        .await
                        .map(|()| results),
                    None => Ok(results),
                }
            }
            Err(error) => Err(error),
        };
        self.registry.remove_status(&status);

        match finished {
            Ok(results) => {
                debug!(
                    table,
                    uuid = %query.uuid,
                    total = results.total_results,
                    elapsed = ?started.elapsed(),
                    "query complete"
                );
                Ok(results)
            }
            Err(error) => Err(attribute_cancellation(table, query.uuid, status.state(), error)),
        }
    }

    /// Fetch the row or record a selector addresses
    pub async fn fetch_row(&self, table: &str, selector: &Selector) -> Result<FetchResult> {
        self.ensure_open()?;
        self.fetch.fetch_row(table, selector).await
    }

    /// Fetch a batch of selectors, results index-aligned with the input
    pub async fn fetch_row_batch(&self, table: &str, selectors: Vec<Selector>) -> Result<Vec<FetchResult>> {
        self.ensure_open()?;
        self.fetch.fetch_row_batch(table, selectors).await
    }

    /// Apply one row mutation
    pub async fn mutate(&self, mutation: RowMutation) -> Result<()> {
        self.ensure_open()?;
        self.mutations.mutate(mutation).await
    }

    /// Apply a batch of row mutations grouped by table and owning shard
    pub async fn mutate_batch(&self, mutations: Vec<RowMutation>) -> Result<()> {
        self.ensure_open()?;
        self.mutations.mutate_batch(mutations).await
    }

    /// Distinct stored terms of a column across every shard, merged sorted
    /// and capped at `size`
    pub async fn terms(
        &self,
        table: &str,
        family: &str,
        column: &str,
        start_with: &str,
        size: usize,
    ) -> Result<Vec<String>> {
        self.ensure_open()?;
        let shard_map = self.server.shard_map(table).await?;
        let merger = TermsMerger { size };
        let family = family.to_string();
        let column = column.to_string();
        let start_with = start_with.to_string();
        self.read_executor
            .dispatch(
                table,
                "terms",
                shard_map,
                |_shard, index| {
                    let family = family.clone();
                    let column = column.clone();
                    let start_with = start_with.clone();
                    async move { index.terms(&family, &column, &start_with, size).await }
                },
                &merger,
                || {},
            )
            .await
    }

    /// Number of records holding the exact column value, summed across
    /// shards
    pub async fn record_frequency(&self, table: &str, family: &str, column: &str, value: &str) -> Result<u64> {
        self.ensure_open()?;
        let shard_map = self.server.shard_map(table).await?;
        let family = family.to_string();
        let column = column.to_string();
        let value = value.to_string();
        self.read_executor
            .dispatch(
                table,
                "record_frequency",
                shard_map,
                |_shard, index| {
                    let family = family.clone();
                    let column = column.clone();
                    let value = value.clone();
                    async move { index.record_frequency(&family, &column, &value).await }
                },
                &SumMerger,
                || {},
            )
            .await
    }

    /// Merge every shard of the table down to at most `max_segments`
    /// segments, one shard at a time
    pub async fn optimize(&self, table: &str, max_segments: usize) -> Result<()> {
        self.ensure_open()?;
        let shard_map = self.server.shard_map(table).await?;
        info!(table, shards = shard_map.len(), max_segments, "optimizing table");
        for (shard, index) in shard_map {
            index
                .optimize(max_segments)
                .await
                .map_err(|error| error.with_operation_context("optimize", &shard))?;
        }
        Ok(())
    }

    /// Cancel a running query. Unknown or already-finished ids are a safe
    /// no-op; returns whether a running query was found.
    pub fn cancel_query(&self, table: &str, uuid: Uuid) -> bool {
        info!(table, %uuid, "cancelling query");
        self.registry.cancel(table, uuid)
    }

    /// Cancel a running query on behalf of resource pressure
    pub fn cancel_query_for_back_pressure(&self, table: &str, uuid: Uuid) -> bool {
        info!(table, %uuid, "cancelling query for back pressure");
        self.registry.cancel_for_back_pressure(table, uuid)
    }

    /// Snapshots of every query currently running against a table
    pub fn current_queries(&self, table: &str) -> Vec<QueryStatusSnapshot> {
        self.registry.current_queries(table)
    }

    /// Snapshot of one running query, if registered
    pub fn query_status(&self, table: &str, uuid: Uuid) -> Option<QueryStatusSnapshot> {
        self.registry.query_status(table, uuid)
    }

    /// Ids of every query currently running against a table
    pub fn query_status_ids(&self, table: &str) -> Vec<Uuid> {
        self.registry.query_status_ids(table)
    }

    /// Shut the manager down, stopping the status sweeper. Safe to call
    /// more than once; operations submitted afterwards fail with
    /// [`TablexError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing table manager");
        self.registry.close().await;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TablexError::Closed);
        }
        Ok(())
    }

    async fn materialize_hits(
        &self,
        table: &str,
        template: &Selector,
        predicate: &Predicate,
        results: &mut SearchResults,
    ) -> Result<()> {
        if results.hits.is_empty() {
            return Ok(());
        }
        let selectors: Vec<Selector> = results
            .hits
            .iter()
            .map(|hit| hit_selector(template, predicate, &hit.location_id))
            .collect();
        let fetched = self.fetch.fetch_row_batch(table, selectors).await?;
        for (hit, fetch_result) in results.hits.iter_mut().zip(fetched) {
            hit.fetch_result = Some(fetch_result);
        }
        Ok(())
    }
}

/// Rewrites a failed query's error to the cancellation cause recorded on
/// its status; anything else passes through untouched
fn attribute_cancellation(table: &str, uuid: Uuid, state: QueryState, error: TablexError) -> TablexError {
    match state {
        QueryState::Interrupted => TablexError::query_cancelled(table, uuid),
        QueryState::BackPressureInterrupted => TablexError::back_pressure_cancelled(table, uuid),
        _ => error,
    }
}

/// Build the per-hit fetch selector for window materialization: the query
/// selector's restrictions and highlight settings, addressed at the hit's
/// location. A highlight without its own predicate inherits the query's.
fn hit_selector(template: &Selector, predicate: &Predicate, location_id: &str) -> Selector {
    let mut selector = template.clone();
    selector.location_id = Some(location_id.to_string());
    selector.row_id = None;
    selector.record_id = None;
    if let Some(highlight) = selector.highlight.as_mut() {
        if highlight.predicate.is_none() {
            highlight.predicate = Some(predicate.clone());
        }
    }
    selector
}

/// Sleep in short slices so a cancellation during the debug delay is
/// noticed promptly
async fn debug_delay(delay: Duration, running: &AtomicBool) {
    let slice = Duration::from_millis(10);
    let mut remaining = delay;
    while !remaining.is_zero() && running.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        sleep(step).await;
        remaining -= step;
    }
}
