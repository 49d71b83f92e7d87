//! Query lifecycle tracking and cancellation
//!
//! Every submitted query registers a [`QueryStatus`] here for its lifetime.
//! The status owns the query's shared running flag, records which shard
//! tasks are attached at any moment, and remembers how the query ended so
//! cancellation errors can be attributed to the right cause. Removal happens
//! when the query finishes; a background sweeper purges statuses whose
//! removal was lost (a caller dropping the query future mid-flight), so the
//! registry's memory stays bounded.

use crate::query::SearchQuery;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle state of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryState {
    /// Shard tasks may still be producing results
    Running,
    /// Cancelled by a caller or operator
    Interrupted,
    /// Cancelled to relieve resource pressure
    BackPressureInterrupted,
    /// Finished without being cancelled
    Complete,
}

/// Point-in-time view of one query's status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatusSnapshot {
    pub uuid: Uuid,
    pub table: String,
    pub state: QueryState,
    /// Shards the query fans out to
    pub total_shards: usize,
    /// Shard tasks that have finished, successfully or not
    pub complete_shards: usize,
    /// Shards with a task attached right now, sorted
    pub attached_shards: Vec<String>,
    /// Time since the query was registered
    pub age: Duration,
}

/// Live bookkeeping for one query
///
/// Created by the registry, shared with every shard task of the query. The
/// running flag transitions true to false exactly once; the terminal state
/// records why.
#[derive(Debug)]
pub struct QueryStatus {
    uuid: Uuid,
    table: String,
    query: SearchQuery,
    started: Instant,
    running: Arc<AtomicBool>,
    state: Mutex<QueryState>,
    total_shards: usize,
    complete_shards: AtomicUsize,
    attached: Mutex<FxHashMap<String, usize>>,
}

impl QueryStatus {
    fn new(table: &str, query: &SearchQuery, total_shards: usize, running: Arc<AtomicBool>) -> Self {
        Self {
            uuid: query.uuid,
            table: table.to_string(),
            query: query.clone(),
            started: Instant::now(),
            running,
            state: Mutex::new(QueryState::Running),
            total_shards,
            complete_shards: AtomicUsize::new(0),
            attached: Mutex::new(FxHashMap::default()),
        }
    }

    /// Query id this status tracks
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Table the query runs against
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The submitted query
    pub fn query(&self) -> &SearchQuery {
        &self.query
    }

    /// The query's shared running flag
    pub fn running_flag(&self) -> &Arc<AtomicBool> {
        &self.running
    }

    /// Whether shard tasks should keep working
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    pub fn state(&self) -> QueryState {
        *self.state.lock()
    }

    /// Time since the query was registered
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Flip the running flag and mark the query interrupted. Only the first
    /// terminal transition sticks.
    pub fn cancel(&self) {
        self.transition(QueryState::Interrupted);
    }

    /// Flip the running flag and mark the query cancelled by back pressure
    pub fn cancel_for_back_pressure(&self) {
        self.transition(QueryState::BackPressureInterrupted);
    }

    fn transition(&self, target: QueryState) {
        let mut state = self.state.lock();
        if *state == QueryState::Running {
            *state = target;
            self.running.store(false, Ordering::SeqCst);
        }
    }

    fn complete(&self) {
        let mut state = self.state.lock();
        if *state == QueryState::Running {
            *state = QueryState::Complete;
        }
    }

    /// Record a shard task as executing; the returned guard detaches on drop
    pub fn attach(self: &Arc<Self>, shard: impl Into<String>) -> ShardAttachment {
        let shard = shard.into();
        *self.attached.lock().entry(shard.clone()).or_insert(0) += 1;
        ShardAttachment {
            status: Arc::clone(self),
            shard,
        }
    }

    fn detach(&self, shard: &str) {
        let mut attached = self.attached.lock();
        if let Some(count) = attached.get_mut(shard) {
            *count -= 1;
            if *count == 0 {
                attached.remove(shard);
            }
        }
        self.complete_shards.fetch_add(1, Ordering::SeqCst);
    }

    /// Point-in-time view of this status
    pub fn snapshot(&self) -> QueryStatusSnapshot {
        let mut attached_shards: Vec<String> = self.attached.lock().keys().cloned().collect();
        attached_shards.sort();
        QueryStatusSnapshot {
            uuid: self.uuid,
            table: self.table.clone(),
            state: self.state(),
            total_shards: self.total_shards,
            complete_shards: self.complete_shards.load(Ordering::SeqCst),
            attached_shards,
            age: self.age(),
        }
    }
}

/// RAII attachment of one shard task to its query status
pub struct ShardAttachment {
    status: Arc<QueryStatus>,
    shard: String,
}

impl Drop for ShardAttachment {
    fn drop(&mut self) {
        self.status.detach(&self.shard);
    }
}

/// Registry of every in-flight query, keyed by table then query id
pub struct QueryStatusRegistry {
    statuses: RwLock<FxHashMap<String, FxHashMap<Uuid, Arc<QueryStatus>>>>,
    retention: Duration,
    sweep_interval: Duration,
    shutdown_signal: Arc<AtomicBool>,
    shutdown_wake: Arc<Notify>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl QueryStatusRegistry {
    /// Create a registry. The sweeper does not run until
    /// [`start_sweeper`](Self::start_sweeper) is called.
    pub fn new(retention: Duration, sweep_interval: Duration) -> Self {
        Self {
            statuses: RwLock::new(FxHashMap::default()),
            retention,
            sweep_interval,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
            shutdown_wake: Arc::new(Notify::new()),
            sweeper_handle: Mutex::new(None),
        }
    }

    /// Register a status for a newly submitted query. Pure bookkeeping,
    /// never fails.
    pub fn new_status(
        &self,
        table: &str,
        query: &SearchQuery,
        total_shards: usize,
        running: Arc<AtomicBool>,
    ) -> Arc<QueryStatus> {
        let status = Arc::new(QueryStatus::new(table, query, total_shards, running));
        self.statuses
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(status.uuid(), Arc::clone(&status));
        debug!(uuid = %status.uuid(), table, "registered query status");
        status
    }

    /// Deregister a status once its query finishes. Idempotent; marks the
    /// status complete if it was still running.
    pub fn remove_status(&self, status: &Arc<QueryStatus>) {
        status.complete();
        let mut statuses = self.statuses.write();
        if let Some(table_statuses) = statuses.get_mut(status.table()) {
            table_statuses.remove(&status.uuid());
            if table_statuses.is_empty() {
                statuses.remove(status.table());
            }
        }
    }

    /// Cancel a query. Unknown or already-finished ids are a safe no-op;
    /// returns whether a registered status was found.
    pub fn cancel(&self, table: &str, uuid: Uuid) -> bool {
        match self.find(table, uuid) {
            Some(status) => {
                status.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel a query on behalf of resource pressure. Same no-op contract as
    /// [`cancel`](Self::cancel).
    pub fn cancel_for_back_pressure(&self, table: &str, uuid: Uuid) -> bool {
        match self.find(table, uuid) {
            Some(status) => {
                status.cancel_for_back_pressure();
                true
            }
            None => false,
        }
    }

    /// Snapshots of every registered query on a table
    pub fn current_queries(&self, table: &str) -> Vec<QueryStatusSnapshot> {
        self.statuses
            .read()
            .get(table)
            .map(|table_statuses| table_statuses.values().map(|status| status.snapshot()).collect())
            .unwrap_or_default()
    }

    /// Snapshot of one query, if registered
    pub fn query_status(&self, table: &str, uuid: Uuid) -> Option<QueryStatusSnapshot> {
        self.find(table, uuid).map(|status| status.snapshot())
    }

    /// Ids of every registered query on a table
    pub fn query_status_ids(&self, table: &str) -> Vec<Uuid> {
        self.statuses
            .read()
            .get(table)
            .map(|table_statuses| table_statuses.keys().copied().collect())
            .unwrap_or_default()
    }

    fn find(&self, table: &str, uuid: Uuid) -> Option<Arc<QueryStatus>> {
        self.statuses.read().get(table).and_then(|t| t.get(&uuid)).cloned()
    }

    /// Purge statuses older than the retention window. Normal removal
    /// happens in [`remove_status`](Self::remove_status); this catches
    /// statuses whose query future was dropped before finishing.
    fn sweep(&self) {
        let retention = self.retention;
        let mut statuses = self.statuses.write();
        statuses.retain(|table, table_statuses| {
            table_statuses.retain(|uuid, status| {
                if status.age() <= retention {
                    return true;
                }
                if status.state() == QueryState::Running {
                    warn!(%uuid, table, age = ?status.age(), "purging abandoned running query status");
                    status.cancel();
                } else {
                    debug!(%uuid, table, "purging expired query status");
                }
                false
            });
            !table_statuses.is_empty()
        });
    }

    /// Spawn the background sweeper task
    pub fn start_sweeper(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let sweep_interval = self.sweep_interval;
        let shutdown_signal = self.shutdown_signal.clone();
        let shutdown_wake = self.shutdown_wake.clone();

        let handle = tokio::spawn(async move {
            let mut timer = interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if shutdown_signal.load(Ordering::SeqCst) {
                            break;
                        }
                        let Some(registry) = weak.upgrade() else {
                            break;
                        };
                        registry.sweep();
                    }
                    _ = shutdown_wake.notified() => {
                        break;
                    }
                }
            }
            debug!("status sweeper stopped");
        });

        *self.sweeper_handle.lock() = Some(handle);
    }

    /// Whether the sweeper task is running
    pub fn is_sweeping(&self) -> bool {
        self.sweeper_handle.lock().is_some() && !self.shutdown_signal.load(Ordering::SeqCst)
    }

    /// Stop the sweeper and wait for it to exit
    pub async fn close(&self) {
        self.shutdown_signal.store(true, Ordering::SeqCst);
        self.shutdown_wake.notify_waiters();
        let handle = self.sweeper_handle.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => debug!("status sweeper shut down cleanly"),
                Err(e) => warn!("status sweeper ended with error: {}", e),
            }
        }
    }
}
