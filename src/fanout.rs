//! Parallel shard fan-out
//!
//! [`FanoutExecutor`] runs one task per shard on a bounded worker pool and
//! collects the results over a channel. Collection waits at most the
//! configured timeout per result. The first task failure asks the rest of
//! the batch to cancel cooperatively through the caller's cancel hook and is
//! surfaced once collection stops; results that arrive after a failure are
//! discarded. The same pool also runs index-aligned batch work whose results
//! must line up with the input order.

use crate::error::TablexError;
use crate::merge::{Merger, ShardPart};
use crate::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Fixed-size permit pool bounding concurrent shard work
///
/// Tasks queue on the pool rather than being rejected; the collection
/// timeout is what bounds total waiting.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool of the given size
    pub fn new(name: &'static str, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(TablexError::config_error(
                name,
                "pool size must be greater than 0",
                "Give the pool at least one worker",
            ));
        }
        Ok(Self {
            name,
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    /// Number of workers in the pool
    pub fn size(&self) -> usize {
        self.size
    }

    /// Name the pool was created with
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }
}

/// Fans shard tasks out on a worker pool and merges their results
pub struct FanoutExecutor {
    pool: WorkerPool,
    task_timeout: Duration,
}

impl FanoutExecutor {
    /// Create an executor over the given pool with a per-result collection
    /// timeout
    pub fn new(pool: WorkerPool, task_timeout: Duration) -> Self {
        Self { pool, task_timeout }
    }

    /// The pool this executor dispatches on
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `task` against every shard in the map and merge the results
    ///
    /// Shards complete in arbitrary order; the merger sees the unordered
    /// part set. On the first task failure `cancel` is invoked so in-flight
    /// siblings can stop cooperatively, collection drains what remains, and
    /// the first error is returned. A result overdue past the timeout stops
    /// collection the same way.
    pub async fn dispatch<S, T, F, Fut, M>(
        &self,
        table: &str,
        operation: &'static str,
        shards: HashMap<String, S>,
        mut task: F,
        merger: &M,
        cancel: impl Fn(),
    ) -> Result<M::Output>
    where
        T: Send + 'static,
        F: FnMut(String, S) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        M: Merger<T>,
    {
        let shard_count = shards.len();
        if shard_count == 0 {
            return merger.merge(Vec::new());
        }

        let (sender, mut receiver) = mpsc::channel::<(String, Result<T>)>(shard_count);
        for (shard, handle) in shards {
            let sender = sender.clone();
            let permits = self.pool.semaphore();
            let pool_name = self.pool.name();
            let work = task(shard.clone(), handle);
            tokio::spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => work.await,
                    Err(_) => Err(TablexError::task_failed("", pool_name, "worker pool closed")),
                };
                let _ = sender.send((shard, result)).await;
            });
        }
        drop(sender);

        let mut parts = Vec::with_capacity(shard_count);
        let mut first_error: Option<TablexError> = None;
        for _ in 0..shard_count {
            match timeout(self.task_timeout, receiver.recv()).await {
                Ok(Some((shard, Ok(value)))) => {
                    if first_error.is_none() {
                        parts.push(ShardPart::new(shard, value));
                    }
                }
                Ok(Some((shard, Err(error)))) => {
                    if first_error.is_none() {
                        warn!(table, operation, shard = %shard, error = %error, "shard task failed, cancelling siblings");
                        cancel();
                        first_error = Some(error);
                    } else {
                        debug!(table, operation, shard = %shard, error = %error, "discarding shard error after first failure");
                    }
                }
                Ok(None) => {
                    // a task dropped its sender without reporting, which only a
                    // panic or abort can cause
                    if first_error.is_none() {
                        cancel();
                        first_error = Some(TablexError::task_failed(
                            table,
                            operation,
                            "shard task ended without a result",
                        ));
                    }
                    break;
                }
                Err(_) => {
                    if first_error.is_none() {
                        cancel();
                    }
                    warn!(table, operation, waited = ?self.task_timeout, "shard result overdue, abandoning collection");
                    first_error
                        .get_or_insert_with(|| TablexError::task_timeout(table, operation, self.task_timeout));
                    break;
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => merger.merge(parts),
        }
    }

    /// Run the given futures on the pool, returning their results
    /// index-aligned with the input regardless of completion order
    pub async fn run_indexed<T, Fut>(
        &self,
        table: &str,
        operation: &'static str,
        futures: Vec<Fut>,
    ) -> Vec<Result<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(futures.len());
        for work in futures {
            let permits = self.pool.semaphore();
            let pool_name = self.pool.name();
            handles.push(tokio::spawn(async move {
                match permits.acquire_owned().await {
                    Ok(_permit) => work.await,
                    Err(_) => Err(TablexError::task_failed("", pool_name, "worker pool closed")),
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(TablexError::task_failed(
                    table,
                    operation,
                    format!("task panicked: {join_error}"),
                )),
            });
        }
        results
    }
}
