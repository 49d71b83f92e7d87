//! Configuration for the table orchestration layer
//!
//! This module provides the configuration system for tablex, including
//! parameter validation and builder pattern implementation.

use crate::error::TablexError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`TableManager`](crate::manager::TableManager)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablexConfig {
    /// Number of workers in the read/query fan-out pool
    pub worker_threads: usize,
    /// Number of workers in the mutation fan-out pool
    pub mutate_worker_threads: usize,
    /// Maximum time to wait for each fanned-out shard result in milliseconds
    pub task_timeout_ms: u64,
    /// Heap budget in bytes for materializing a single row fetch
    pub max_heap_per_row_fetch: usize,
    /// How long finished query statuses are retained before the sweeper purges them,
    /// in milliseconds
    pub status_retention_ms: u64,
    /// Interval between status sweeper passes in milliseconds
    pub status_sweep_interval_ms: u64,
    /// When set, shard query tasks sleep this many milliseconds before scanning.
    /// Test hook for exercising cancellation paths.
    pub debug_run_slow_ms: Option<u64>,
}

impl Default for TablexConfig {
    fn default() -> Self {
        Self {
            worker_threads: 16,
            mutate_worker_threads: 8,
            task_timeout_ms: 60_000,
            max_heap_per_row_fetch: 10 * 1024 * 1024,
            status_retention_ms: 60_000,
            status_sweep_interval_ms: 10_000,
            debug_run_slow_ms: None,
        }
    }
}

impl TablexConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read/query pool size
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Set the mutation pool size
    pub fn mutate_worker_threads(mut self, count: usize) -> Self {
        self.mutate_worker_threads = count;
        self
    }

    /// Set the per-shard-result collection timeout in milliseconds
    pub fn task_timeout_ms(mut self, ms: u64) -> Self {
        self.task_timeout_ms = ms;
        self
    }

    /// Set the row fetch heap budget in bytes
    pub fn max_heap_per_row_fetch(mut self, bytes: usize) -> Self {
        self.max_heap_per_row_fetch = bytes;
        self
    }

    /// Set the finished-status retention window in milliseconds
    pub fn status_retention_ms(mut self, ms: u64) -> Self {
        self.status_retention_ms = ms;
        self
    }

    /// Set the status sweeper interval in milliseconds
    pub fn status_sweep_interval_ms(mut self, ms: u64) -> Self {
        self.status_sweep_interval_ms = ms;
        self
    }

    /// Slow down shard query tasks by the given delay. Test hook only.
    pub fn debug_run_slow_ms(mut self, ms: u64) -> Self {
        self.debug_run_slow_ms = Some(ms);
        self
    }

    /// Per-shard-result collection timeout as a [`Duration`]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Finished-status retention window as a [`Duration`]
    pub fn status_retention(&self) -> Duration {
        Duration::from_millis(self.status_retention_ms)
    }

    /// Status sweeper interval as a [`Duration`]
    pub fn status_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.status_sweep_interval_ms)
    }

    /// Shard query task delay as a [`Duration`], when configured
    pub fn debug_run_slow(&self) -> Option<Duration> {
        self.debug_run_slow_ms.map(Duration::from_millis)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), TablexError> {
        if self.worker_threads == 0 {
            return Err(TablexError::config_error(
                "worker_threads",
                "must be greater than 0",
                "Set worker_threads to the number of concurrent shard reads to allow (recommended: 8-32)",
            ));
        }

        if self.mutate_worker_threads == 0 {
            return Err(TablexError::config_error(
                "mutate_worker_threads",
                "must be greater than 0",
                "Set mutate_worker_threads to the number of concurrent shard mutation batches to allow (recommended: 4-16)",
            ));
        }

        if self.task_timeout_ms == 0 {
            return Err(TablexError::config_error(
                "task_timeout_ms",
                "must be greater than 0",
                "Set task_timeout_ms to the longest acceptable wait per shard result (default: 60000)",
            ));
        }

        if self.max_heap_per_row_fetch == 0 {
            return Err(TablexError::config_error(
                "max_heap_per_row_fetch",
                "must be greater than 0",
                "Set max_heap_per_row_fetch to the byte budget for one row fetch (default: 10485760)",
            ));
        }

        if self.status_retention_ms == 0 {
            return Err(TablexError::config_error(
                "status_retention_ms",
                "must be greater than 0",
                "Set status_retention_ms to how long finished query statuses stay visible (default: 60000)",
            ));
        }

        if self.status_sweep_interval_ms == 0 {
            return Err(TablexError::config_error(
                "status_sweep_interval_ms",
                "must be greater than 0",
                "Set status_sweep_interval_ms to the sweeper period (default: 10000)",
            ));
        }

        Ok(())
    }

    /// Build the configuration after validation
    pub fn build(self) -> Result<Self, TablexError> {
        self.validate()?;
        Ok(self)
    }
}
