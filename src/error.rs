//! Error types for tablex operations
//!
//! This module defines the error types used throughout tablex, carrying enough
//! context (table, shard, query id) for a router or caller to decide whether to
//! retry elsewhere, surface the failure, or treat it as a cancellation.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for all tablex operations
#[derive(Debug, Error)]
pub enum TablexError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Selector addressing validation failed
    #[error("Invalid selector: {reason}")]
    InvalidSelector { reason: String },

    /// Table is not served by this process
    #[error("Table [{table}] is not being served")]
    TableUnavailable { table: String },

    /// Shard is not present in the table's shard map
    #[error("Shard [{shard}] not found in table [{table}]")]
    ShardNotFound { table: String, shard: String },

    /// Row or record fetch failed
    #[error("Fetch failed on table [{table}] shard [{shard}]: {reason}")]
    FetchFailed {
        table: String,
        shard: String,
        reason: String,
    },

    /// Row mutation failed
    #[error("Mutation failed on table [{table}] shard [{shard}]: {reason}")]
    MutationFailed {
        table: String,
        shard: String,
        reason: String,
    },

    /// Query was cancelled by a caller or operator
    #[error("Query [{uuid}] on table [{table}] was cancelled")]
    QueryCancelled { table: String, uuid: Uuid },

    /// Query was cancelled to relieve resource pressure
    #[error("Query [{uuid}] on table [{table}] was cancelled by back pressure")]
    BackPressureCancelled { table: String, uuid: Uuid },

    /// Mutation is missing required addressing fields
    #[error("Invalid mutation: {reason}")]
    InvalidMutation { reason: String },

    /// Mutation type is not legal in this position
    #[error("Unsupported mutation type [{mutation_type}] for {context}")]
    UnsupportedMutationType {
        mutation_type: String,
        context: String,
    },

    /// A fanned-out shard task timed out, panicked, or vanished
    #[error("Task failure on table [{table}] during {operation}: {reason}")]
    TaskFailed {
        table: String,
        operation: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation submitted after the manager was closed
    #[error("Manager is closed")]
    Closed,
}

impl TablexError {
    /// Create an invalid selector error
    pub fn invalid_selector(reason: impl Into<String>) -> Self {
        Self::InvalidSelector { reason: reason.into() }
    }

    /// Create a table unavailable error
    pub fn table_unavailable(table: impl Into<String>) -> Self {
        Self::TableUnavailable { table: table.into() }
    }

    /// Create a shard not found error
    pub fn shard_not_found(table: impl Into<String>, shard: impl Into<String>) -> Self {
        Self::ShardNotFound {
            table: table.into(),
            shard: shard.into(),
        }
    }

    /// Create a fetch failure error
    pub fn fetch_failed(table: impl Into<String>, shard: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            table: table.into(),
            shard: shard.into(),
            reason: reason.into(),
        }
    }

    /// Create a mutation failure error
    pub fn mutation_failed(table: impl Into<String>, shard: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MutationFailed {
            table: table.into(),
            shard: shard.into(),
            reason: reason.into(),
        }
    }

    /// Create a query cancelled error
    pub fn query_cancelled(table: impl Into<String>, uuid: Uuid) -> Self {
        Self::QueryCancelled {
            table: table.into(),
            uuid,
        }
    }

    /// Create a back pressure cancellation error
    pub fn back_pressure_cancelled(table: impl Into<String>, uuid: Uuid) -> Self {
        Self::BackPressureCancelled {
            table: table.into(),
            uuid,
        }
    }

    /// Create an invalid mutation error
    pub fn invalid_mutation(reason: impl Into<String>) -> Self {
        Self::InvalidMutation { reason: reason.into() }
    }

    /// Create an unsupported mutation type error
    pub fn unsupported_mutation(mutation_type: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnsupportedMutationType {
            mutation_type: mutation_type.into(),
            context: context.into(),
        }
    }

    /// Create a shard task failure error
    pub fn task_failed(table: impl Into<String>, operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            table: table.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a shard task timeout error
    pub fn task_timeout(table: impl Into<String>, operation: impl Into<String>, waited: std::time::Duration) -> Self {
        Self::TaskFailed {
            table: table.into(),
            operation: operation.into(),
            reason: format!("no shard result within {waited:?}"),
        }
    }

    /// Create a detailed config error
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Config(format!("{} - {}: {}", field.into(), reason.into(), suggestion.into()))
    }

    /// Check if this error means the addressed table/shard lives elsewhere and the
    /// call can be retried against another server
    pub fn is_routing_miss(&self) -> bool {
        matches!(self, Self::TableUnavailable { .. } | Self::ShardNotFound { .. })
    }

    /// Check if this error reports a cancelled query rather than a fault
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::QueryCancelled { .. } | Self::BackPressureCancelled { .. })
    }

    /// Add operation context to an error, preserving the original error information
    pub fn with_operation_context(self, operation: &str, additional_context: &str) -> Self {
        let context = format!("{}: {}", operation, additional_context);

        match self {
            Self::Io(ref err) => Self::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err))),
            Self::Config(ref msg) => Self::Config(format!("{}: {}", context, msg)),
            Self::FetchFailed { table, shard, reason } => Self::FetchFailed {
                table,
                shard,
                reason: format!("{}: {}", context, reason),
            },
            Self::MutationFailed { table, shard, reason } => Self::MutationFailed {
                table,
                shard,
                reason: format!("{}: {}", context, reason),
            },
            Self::TaskFailed {
                table,
                operation: op,
                reason,
            } => Self::TaskFailed {
                table,
                operation: op,
                reason: format!("{}: {}", context, reason),
            },
            _ => self,
        }
    }
}
