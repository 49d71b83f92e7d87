//! tablex - query and mutation orchestration for shard-partitioned tables
//!
//! tablex is the coordination layer of a distributed full-text search
//! service: it fans queries out across the shards of a table, merges the
//! per-shard results into one globally ordered answer, resolves row and
//! record fetches to the shard that owns them, and reconciles row mutations
//! against stored rows. Physical index storage stays behind the
//! [`ShardIndex`] and [`IndexServer`] traits.

pub mod config;
pub mod error;
pub mod fanout;
pub mod fetch;
pub mod manager;
pub mod merge;
pub mod mutation;
pub mod partition;
pub mod query;
pub mod row;
pub mod selector;
pub mod shard;
pub mod status;

pub use config::TablexConfig;
pub use error::TablexError;
pub use fanout::{FanoutExecutor, WorkerPool};
pub use fetch::RowFetchEngine;
pub use manager::TableManager;
pub use merge::{FacetAccumulator, HitMerger, Merger, ShardPart, SumMerger, TermsMerger};
pub use mutation::{ExistingRowSource, MutationEngine};
pub use partition::{shard_name, Partitioner, SHARD_PREFIX};
pub use query::{Facet, Predicate, ScoreMode, SearchHit, SearchQuery, SearchResults};
pub use row::{Column, Record, RecordMutation, RecordMutationType, Row, RowMutation, RowMutationType};
pub use selector::{
    FetchRecordResult, FetchResult, FetchRowResult, HighlightOptions, LocationId, Selector, NOT_FOUND,
};
pub use shard::{
    FetchContext, FetchOptions, FieldFilter, IndexServer, RawDocument, RowLookup, ScoredHit,
    ShardHits, ShardIndex, FAMILY_FIELD, PRIME_DOC_FIELD, RECORD_ID_FIELD, ROW_ID_FIELD,
};
pub use status::{QueryState, QueryStatus, QueryStatusRegistry, QueryStatusSnapshot, ShardAttachment};

/// Type alias for Results using TablexError
pub type Result<T> = std::result::Result<T, TablexError>;
