//! Shard index and table resolution seams
//!
//! tablex orchestrates queries and mutations but never stores anything
//! itself. The physical index behind each shard sits behind [`ShardIndex`],
//! and table-to-shard resolution sits behind [`IndexServer`]. Everything a
//! shard needs to know about one call travels in [`FetchOptions`]; everything
//! the orchestration layer reads back travels as [`RawDocument`] field lists.

use crate::query::{Predicate, ScoreMode};
use crate::row::Row;
use crate::selector::{HighlightOptions, Selector};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Stored field holding the row id on every document of a row
pub const ROW_ID_FIELD: &str = "rowid";
/// Stored field holding the record id
pub const RECORD_ID_FIELD: &str = "recordid";
/// Stored field holding the record's column family
pub const FAMILY_FIELD: &str = "family";
/// Marker field present only on a row's primary document; never fetched
pub const PRIME_DOC_FIELD: &str = "_prime_";

/// One stored document as a shard returns it: ordered (field, value) pairs.
/// Column fields are named `"<family>.<column>"`; repeated names carry
/// multi-valued columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawDocument {
    pub fields: Vec<(String, String)>,
}

impl RawDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First value stored under a field name
    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Rough byte size of the stored content, used against the row fetch
    /// heap budget
    pub fn heap_size(&self) -> usize {
        self.fields
            .iter()
            .map(|(name, value)| name.len() + value.len())
            .sum()
    }
}

/// Whether a fetch applies normal read visibility or the mutation path's
/// unintercepted visibility
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchContext {
    #[default]
    Read,
    /// Row reconciliation must see the stored row even where read-side
    /// interception would hide it
    Mutation,
}

/// Field visibility applied while loading stored documents
///
/// Control fields (row id, record id, family) are always included and the
/// primary-document marker is always excluded, regardless of restrictions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    families: Option<HashSet<String>>,
    columns: Option<HashMap<String, HashSet<String>>>,
}

impl FieldFilter {
    /// Unrestricted filter: every stored field comes back
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching a selector's restriction sets
    pub fn from_selector(selector: &Selector) -> Self {
        Self {
            families: selector.column_families_to_fetch.clone(),
            columns: selector.columns_to_fetch.clone(),
        }
    }

    /// Control fields only, for ids-only fetches
    pub fn ids_only() -> Self {
        Self {
            families: Some(HashSet::new()),
            columns: Some(HashMap::new()),
        }
    }

    /// True when no restriction is set
    pub fn is_unrestricted(&self) -> bool {
        self.families.is_none() && self.columns.is_none()
    }

    /// Whether a stored field passes the filter
    pub fn wants(&self, field: &str) -> bool {
        match field {
            ROW_ID_FIELD | RECORD_ID_FIELD | FAMILY_FIELD => return true,
            PRIME_DOC_FIELD => return false,
            _ => {}
        }
        if self.is_unrestricted() {
            return true;
        }
        let Some((family, column)) = field.rsplit_once('.') else {
            return false;
        };
        if let Some(families) = &self.families {
            if families.contains(family) {
                return true;
            }
        }
        if let Some(columns) = &self.columns {
            if let Some(names) = columns.get(family) {
                return names.contains(column);
            }
        }
        false
    }
}

/// Parameters for loading stored documents from a shard
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Field visibility applied per stored field
    pub filter: FieldFilter,
    /// Highlight rewrite applied to returned column values
    pub highlight: Option<HighlightOptions>,
    /// Read or mutation visibility
    pub context: FetchContext,
    /// Byte budget for one row materialization; implementations stop adding
    /// documents once the budget is spent
    pub max_heap: usize,
}

impl FetchOptions {
    /// Options with the given filter, read context, no highlighting, and an
    /// unbounded heap budget
    pub fn new(filter: FieldFilter) -> Self {
        Self {
            filter,
            highlight: None,
            context: FetchContext::Read,
            max_heap: usize::MAX,
        }
    }
}

/// Outcome of a row/record lookup inside one shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLookup {
    /// Internal id of the first live matching document
    pub doc_id: Option<u64>,
    /// Number of live documents that matched; more than one signals an
    /// index consistency problem
    pub live_matches: u64,
    /// Matching documents that are stored but no longer live; with no live
    /// match these distinguish a removed row from one that never existed
    pub deleted_matches: u64,
}

impl RowLookup {
    /// Lookup that matched nothing
    pub fn missing() -> Self {
        Self {
            doc_id: None,
            live_matches: 0,
            deleted_matches: 0,
        }
    }
}

/// One scored primary document from a shard scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredHit {
    pub doc_id: u64,
    /// Scan score, higher first
    pub score: f32,
}

/// Score-ordered scan outcome for one shard
#[derive(Debug, Clone, PartialEq)]
pub struct ShardHits {
    /// Total matching rows in this shard, before windowing
    pub total_hits: u64,
    /// Up to the requested window of hits, best score first
    pub hits: Vec<ScoredHit>,
}

/// One shard of one table, as the orchestration layer sees it
///
/// All methods are point capabilities against this shard's rows only;
/// fan-out, merging, and cross-shard semantics live above this trait.
/// Scan-shaped methods take the query's running flag and are expected to
/// stop with an error once it flips to false.
#[async_trait]
pub trait ShardIndex: Send + Sync {
    /// Load one stored document. Returns `None` when the doc id does not
    /// address a stored document.
    async fn fetch_by_location(&self, doc_id: u64, options: &FetchOptions) -> Result<Option<RawDocument>>;

    /// Load every live document of the row anchored at the given primary
    /// document, in record order.
    async fn fetch_row_documents(&self, doc_id: u64, options: &FetchOptions) -> Result<Vec<RawDocument>>;

    /// Find the live document for a row (`primary_only`) or for one record
    /// of it (`record_id` set).
    async fn lookup(&self, row_id: &str, record_id: Option<&str>, primary_only: bool) -> Result<RowLookup>;

    /// Whether the document is in the live set
    async fn is_live(&self, doc_id: u64) -> Result<bool>;

    /// Number of live records stored under a row id
    async fn row_record_count(&self, row_id: &str) -> Result<u64>;

    /// Scan for matching rows, best score first. `window` caps the returned
    /// hits; `total_hits` still reports every match.
    async fn search(
        &self,
        predicate: &Predicate,
        score_mode: ScoreMode,
        window: usize,
        running: Arc<AtomicBool>,
    ) -> Result<ShardHits>;

    /// Count matches for a predicate
    async fn count(&self, predicate: &Predicate, running: Arc<AtomicBool>) -> Result<u64>;

    /// Distinct stored terms of a column starting at `start_with`, at most
    /// `size` of them in order
    async fn terms(&self, family: &str, column: &str, start_with: &str, size: usize) -> Result<Vec<String>>;

    /// Number of records holding the exact column value
    async fn record_frequency(&self, family: &str, column: &str, value: &str) -> Result<u64>;

    /// Replace the stored row with the given one
    async fn replace_row(&self, row: Row, wait_for_visibility: bool, wal: bool) -> Result<()>;

    /// Remove the row
    async fn delete_row(&self, row_id: &str, wait_for_visibility: bool, wal: bool) -> Result<()>;

    /// Merge the shard's segments down to at most `max_segments`
    async fn optimize(&self, max_segments: usize) -> Result<()>;
}

/// Resolves tables to their locally-served shards
#[async_trait]
pub trait IndexServer: Send + Sync {
    /// The shard map of a table served by this process. Implementations
    /// return [`TableUnavailable`](crate::error::TablexError::TableUnavailable)
    /// when the table is not served here.
    async fn shard_map(&self, table: &str) -> Result<HashMap<String, Arc<dyn ShardIndex>>>;

    /// Total shard count of the table across the cluster
    async fn shard_count(&self, table: &str) -> Result<usize>;
}
