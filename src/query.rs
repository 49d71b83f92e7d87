//! Query data model for tablex
//!
//! A [`SearchQuery`] is addressed to one table and fanned out to every shard
//! of that table. Predicates arrive already parsed by the caller's query
//! layer; tablex passes them through to the shards untouched.

use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// An opaque, already-parsed search predicate
///
/// Parsing query strings into predicates is the caller's concern; shards
/// interpret the expression, tablex only routes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Predicate(String);

impl Predicate {
    /// Wrap an already-parsed predicate expression
    pub fn new(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    /// The underlying expression
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Predicate {
    fn from(expression: &str) -> Self {
        Self::new(expression)
    }
}

impl From<String> for Predicate {
    fn from(expression: String) -> Self {
        Self(expression)
    }
}

/// How per-record scores roll up into a row score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreMode {
    /// Row scored by its best record, boosted by how many records match
    #[default]
    Super,
    /// Row scored by the sum of its matching records
    Aggregate,
    /// Row scored by its single best record
    Best,
    /// Every matching row scores the same
    Constant,
}

/// A side predicate counted per shard while a query runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    /// Predicate whose matches are counted
    pub predicate: Predicate,
    /// Shards may stop counting this facet once the summed count reaches
    /// this threshold; `u64::MAX` means count everything
    pub minimum_results: u64,
}

impl Facet {
    /// Create an unbounded facet
    pub fn new(predicate: impl Into<Predicate>) -> Self {
        Self {
            predicate: predicate.into(),
            minimum_results: u64::MAX,
        }
    }

    /// Set the count threshold after which shards may stop counting
    pub fn minimum_results(mut self, minimum: u64) -> Self {
        self.minimum_results = minimum;
        self
    }
}

/// A query addressed to one table
///
/// Immutable once submitted; the uuid identifies the query for status
/// introspection and cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Caller-supplied query id
    pub uuid: Uuid,
    /// The search predicate fanned out to every shard
    pub predicate: Predicate,
    /// Side predicates counted during the query
    pub facets: Vec<Facet>,
    /// When set, fetch results are materialized for the merged window hits
    /// using this selector's field restrictions
    pub selector: Option<Selector>,
    /// Hits to skip in the merged ordering
    pub start: u64,
    /// Hits to return after `start`
    pub fetch: usize,
    /// Row scoring behavior
    pub score_mode: ScoreMode,
}

impl SearchQuery {
    /// Create a query with a fresh v4 uuid and default paging (start 0,
    /// fetch 10)
    pub fn new(predicate: impl Into<Predicate>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            predicate: predicate.into(),
            facets: Vec::new(),
            selector: None,
            start: 0,
            fetch: 10,
            score_mode: ScoreMode::default(),
        }
    }

    /// Use a caller-chosen query id
    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Add a facet to count alongside the query
    pub fn facet(mut self, facet: Facet) -> Self {
        self.facets.push(facet);
        self
    }

    /// Materialize fetch results for window hits through this selector
    pub fn selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Set the number of merged hits to skip
    pub fn start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    /// Set the number of merged hits to return
    pub fn fetch(mut self, fetch: usize) -> Self {
        self.fetch = fetch;
        self
    }

    /// Set the row scoring behavior
    pub fn score_mode(mut self, score_mode: ScoreMode) -> Self {
        self.score_mode = score_mode;
        self
    }
}

/// One hit in the merged result ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Where the hit's primary document lives, `"<shard>/<docId>"`
    pub location_id: String,
    /// Merged-order score, higher first
    pub score: f32,
    /// Materialized fetch result when the query carried a selector
    pub fetch_result: Option<crate::selector::FetchResult>,
}

/// Merged outcome of a table query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Total hits across all shards, before windowing
    pub total_results: u64,
    /// Per-shard hit totals
    pub shard_info: HashMap<String, u64>,
    /// The `(start, fetch)` window of the merged ordering
    pub hits: Vec<SearchHit>,
    /// Summed facet counts, index-aligned with the query's facet list
    pub facet_counts: Option<Vec<u64>>,
}
