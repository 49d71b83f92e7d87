//! Merge strategies for fanned-out shard results
//!
//! A dispatch ends with an unordered set of per-shard partial results; a
//! [`Merger`] turns that set into one answer. Shards complete in arbitrary
//! order, so every strategy must be commutative and associative over its
//! shard-granularity inputs. Facet counts bypass merging and sum into a
//! [`FacetAccumulator`] while shard tasks run.

use crate::query::{Facet, SearchHit, SearchResults};
use crate::selector::LocationId;
use crate::shard::ShardHits;
use crate::Result;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// One shard's contribution to a fanned-out operation
#[derive(Debug, Clone)]
pub struct ShardPart<T> {
    pub shard: String,
    pub value: T,
}

impl<T> ShardPart<T> {
    pub fn new(shard: impl Into<String>, value: T) -> Self {
        Self {
            shard: shard.into(),
            value,
        }
    }
}

/// Combines per-shard partial results into one answer
pub trait Merger<T>: Send + Sync {
    type Output;

    /// Merge the full unordered part set. Implementations may not depend on
    /// part order.
    fn merge(&self, parts: Vec<ShardPart<T>>) -> Result<Self::Output>;
}

/// K-way merge of per-shard score-ordered hit lists into the query's
/// `(start, fetch)` window
///
/// Only `start + fetch` entries are popped from the heap, so work tracks
/// the window rather than the combined hit count.
#[derive(Debug, Clone, Copy)]
pub struct HitMerger {
    pub start: u64,
    pub fetch: usize,
}

struct HeapEntry<'a> {
    score: f32,
    shard: &'a str,
    doc_id: u64,
    part_index: usize,
    position: usize,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // max-heap: best score first; ties break toward the lexicographically
        // smaller shard then smaller doc id, keeping merges deterministic
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.shard.cmp(self.shard))
            .then_with(|| other.doc_id.cmp(&self.doc_id))
    }
}

impl Merger<ShardHits> for HitMerger {
    type Output = SearchResults;

    fn merge(&self, parts: Vec<ShardPart<ShardHits>>) -> Result<SearchResults> {
        let mut total_results = 0u64;
        let mut shard_info = HashMap::with_capacity(parts.len());
        for part in &parts {
            total_results += part.value.total_hits;
            shard_info.insert(part.shard.clone(), part.value.total_hits);
        }

        let start = usize::try_from(self.start).unwrap_or(usize::MAX);
        let window_end = start.saturating_add(self.fetch);

        let mut heap = BinaryHeap::with_capacity(parts.len());
        for (part_index, part) in parts.iter().enumerate() {
            if let Some(hit) = part.value.hits.first() {
                heap.push(HeapEntry {
                    score: hit.score,
                    shard: &part.shard,
                    doc_id: hit.doc_id,
                    part_index,
                    position: 0,
                });
            }
        }

        let mut hits = Vec::with_capacity(self.fetch.min(1024));
        let mut produced = 0usize;
        while let Some(entry) = heap.pop() {
            if produced >= window_end {
                break;
            }
            if produced >= start {
                hits.push(SearchHit {
                    location_id: LocationId::new(entry.shard, entry.doc_id).to_string(),
                    score: entry.score,
                    fetch_result: None,
                });
            }
            produced += 1;

            let position = entry.position + 1;
            if let Some(hit) = parts[entry.part_index].value.hits.get(position) {
                heap.push(HeapEntry {
                    score: hit.score,
                    shard: &parts[entry.part_index].shard,
                    doc_id: hit.doc_id,
                    part_index: entry.part_index,
                    position,
                });
            }
        }

        Ok(SearchResults {
            total_results,
            shard_info,
            hits,
            facet_counts: None,
        })
    }
}

/// Unions per-shard term lists into one sorted, de-duplicated list capped
/// at `size`
///
/// The cap applies after the union: a term present in several shards
/// occupies one slot.
#[derive(Debug, Clone, Copy)]
pub struct TermsMerger {
    pub size: usize,
}

impl Merger<Vec<String>> for TermsMerger {
    type Output = Vec<String>;

    fn merge(&self, parts: Vec<ShardPart<Vec<String>>>) -> Result<Vec<String>> {
        let mut terms = BTreeSet::new();
        for part in parts {
            terms.extend(part.value);
        }
        Ok(terms.into_iter().take(self.size).collect())
    }
}

/// Sums per-shard counts
#[derive(Debug, Clone, Copy)]
pub struct SumMerger;

impl Merger<u64> for SumMerger {
    type Output = u64;

    fn merge(&self, parts: Vec<ShardPart<u64>>) -> Result<u64> {
        Ok(parts.iter().map(|part| part.value).sum())
    }
}

/// Cross-shard facet count accumulator
///
/// Shard tasks add their counts as they finish counting each facet. Facets
/// carrying a `minimum_results` threshold let later shards skip counting
/// once the summed count satisfies it; when every facet is unbounded the
/// accumulator drops threshold bookkeeping entirely.
#[derive(Debug)]
pub struct FacetAccumulator {
    counts: Vec<AtomicU64>,
    minimums: Option<Vec<u64>>,
}

impl FacetAccumulator {
    /// Build an accumulator for a query's facet list
    pub fn new(facets: &[Facet]) -> Self {
        let counts = facets.iter().map(|_| AtomicU64::new(0)).collect();
        let minimums = if facets.iter().all(|facet| facet.minimum_results == u64::MAX) {
            None
        } else {
            Some(facets.iter().map(|facet| facet.minimum_results).collect())
        };
        Self { counts, minimums }
    }

    /// Number of facets tracked
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether any facets are tracked
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Whether any facet carries a count threshold
    pub fn has_minimums(&self) -> bool {
        self.minimums.is_some()
    }

    /// Add one shard's count for a facet
    pub fn add(&self, index: usize, count: u64) {
        self.counts[index].fetch_add(count, Ordering::SeqCst);
    }

    /// Whether enough matches are counted that a shard may skip this facet
    pub fn reached_minimum(&self, index: usize) -> bool {
        match &self.minimums {
            None => false,
            Some(minimums) => self.counts[index].load(Ordering::SeqCst) >= minimums[index],
        }
    }

    /// The summed counts, index-aligned with the facet list
    pub fn counts(&self) -> Vec<u64> {
        self.counts.iter().map(|count| count.load(Ordering::SeqCst)).collect()
    }
}
