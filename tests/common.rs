//! Common test utilities for integration tests
//!
//! Provides an in-memory [`ShardIndex`]/[`IndexServer`] pair backed by plain
//! maps, plus builders for seeding rows through the public mutation surface.
//! Search predicates are single `family.column:value` terms, or `*` to match
//! every live row; a row's score is its number of matching records.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tablex::{
    shard_name, Column, FetchOptions, IndexServer, Predicate, RawDocument, Record, RecordMutation,
    RecordMutationType, Result, Row, RowLookup, RowMutation, RowMutationType, ScoreMode, ScoredHit,
    ShardHits, ShardIndex, TableManager, TablexConfig, TablexError, FAMILY_FIELD, PRIME_DOC_FIELD,
    RECORD_ID_FIELD, ROW_ID_FIELD,
};

#[derive(Default)]
struct ShardState {
    docs: HashMap<u64, RawDocument>,
    live: BTreeSet<u64>,
    /// Doc ids of each row in record order, first entry primary. Entries
    /// survive deletion so tombstoned rows stay distinguishable from rows
    /// that never existed.
    rows: HashMap<String, Vec<u64>>,
    next_doc_id: u64,
}

impl ShardState {
    fn store_row(&mut self, row: &Row) {
        if let Some(old_doc_ids) = self.rows.get(&row.id) {
            for doc_id in old_doc_ids {
                self.live.remove(doc_id);
            }
        }
        let mut doc_ids = Vec::with_capacity(row.records.len());
        for (position, record) in row.records.iter().enumerate() {
            let doc_id = self.next_doc_id;
            self.next_doc_id += 1;
            let mut doc = RawDocument::new();
            doc.push(ROW_ID_FIELD, &row.id);
            doc.push(RECORD_ID_FIELD, &record.id);
            doc.push(FAMILY_FIELD, &record.family);
            if position == 0 {
                doc.push(PRIME_DOC_FIELD, "true");
            }
            for column in &record.columns {
                if let Some(value) = &column.value {
                    doc.push(format!("{}.{}", record.family, column.name), value);
                }
            }
            self.docs.insert(doc_id, doc);
            self.live.insert(doc_id);
            doc_ids.push(doc_id);
        }
        self.rows.insert(row.id.clone(), doc_ids);
    }

    fn live_docs_of(&self, doc_ids: &[u64]) -> Vec<(u64, &RawDocument)> {
        doc_ids
            .iter()
            .filter(|doc_id| self.live.contains(doc_id))
            .filter_map(|doc_id| self.docs.get(doc_id).map(|doc| (*doc_id, doc)))
            .collect()
    }
}

/// In-memory shard with the full shard capability set
#[derive(Default)]
pub struct MemShard {
    state: Mutex<ShardState>,
}

/// `family.column:value` term of a predicate, `None` for the `*` match-all
fn term(predicate: &Predicate) -> Option<(String, String)> {
    let expression = predicate.as_str();
    if expression == "*" {
        return None;
    }
    let (field, value) = expression.split_once(':').unwrap_or((expression, ""));
    Some((field.to_string(), value.to_string()))
}

fn doc_matches(doc: &RawDocument, field: &str, value: &str) -> bool {
    doc.fields
        .iter()
        .any(|(name, stored)| name == field && stored == value)
}

fn filtered(doc: &RawDocument, options: &FetchOptions) -> RawDocument {
    let mut out = RawDocument::new();
    for (name, value) in &doc.fields {
        if options.filter.wants(name) {
            out.push(name.clone(), value.clone());
        }
    }
    out
}

#[async_trait]
impl ShardIndex for MemShard {
    async fn fetch_by_location(&self, doc_id: u64, options: &FetchOptions) -> Result<Option<RawDocument>> {
        let state = self.state.lock();
        Ok(state.docs.get(&doc_id).map(|doc| filtered(doc, options)))
    }

    async fn fetch_row_documents(&self, doc_id: u64, options: &FetchOptions) -> Result<Vec<RawDocument>> {
        let state = self.state.lock();
        let Some(doc_ids) = state.rows.values().find(|doc_ids| doc_ids.contains(&doc_id)) else {
            return Ok(Vec::new());
        };
        let mut documents = Vec::new();
        let mut spent = 0usize;
        for (_, doc) in state.live_docs_of(doc_ids) {
            let doc = filtered(doc, options);
            if !documents.is_empty() && spent + doc.heap_size() > options.max_heap {
                break;
            }
            spent += doc.heap_size();
            documents.push(doc);
        }
        Ok(documents)
    }

    async fn lookup(&self, row_id: &str, record_id: Option<&str>, primary_only: bool) -> Result<RowLookup> {
        let state = self.state.lock();
        let Some(doc_ids) = state.rows.get(row_id) else {
            return Ok(RowLookup::missing());
        };
        let mut lookup = RowLookup::missing();
        for doc_id in doc_ids {
            let Some(doc) = state.docs.get(doc_id) else {
                continue;
            };
            let matches = if primary_only {
                doc.first(PRIME_DOC_FIELD).is_some()
            } else if let Some(record_id) = record_id {
                doc.first(RECORD_ID_FIELD) == Some(record_id)
            } else {
                true
            };
            if !matches {
                continue;
            }
            if state.live.contains(doc_id) {
                lookup.live_matches += 1;
                if lookup.doc_id.is_none() {
                    lookup.doc_id = Some(*doc_id);
                }
            } else {
                lookup.deleted_matches += 1;
            }
        }
        Ok(lookup)
    }

    async fn is_live(&self, doc_id: u64) -> Result<bool> {
        Ok(self.state.lock().live.contains(&doc_id))
    }

    async fn row_record_count(&self, row_id: &str) -> Result<u64> {
        let state = self.state.lock();
        let count = state
            .rows
            .get(row_id)
            .map(|doc_ids| doc_ids.iter().filter(|doc_id| state.live.contains(doc_id)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn search(
        &self,
        predicate: &Predicate,
        _score_mode: ScoreMode,
        window: usize,
        running: Arc<AtomicBool>,
    ) -> Result<ShardHits> {
        if !running.load(Ordering::SeqCst) {
            return Err(TablexError::task_failed("", "search", "scan stopped"));
        }
        let state = self.state.lock();
        let term = term(predicate);
        let mut hits = Vec::new();
        for doc_ids in state.rows.values() {
            let live_docs = state.live_docs_of(doc_ids);
            if live_docs.is_empty() {
                continue;
            }
            let matching = match &term {
                None => live_docs.len(),
                Some((field, value)) => live_docs.iter().filter(|(_, doc)| doc_matches(doc, field, value)).count(),
            };
            if matching == 0 {
                continue;
            }
            let Some(primary) = live_docs
                .iter()
                .find(|(_, doc)| doc.first(PRIME_DOC_FIELD).is_some())
                .map(|(doc_id, _)| *doc_id)
            else {
                continue;
            };
            hits.push(ScoredHit {
                doc_id: primary,
                score: matching as f32,
            });
        }
        let total_hits = hits.len() as u64;
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.doc_id.cmp(&b.doc_id)));
        hits.truncate(window);
        Ok(ShardHits { total_hits, hits })
    }

    async fn count(&self, predicate: &Predicate, running: Arc<AtomicBool>) -> Result<u64> {
        if !running.load(Ordering::SeqCst) {
            return Err(TablexError::task_failed("", "count", "scan stopped"));
        }
        let state = self.state.lock();
        let term = term(predicate);
        let count = state
            .live
            .iter()
            .filter_map(|doc_id| state.docs.get(doc_id))
            .filter(|doc| match &term {
                None => true,
                Some((field, value)) => doc_matches(doc, field, value),
            })
            .count();
        Ok(count as u64)
    }

    async fn terms(&self, family: &str, column: &str, start_with: &str, size: usize) -> Result<Vec<String>> {
        let state = self.state.lock();
        let field = format!("{family}.{column}");
        let mut terms = BTreeSet::new();
        for doc_id in &state.live {
            let Some(doc) = state.docs.get(doc_id) else {
                continue;
            };
            for (name, value) in &doc.fields {
                if name == &field && value.as_str() >= start_with {
                    terms.insert(value.clone());
                }
            }
        }
        Ok(terms.into_iter().take(size).collect())
    }

    async fn record_frequency(&self, family: &str, column: &str, value: &str) -> Result<u64> {
        let state = self.state.lock();
        let field = format!("{family}.{column}");
        let count = state
            .live
            .iter()
            .filter_map(|doc_id| state.docs.get(doc_id))
            .filter(|doc| doc_matches(doc, &field, value))
            .count();
        Ok(count as u64)
    }

    async fn replace_row(&self, row: Row, _wait_for_visibility: bool, _wal: bool) -> Result<()> {
        self.state.lock().store_row(&row);
        Ok(())
    }

    async fn delete_row(&self, row_id: &str, _wait_for_visibility: bool, _wal: bool) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(doc_ids) = state.rows.get(row_id).cloned() {
            for doc_id in doc_ids {
                state.live.remove(&doc_id);
            }
        }
        Ok(())
    }

    async fn optimize(&self, _max_segments: usize) -> Result<()> {
        Ok(())
    }
}

/// In-memory index server: every shard of every table is served locally
#[derive(Default)]
pub struct MemIndexServer {
    tables: Mutex<HashMap<String, Vec<Arc<MemShard>>>>,
}

impl MemIndexServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, table: &str, shards: usize) {
        let shards = (0..shards).map(|_| Arc::new(MemShard::default())).collect();
        self.tables.lock().insert(table.to_string(), shards);
    }
}

#[async_trait]
impl IndexServer for MemIndexServer {
    async fn shard_map(&self, table: &str) -> Result<HashMap<String, Arc<dyn ShardIndex>>> {
        let tables = self.tables.lock();
        let Some(shards) = tables.get(table) else {
            return Err(TablexError::table_unavailable(table));
        };
        Ok(shards
            .iter()
            .enumerate()
            .map(|(position, shard)| (shard_name(position), Arc::clone(shard) as Arc<dyn ShardIndex>))
            .collect())
    }

    async fn shard_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.lock();
        tables
            .get(table)
            .map(Vec::len)
            .ok_or_else(|| TablexError::table_unavailable(table))
    }
}

/// Manager over a fresh in-memory server with one table
#[allow(dead_code)]
pub async fn manager_with_table(table: &str, shards: usize) -> TableManager {
    manager_with_config(table, shards, TablexConfig::new()).await
}

/// Manager over a fresh in-memory server with one table and custom config
#[allow(dead_code)]
pub async fn manager_with_config(table: &str, shards: usize, config: TablexConfig) -> TableManager {
    let server = Arc::new(MemIndexServer::new());
    server.create_table(table, shards);
    TableManager::new(server, config).await.expect("manager construction")
}

/// Record with valued columns only
#[allow(dead_code)]
pub fn record(id: &str, family: &str, columns: &[(&str, &str)]) -> Record {
    Record::new(
        id,
        family,
        columns.iter().map(|(name, value)| Column::new(*name, *value)).collect(),
    )
}

/// REPLACE_ROW mutation storing the given records
#[allow(dead_code)]
pub fn replace_row_mutation(table: &str, row_id: &str, records: Vec<Record>) -> RowMutation {
    RowMutation::new(
        table,
        row_id,
        RowMutationType::ReplaceRow,
        records
            .into_iter()
            .map(|record| RecordMutation::new(RecordMutationType::ReplaceEntireRecord, record))
            .collect(),
    )
}

/// UPDATE_ROW mutation carrying the given record instructions
#[allow(dead_code)]
pub fn update_row_mutation(table: &str, row_id: &str, record_mutations: Vec<RecordMutation>) -> RowMutation {
    RowMutation::new(table, row_id, RowMutationType::UpdateRow, record_mutations)
}
