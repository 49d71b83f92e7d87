//! Row and record fetching
//!
//! [`RowFetchEngine`] resolves a [`Selector`] to stored documents and
//! materializes them as [`FetchResult`]s. Row ids route through the
//! partitioner to the shard that owns the row; location ids go straight to
//! the named shard. The exists/deleted flags distinguish an address that
//! never resolved from one whose data has been removed. Batch fetches run
//! on the read pool and come back index-aligned with their selectors.

use crate::error::TablexError;
use crate::fanout::FanoutExecutor;
use crate::partition::Partitioner;
use crate::row::{Column, Record, Row};
use crate::selector::{FetchResult, LocationId, Selector, NOT_FOUND};
use crate::shard::{
    FetchContext, FetchOptions, FieldFilter, IndexServer, RawDocument, ShardIndex, FAMILY_FIELD,
    RECORD_ID_FIELD, ROW_ID_FIELD,
};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves selectors against the locally-served shards of a table
#[derive(Clone)]
pub struct RowFetchEngine {
    server: Arc<dyn IndexServer>,
    executor: Arc<FanoutExecutor>,
    partitioner: Partitioner,
    max_heap: usize,
}

impl RowFetchEngine {
    /// Create an engine fetching through the given server, batching on the
    /// given pool, with a per-row materialization heap budget in bytes
    pub fn new(server: Arc<dyn IndexServer>, executor: Arc<FanoutExecutor>, max_heap: usize) -> Self {
        Self {
            server,
            executor,
            partitioner: Partitioner::new(),
            max_heap,
        }
    }

    /// Fetch the row or record a selector addresses
    pub async fn fetch_row(&self, table: &str, selector: &Selector) -> Result<FetchResult> {
        self.fetch_with_context(table, selector, FetchContext::Read).await
    }

    /// Fetch a batch of selectors concurrently on the read pool
    ///
    /// Results are index-aligned with the selectors regardless of completion
    /// order. The first selector failure fails the whole call; fetches have
    /// no side effects, so nothing needs rolling back.
    pub async fn fetch_row_batch(&self, table: &str, selectors: Vec<Selector>) -> Result<Vec<FetchResult>> {
        if selectors.is_empty() {
            return Ok(Vec::new());
        }
        debug!(table, count = selectors.len(), "fetching row batch");

        let futures: Vec<_> = selectors
            .into_iter()
            .map(|selector| {
                let engine = self.clone();
                let table = table.to_string();
                async move { engine.fetch_with_context(&table, &selector, FetchContext::Read).await }
            })
            .collect();

        let mut results = Vec::with_capacity(futures.len());
        for outcome in self.executor.run_indexed(table, "fetch_row_batch", futures).await {
            results.push(outcome?);
        }
        Ok(results)
    }

    /// Fetch with an explicit visibility context. The mutation path reads
    /// rows it is about to rewrite through [`FetchContext::Mutation`].
    pub(crate) async fn fetch_with_context(
        &self,
        table: &str,
        selector: &Selector,
        context: FetchContext,
    ) -> Result<FetchResult> {
        selector.validate()?;

        // inbound sentinel from an earlier miss short-circuits before any
        // shard work
        if selector.location_id.as_deref() == Some(NOT_FOUND) {
            return Ok(FetchResult::not_found(table));
        }

        let shard_map = self.server.shard_map(table).await?;
        let options = self.options_for(selector, context);

        match &selector.location_id {
            Some(location_id) => {
                let location: LocationId = location_id.parse()?;
                self.fetch_at_location(table, &shard_map, &location, selector, &options)
                    .await
            }
            None => self.fetch_by_row_id(table, &shard_map, selector, &options).await,
        }
    }

    fn options_for(&self, selector: &Selector, context: FetchContext) -> FetchOptions {
        FetchOptions {
            filter: FieldFilter::from_selector(selector),
            highlight: selector.highlight.clone(),
            context,
            max_heap: self.max_heap,
        }
    }

    async fn fetch_at_location(
        &self,
        table: &str,
        shard_map: &HashMap<String, Arc<dyn ShardIndex>>,
        location: &LocationId,
        selector: &Selector,
        options: &FetchOptions,
    ) -> Result<FetchResult> {
        let index = shard_map
            .get(location.shard())
            .ok_or_else(|| TablexError::shard_not_found(table, location.shard()))?;

        let Some(document) = index.fetch_by_location(location.doc_id(), options).await? else {
            return Ok(FetchResult::not_found(table));
        };
        if !index.is_live(location.doc_id()).await? {
            return Ok(FetchResult::removed(table));
        }

        if selector.record_only {
            let row_id = document.first(ROW_ID_FIELD).unwrap_or_default().to_string();
            return Ok(FetchResult::record(table, row_id, record_from_document(&document)));
        }

        // the location is a hint at one document of the row; the row itself
        // is materialized from its primary document
        let Some(row_id) = document.first(ROW_ID_FIELD).map(str::to_string) else {
            return Err(TablexError::fetch_failed(
                table,
                location.shard(),
                format!("document [{}] carries no row id", location.doc_id()),
            ));
        };
        self.fetch_row_in_shard(table, location.shard(), index, &row_id, selector, options)
            .await
    }

    async fn fetch_by_row_id(
        &self,
        table: &str,
        shard_map: &HashMap<String, Arc<dyn ShardIndex>>,
        selector: &Selector,
        options: &FetchOptions,
    ) -> Result<FetchResult> {
        // validate() guarantees the row id is present on this path
        let Some(row_id) = selector.row_id.as_deref() else {
            return Err(TablexError::invalid_selector("no addressing fields are set"));
        };

        let shard_count = self.server.shard_count(table).await?;
        let shard = self.partitioner.shard_for(row_id, shard_count);
        let index = shard_map
            .get(&shard)
            .ok_or_else(|| TablexError::shard_not_found(table, &shard))?;

        if selector.record_only {
            // validate() guarantees the record id on this path
            let record_id = selector.record_id.as_deref().unwrap_or_default();
            let lookup = index.lookup(row_id, Some(record_id), false).await?;
            if lookup.live_matches > 1 {
                warn!(
                    table,
                    row_id,
                    record_id,
                    matches = lookup.live_matches,
                    "record resolved to more than one live document, using the first"
                );
            }
            let Some(doc_id) = lookup.doc_id else {
                return Ok(missing_result(table, &lookup));
            };
            let Some(document) = index.fetch_by_location(doc_id, options).await? else {
                // the lookup raced a delete
                return Ok(FetchResult::not_found(table));
            };
            return Ok(FetchResult::record(table, row_id, record_from_document(&document)));
        }

        self.fetch_row_in_shard(table, &shard, index, row_id, selector, options)
            .await
    }

    async fn fetch_row_in_shard(
        &self,
        table: &str,
        shard: &str,
        index: &Arc<dyn ShardIndex>,
        row_id: &str,
        selector: &Selector,
        options: &FetchOptions,
    ) -> Result<FetchResult> {
        let lookup = index.lookup(row_id, None, true).await?;
        if lookup.live_matches > 1 {
            warn!(
                table,
                shard,
                row_id,
                matches = lookup.live_matches,
                "row has more than one live primary document, using the first"
            );
        }
        let Some(primary) = lookup.doc_id else {
            return Ok(missing_result(table, &lookup));
        };

        if selector.is_ids_only() {
            let record_count = index.row_record_count(row_id).await?;
            return Ok(FetchResult::row(table, Row::ids_only(row_id, record_count)));
        }

        let documents = index.fetch_row_documents(primary, options).await?;
        Ok(FetchResult::row(table, row_from_documents(row_id, documents)))
    }
}

fn missing_result(table: &str, lookup: &crate::shard::RowLookup) -> FetchResult {
    if lookup.deleted_matches > 0 {
        FetchResult::removed(table)
    } else {
        FetchResult::not_found(table)
    }
}

/// Turn one stored document into a record
///
/// Control fields supply the record id and family; column fields drop their
/// family qualifier. Repeated field names come through as repeated columns.
pub(crate) fn record_from_document(document: &RawDocument) -> Record {
    let mut id = String::new();
    let mut family = String::new();
    let mut columns = Vec::new();
    for (name, value) in &document.fields {
        match name.as_str() {
            RECORD_ID_FIELD => id = value.clone(),
            FAMILY_FIELD => family = value.clone(),
            ROW_ID_FIELD => {}
            qualified => {
                let column = match qualified.rsplit_once('.') {
                    Some((_, column)) => column,
                    None => qualified,
                };
                columns.push(Column::new(column, value.clone()));
            }
        }
    }
    Record::new(id, family, columns)
}

/// Materialize a row from its stored documents, one record per document
pub(crate) fn row_from_documents(row_id: &str, documents: Vec<RawDocument>) -> Row {
    let records = documents.iter().map(record_from_document).collect();
    Row::new(row_id, records)
}
