//! Row mutation orchestration
//!
//! A [`RowMutation`] either replaces a row outright, deletes it, or updates
//! it by reconciling record-level instructions against the stored row. The
//! reconciled row always goes back to the shard as a whole-row replacement;
//! shards never see partial updates. Batches group by table then owning
//! shard: one task per shard batch on the mutation pool, sequential within
//! a shard, fully parallel and non-atomic across shards.

use crate::error::TablexError;
use crate::fanout::FanoutExecutor;
use crate::fetch::RowFetchEngine;
use crate::partition::Partitioner;
use crate::row::{Column, Record, RecordMutationType, Row, RowMutation, RowMutationType};
use crate::selector::Selector;
use crate::shard::{FetchContext, IndexServer, ShardIndex};
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Supplies the stored row an update reconciles against
///
/// Kept narrow so the mutation path depends on exactly one fetch capability
/// rather than the whole fetch surface.
#[async_trait]
pub trait ExistingRowSource: Send + Sync {
    /// The live stored row, `None` when it does not exist or was removed
    async fn existing_row(&self, table: &str, row_id: &str) -> Result<Option<Row>>;
}

#[async_trait]
impl ExistingRowSource for RowFetchEngine {
    async fn existing_row(&self, table: &str, row_id: &str) -> Result<Option<Row>> {
        let selector = Selector::row(row_id);
        let result = self
            .fetch_with_context(table, &selector, FetchContext::Mutation)
            .await?;
        Ok(result.row_result.map(|row_result| row_result.row))
    }
}

/// Applies row mutations to the shards that own them
#[derive(Clone)]
pub struct MutationEngine {
    server: Arc<dyn IndexServer>,
    rows: Arc<dyn ExistingRowSource>,
    executor: Arc<FanoutExecutor>,
    partitioner: Partitioner,
}

impl MutationEngine {
    /// Create an engine mutating through the given server, reconciling
    /// updates against `rows`, batching on the given mutation pool
    pub fn new(
        server: Arc<dyn IndexServer>,
        rows: Arc<dyn ExistingRowSource>,
        executor: Arc<FanoutExecutor>,
    ) -> Self {
        Self {
            server,
            rows,
            executor,
            partitioner: Partitioner::new(),
        }
    }

    /// Apply one mutation on the caller's context
    pub async fn mutate(&self, mutation: RowMutation) -> Result<()> {
        mutation.validate()?;
        let (shard, index) = self.route(&mutation).await?;
        let wait = mutation.wait_to_be_visible;
        self.apply_one(&shard, &index, mutation, wait).await
    }

    /// Apply a batch of mutations
    ///
    /// Mutations are validated up front, grouped by table then owning shard,
    /// and each shard batch runs as one task on the mutation pool. Within a
    /// shard batch mutations apply sequentially and only the last one waits
    /// for visibility when any member asked to. Shard batches are not atomic
    /// with each other: a failing shard does not undo or prevent its
    /// siblings, and the first failure is reported after every task settles.
    pub async fn mutate_batch(&self, mutations: Vec<RowMutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        for mutation in &mutations {
            mutation.validate()?;
        }
        let table_label = mutations[0].table.clone();

        let mut by_table: BTreeMap<String, Vec<RowMutation>> = BTreeMap::new();
        for mutation in mutations {
            by_table.entry(mutation.table.clone()).or_default().push(mutation);
        }

        let mut shard_batches: Vec<(String, Arc<dyn ShardIndex>, Vec<RowMutation>)> = Vec::new();
        for (table, table_mutations) in by_table {
            let shard_map = self.server.shard_map(&table).await?;
            let shard_count = self.server.shard_count(&table).await?;
            let mut by_shard: BTreeMap<String, Vec<RowMutation>> = BTreeMap::new();
            for mutation in table_mutations {
                let shard = self.partitioner.shard_for(&mutation.row_id, shard_count);
                by_shard.entry(shard).or_default().push(mutation);
            }
            for (shard, batch) in by_shard {
                let index = shard_map
                    .get(&shard)
                    .ok_or_else(|| TablexError::shard_not_found(&table, &shard))?;
                shard_batches.push((shard, Arc::clone(index), batch));
            }
        }

        debug!(
            batches = shard_batches.len(),
            "dispatching mutation batch to shard tasks"
        );
        let futures: Vec<_> = shard_batches
            .into_iter()
            .map(|(shard, index, batch)| {
                let engine = self.clone();
                async move { engine.execute_shard_batch(&shard, &index, batch).await }
            })
            .collect();

        let mut first_error = None;
        for outcome in self.executor.run_indexed(&table_label, "mutate_batch", futures).await {
            if let Err(error) = outcome {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn route(&self, mutation: &RowMutation) -> Result<(String, Arc<dyn ShardIndex>)> {
        let shard_map = self.server.shard_map(&mutation.table).await?;
        let shard_count = self.server.shard_count(&mutation.table).await?;
        let shard = self.partitioner.shard_for(&mutation.row_id, shard_count);
        let index = shard_map
            .get(&shard)
            .ok_or_else(|| TablexError::shard_not_found(&mutation.table, &shard))?;
        Ok((shard, Arc::clone(index)))
    }

    async fn execute_shard_batch(
        &self,
        shard: &str,
        index: &Arc<dyn ShardIndex>,
        batch: Vec<RowMutation>,
    ) -> Result<()> {
        // the visibility wait collapses onto the last mutation of the batch
        let wait_any = batch.iter().any(|mutation| mutation.wait_to_be_visible);
        let last = batch.len() - 1;
        for (position, mutation) in batch.into_iter().enumerate() {
            let wait = wait_any && position == last;
            self.apply_one(shard, index, mutation, wait).await?;
        }
        Ok(())
    }

    async fn apply_one(
        &self,
        shard: &str,
        index: &Arc<dyn ShardIndex>,
        mutation: RowMutation,
        wait: bool,
    ) -> Result<()> {
        let started = Instant::now();
        let table = mutation.table.clone();
        let row_id = mutation.row_id.clone();
        match mutation.mutation_type {
            RowMutationType::ReplaceRow => {
                let row = mutation.replacement_row()?;
                index.replace_row(row, wait, mutation.wal).await?;
            }
            RowMutationType::UpdateRow => {
                let existing = self.rows.existing_row(&table, &row_id).await?;
                match reconcile_row(&mutation, existing) {
                    Some(row) => index.replace_row(row, wait, mutation.wal).await?,
                    // every record reconciled away; nothing left to store
                    None => index.delete_row(&row_id, wait, mutation.wal).await?,
                }
            }
            RowMutationType::DeleteRow => {
                index.delete_row(&row_id, wait, mutation.wal).await?;
            }
        }
        debug!(
            table,
            shard,
            row_id,
            elapsed = ?started.elapsed(),
            "applied row mutation"
        );
        Ok(())
    }
}

/// Reconcile an update mutation against the stored row
///
/// Existing records keep their stored order; a record matched by id to a
/// pending record mutation applies that rule and consumes the mutation.
/// Unconsumed mutations then create new records in submission order, except
/// deletes, which have nothing left to remove. `None` means the reconciled
/// row has no records and should be deleted rather than stored.
pub(crate) fn reconcile_row(mutation: &RowMutation, existing: Option<Row>) -> Option<Row> {
    let existing = existing.unwrap_or_else(|| Row::new(mutation.row_id.clone(), Vec::new()));
    let pending = &mutation.record_mutations;
    let mut consumed = vec![false; pending.len()];
    let mut records = Vec::with_capacity(existing.records.len());

    for record in existing.records {
        let matched = pending
            .iter()
            .enumerate()
            .find(|(position, candidate)| !consumed[*position] && candidate.record.id == record.id)
            .map(|(position, _)| position);
        let Some(position) = matched else {
            records.push(record);
            continue;
        };
        consumed[position] = true;
        let submitted = &pending[position];
        match submitted.mutation_type {
            RecordMutationType::DeleteEntireRecord => {}
            RecordMutationType::ReplaceEntireRecord => records.push(submitted.record.clone()),
            RecordMutationType::ReplaceColumns => records.push(replace_columns(record, &submitted.record)),
            RecordMutationType::AppendColumnValues => records.push(append_columns(record, &submitted.record)),
        }
    }

    for (position, submitted) in pending.iter().enumerate() {
        if consumed[position] {
            continue;
        }
        match submitted.mutation_type {
            // nothing stored to delete
            RecordMutationType::DeleteEntireRecord => {}
            _ => records.push(submitted.record.clone()),
        }
    }

    if records.is_empty() {
        None
    } else {
        Some(Row::new(mutation.row_id.clone(), records))
    }
}

/// Submitted columns overwrite by name; existing columns not named survive
/// first, submitted columns follow
fn replace_columns(existing: Record, submitted: &Record) -> Record {
    let submitted_names: HashSet<&str> = submitted.columns.iter().map(|column| column.name.as_str()).collect();
    let mut columns: Vec<Column> = existing
        .columns
        .into_iter()
        .filter(|column| !submitted_names.contains(column.name.as_str()))
        .collect();
    columns.extend(submitted.columns.iter().cloned());
    Record::new(existing.id, existing.family, columns)
}

/// Non-null submitted columns append to the existing list; duplicates by
/// name are allowed
fn append_columns(existing: Record, submitted: &Record) -> Record {
    let mut columns = existing.columns;
    columns.extend(
        submitted
            .columns
            .iter()
            .filter(|column| column.value.is_some())
            .cloned(),
    );
    Record::new(existing.id, existing.family, columns)
}
