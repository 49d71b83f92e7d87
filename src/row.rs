//! Row-oriented data model for tablex
//!
//! This module provides the structures a table is made of and the mutation
//! envelope used to change them:
//! - Column/Record/Row: the stored shape of data, grouped by column family
//! - RowMutation/RecordMutation: replace/update/delete instructions with
//!   field-level merge rules for partial record updates

use crate::error::TablexError;
use serde::{Deserialize, Serialize};

/// A named value inside a record
///
/// A null value is legal in mutation payloads; append-style mutations skip
/// null columns rather than storing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, unique only in combination with its family
    pub name: String,
    /// Column value, `None` for a null payload
    pub value: Option<String>,
}

impl Column {
    /// Create a column with a value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a column with a null value
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// A record groups columns under a column family within a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record id, unique within its row
    pub id: String,
    /// Column family this record belongs to
    pub family: String,
    /// Ordered column list; duplicate names are legal (multi-valued columns)
    pub columns: Vec<Column>,
}

impl Record {
    /// Create a record from its parts
    pub fn new(id: impl Into<String>, family: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            id: id.into(),
            family: family.into(),
            columns,
        }
    }
}

/// A row is the unit of co-location and replacement: all of its records live
/// in the same shard and every mutation rewrites the row as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Row id, unique within its table
    pub id: String,
    /// Ordered record list; empty for ids-only fetches
    pub records: Vec<Record>,
    /// Number of records in the stored row. Tracks `records.len()` except for
    /// ids-only fetches, where records are not materialized.
    pub record_count: u64,
}

impl Row {
    /// Create a row from materialized records
    pub fn new(id: impl Into<String>, records: Vec<Record>) -> Self {
        let record_count = records.len() as u64;
        Self {
            id: id.into(),
            records,
            record_count,
        }
    }

    /// Create an ids-only row: the id and record count without field content
    pub fn ids_only(id: impl Into<String>, record_count: u64) -> Self {
        Self {
            id: id.into(),
            records: Vec::new(),
            record_count,
        }
    }
}

/// Row-level mutation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowMutationType {
    /// Replace the whole row with the records carried by the mutation
    ReplaceRow,
    /// Reconcile the mutation's record mutations against the existing row
    UpdateRow,
    /// Remove the row entirely
    DeleteRow,
}

/// Record-level mutation kinds used inside an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordMutationType {
    /// Take the submitted record verbatim
    ReplaceEntireRecord,
    /// Overwrite columns named in the submitted record, keep the rest
    ReplaceColumns,
    /// Add every non-null submitted column; existing values are kept, so
    /// duplicates can accumulate
    AppendColumnValues,
    /// Drop the record
    DeleteEntireRecord,
}

/// One record-level instruction inside a row mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMutation {
    /// How the submitted record applies to the existing one
    pub mutation_type: RecordMutationType,
    /// Submitted record payload; matched to existing records by id
    pub record: Record,
}

impl RecordMutation {
    /// Create a record mutation from its parts
    pub fn new(mutation_type: RecordMutationType, record: Record) -> Self {
        Self { mutation_type, record }
    }

    /// Create a delete instruction for a record id
    pub fn delete(record_id: impl Into<String>) -> Self {
        Self {
            mutation_type: RecordMutationType::DeleteEntireRecord,
            record: Record::new(record_id, "", Vec::new()),
        }
    }
}

/// A mutation addressed to one row of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMutation {
    /// Target table
    pub table: String,
    /// Target row id; also determines the target shard
    pub row_id: String,
    /// Row-level mutation kind
    pub mutation_type: RowMutationType,
    /// Record-level instructions, in submission order
    pub record_mutations: Vec<RecordMutation>,
    /// Block until the change is visible to readers before returning
    pub wait_to_be_visible: bool,
    /// Write the change to the shard's write-ahead log
    pub wal: bool,
}

impl RowMutation {
    /// Create a mutation with the default durability flags (no visibility
    /// wait, WAL enabled)
    pub fn new(
        table: impl Into<String>,
        row_id: impl Into<String>,
        mutation_type: RowMutationType,
        record_mutations: Vec<RecordMutation>,
    ) -> Self {
        Self {
            table: table.into(),
            row_id: row_id.into(),
            mutation_type,
            record_mutations,
            wait_to_be_visible: false,
            wal: true,
        }
    }

    /// Check the mutation is addressable before any shard work happens
    pub fn validate(&self) -> Result<(), TablexError> {
        if self.table.is_empty() {
            return Err(TablexError::invalid_mutation("missing table name"));
        }
        if self.row_id.is_empty() {
            return Err(TablexError::invalid_mutation(format!(
                "missing row id for mutation on table [{}]",
                self.table
            )));
        }
        Ok(())
    }

    /// Build the replacement row for a REPLACE_ROW mutation
    ///
    /// Every record mutation must be `ReplaceEntireRecord`; a whole-row
    /// replacement has no existing state for the other kinds to merge with.
    pub fn replacement_row(&self) -> Result<Row, TablexError> {
        let mut records = Vec::with_capacity(self.record_mutations.len());
        for record_mutation in &self.record_mutations {
            match record_mutation.mutation_type {
                RecordMutationType::ReplaceEntireRecord => records.push(record_mutation.record.clone()),
                other => {
                    return Err(TablexError::unsupported_mutation(
                        format!("{:?}", other),
                        "replace-row construction",
                    ))
                }
            }
        }
        Ok(Row::new(self.row_id.clone(), records))
    }
}
