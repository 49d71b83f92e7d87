//! Row and record addressing for fetches
//!
//! A [`Selector`] names what to fetch: a whole row, a single record, or a
//! document at a known location. Location ids are cache hints in
//! `"<shard>/<docId>"` form; they speed up a repeat fetch but are never
//! durable keys. [`FetchResult`] carries the outcome together with the
//! exists/deleted distinction between a row that never was and a row that
//! has been removed.

use crate::error::TablexError;
use crate::query::Predicate;
use crate::row::{Record, Row};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Sentinel location id marking a selector that resolved to nothing
pub const NOT_FOUND: &str = "NOT_FOUND";

/// Term highlighting parameters applied while materializing a fetched record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightOptions {
    /// Predicate whose matching terms get wrapped; `None` reuses the
    /// submitting query's predicate
    pub predicate: Option<Predicate>,
    /// Text placed before each matched term
    pub pre_tag: String,
    /// Text placed after each matched term
    pub post_tag: String,
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self {
            predicate: None,
            pre_tag: "<<<".to_string(),
            post_tag: ">>>".to_string(),
        }
    }
}

impl HighlightOptions {
    /// Create highlight options for a predicate with the default tags
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            ..Self::default()
        }
    }
}

/// Parsed form of a location id: the shard holding a document and the
/// document's internal id within that shard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationId {
    shard: String,
    doc_id: u64,
}

impl LocationId {
    /// Create a location id from its parts
    pub fn new(shard: impl Into<String>, doc_id: u64) -> Self {
        Self {
            shard: shard.into(),
            doc_id,
        }
    }

    /// Shard name component
    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// Internal document id component
    pub fn doc_id(&self) -> u64 {
        self.doc_id
    }
}

impl Display for LocationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.shard, self.doc_id)
    }
}

impl FromStr for LocationId {
    type Err = TablexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (shard, doc) = s.rsplit_once('/').ok_or_else(|| {
            TablexError::invalid_selector(format!("location id [{}] is not in <shard>/<docId> form", s))
        })?;
        if shard.is_empty() || shard.contains('/') {
            return Err(TablexError::invalid_selector(format!(
                "location id [{}] is not in <shard>/<docId> form",
                s
            )));
        }
        let doc_id = doc.parse::<u64>().map_err(|_| {
            TablexError::invalid_selector(format!("location id [{}] has a non-numeric document id", s))
        })?;
        Ok(Self {
            shard: shard.to_string(),
            doc_id,
        })
    }
}

/// Addresses a row or a single record for fetching
///
/// Exactly one addressing mode must be set: a location id alone, a row id
/// alone, or a row id plus record id with `record_only`. The optional
/// restriction sets narrow which column families and columns come back;
/// leaving both unset fetches everything, while setting both present but
/// empty requests an ids-only fetch (row id and record count, no field
/// content).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// Cache hint naming an exact document location, `"<shard>/<docId>"`
    pub location_id: Option<String>,
    /// Row to fetch, resolved through the partitioner
    pub row_id: Option<String>,
    /// Record within the row, only meaningful with `record_only`
    pub record_id: Option<String>,
    /// Fetch just the addressed record instead of its whole row
    pub record_only: bool,
    /// Column families to include; `None` means no family restriction
    pub column_families_to_fetch: Option<HashSet<String>>,
    /// Specific (family, column) pairs to include; `None` means no column
    /// restriction
    pub columns_to_fetch: Option<HashMap<String, HashSet<String>>>,
    /// Highlight matched terms in fetched values
    pub highlight: Option<HighlightOptions>,
}

impl Selector {
    /// Address a whole row by id
    pub fn row(row_id: impl Into<String>) -> Self {
        Self {
            row_id: Some(row_id.into()),
            ..Self::default()
        }
    }

    /// Address a single record by row id and record id
    pub fn record(row_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            row_id: Some(row_id.into()),
            record_id: Some(record_id.into()),
            record_only: true,
            ..Self::default()
        }
    }

    /// Address a document by location id
    pub fn location(location_id: impl Into<String>) -> Self {
        Self {
            location_id: Some(location_id.into()),
            ..Self::default()
        }
    }

    /// Restrict the fetch to the given column families
    pub fn column_families<I, S>(mut self, families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column_families_to_fetch
            .get_or_insert_with(HashSet::new)
            .extend(families.into_iter().map(Into::into));
        self
    }

    /// Restrict the fetch to the given columns of one family
    pub fn columns<I, S>(mut self, family: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns_to_fetch
            .get_or_insert_with(HashMap::new)
            .entry(family.into())
            .or_default()
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// Request an ids-only fetch: row id and record count without field
    /// content
    pub fn ids_only(mut self) -> Self {
        self.column_families_to_fetch = Some(HashSet::new());
        self.columns_to_fetch = Some(HashMap::new());
        self
    }

    /// Highlight matched terms in the fetched values
    pub fn highlight(mut self, options: HighlightOptions) -> Self {
        self.highlight = Some(options);
        self
    }

    /// True when both restriction sets are present but empty, the ids-only
    /// request shape
    pub fn is_ids_only(&self) -> bool {
        matches!(&self.column_families_to_fetch, Some(families) if families.is_empty())
            && matches!(&self.columns_to_fetch, Some(columns) if columns.is_empty())
    }

    /// Check that exactly one addressing mode is set, naming the conflicting
    /// fields otherwise
    pub fn validate(&self) -> Result<(), TablexError> {
        if let Some(location_id) = &self.location_id {
            return match (&self.row_id, &self.record_id) {
                (Some(row_id), Some(record_id)) => Err(TablexError::invalid_selector(format!(
                    "location id [{}], row id [{}] and record id [{}] are all set; if the location id is set, row id and record id cannot be",
                    location_id, row_id, record_id
                ))),
                (None, Some(record_id)) => Err(TablexError::invalid_selector(format!(
                    "location id [{}] and record id [{}] are both set; if the location id is set, the record id cannot be",
                    location_id, record_id
                ))),
                (Some(row_id), None) => Err(TablexError::invalid_selector(format!(
                    "location id [{}] and row id [{}] are both set; if the location id is set, the row id cannot be",
                    location_id, row_id
                ))),
                (None, None) => Ok(()),
            };
        }

        match (&self.row_id, &self.record_id) {
            (Some(row_id), Some(record_id)) if !self.record_only => Err(TablexError::invalid_selector(format!(
                "row id [{}] and record id [{}] are set but record_only is not; drop the record id to fetch the whole row, or set record_only for the single record",
                row_id, record_id
            ))),
            (Some(_), Some(_)) => Ok(()),
            (Some(row_id), None) if self.record_only => Err(TablexError::invalid_selector(format!(
                "record_only is set for row id [{}] but no record id names the record",
                row_id
            ))),
            (Some(_), None) => Ok(()),
            (None, Some(record_id)) => Err(TablexError::invalid_selector(format!(
                "record id [{}] is set without a row id",
                record_id
            ))),
            (None, None) => Err(TablexError::invalid_selector(
                "no addressing fields are set; set a location id, a row id, or a row id with a record id",
            )),
        }
    }
}

/// A materialized row from a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRowResult {
    pub row: Row,
}

/// A materialized single record from a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRecordResult {
    /// Row the record belongs to
    pub row_id: String,
    pub record: Record,
}

/// Outcome of a row or record fetch
///
/// `exists=false, deleted=false` means the address never resolved to stored
/// data; `exists=false, deleted=true` means the document was there and has
/// been removed. At most one of the two payload fields is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Table the fetch ran against
    pub table: String,
    /// Whether live data was found at the address
    pub exists: bool,
    /// Whether the address pointed at removed data
    pub deleted: bool,
    /// Whole-row payload
    pub row_result: Option<FetchRowResult>,
    /// Single-record payload
    pub record_result: Option<FetchRecordResult>,
}

impl FetchResult {
    /// Result for an address that resolved to nothing
    pub fn not_found(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            exists: false,
            deleted: false,
            row_result: None,
            record_result: None,
        }
    }

    /// Result for an address pointing at removed data
    pub fn removed(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            exists: false,
            deleted: true,
            row_result: None,
            record_result: None,
        }
    }

    /// Result carrying a materialized row
    pub fn row(table: impl Into<String>, row: Row) -> Self {
        Self {
            table: table.into(),
            exists: true,
            deleted: false,
            row_result: Some(FetchRowResult { row }),
            record_result: None,
        }
    }

    /// Result carrying a materialized record
    pub fn record(table: impl Into<String>, row_id: impl Into<String>, record: Record) -> Self {
        Self {
            table: table.into(),
            exists: true,
            deleted: false,
            row_result: None,
            record_result: Some(FetchRecordResult {
                row_id: row_id.into(),
                record,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_mode_selectors_validate() {
        assert!(Selector::row("row-1").validate().is_ok());
        assert!(Selector::record("row-1", "rec-1").validate().is_ok());
        assert!(Selector::location("shard-00000001/42").validate().is_ok());
    }

    #[test]
    fn test_location_with_record_only_is_legal() {
        let mut selector = Selector::location("shard-00000001/42");
        selector.record_only = true;
        assert!(selector.validate().is_ok());
    }

    #[test]
    fn test_conflicting_modes_are_rejected() {
        let mut selector = Selector::location("shard-00000001/42");
        selector.row_id = Some("row-1".to_string());
        assert!(selector.validate().is_err());

        selector.record_id = Some("rec-1".to_string());
        let err = selector.validate().unwrap_err();
        assert!(err.to_string().contains("row-1"));
        assert!(err.to_string().contains("rec-1"));

        selector.row_id = None;
        assert!(selector.validate().is_err());
    }

    #[test]
    fn test_row_and_record_without_record_only_is_rejected() {
        let mut selector = Selector::record("row-1", "rec-1");
        selector.record_only = false;
        let err = selector.validate().unwrap_err();
        assert!(matches!(err, TablexError::InvalidSelector { .. }));
        assert!(err.to_string().contains("record_only"));
    }

    #[test]
    fn test_record_only_without_record_id_is_rejected() {
        let mut selector = Selector::row("row-1");
        selector.record_only = true;
        assert!(selector.validate().is_err());
    }

    #[test]
    fn test_record_id_without_row_id_is_rejected() {
        let selector = Selector {
            record_id: Some("rec-1".to_string()),
            ..Selector::default()
        };
        assert!(selector.validate().is_err());
    }

    #[test]
    fn test_empty_selector_is_rejected() {
        let err = Selector::default().validate().unwrap_err();
        assert!(err.to_string().contains("no addressing fields"));
    }

    #[test]
    fn test_location_id_round_trip() {
        let location = LocationId::new("shard-00000007", 1234);
        assert_eq!(location.to_string(), "shard-00000007/1234");

        let parsed: LocationId = "shard-00000007/1234".parse().unwrap();
        assert_eq!(parsed, location);
        assert_eq!(parsed.shard(), "shard-00000007");
        assert_eq!(parsed.doc_id(), 1234);
    }

    #[test]
    fn test_malformed_location_ids_are_rejected() {
        assert!("no-separator".parse::<LocationId>().is_err());
        assert!("a/b/3".parse::<LocationId>().is_err());
        assert!("/3".parse::<LocationId>().is_err());
        assert!("shard-00000001/abc".parse::<LocationId>().is_err());
    }

    #[test]
    fn test_ids_only_shape() {
        let selector = Selector::row("row-1").ids_only();
        assert!(selector.is_ids_only());

        let restricted = Selector::row("row-1").column_families(["users"]);
        assert!(!restricted.is_ids_only());
        assert!(!Selector::row("row-1").is_ids_only());
    }

    #[test]
    fn test_restriction_builders_accumulate() {
        let selector = Selector::row("row-1")
            .column_families(["users"])
            .columns("orders", ["total", "ts"]);

        let families = selector.column_families_to_fetch.as_ref().unwrap();
        assert!(families.contains("users"));
        let columns = selector.columns_to_fetch.as_ref().unwrap();
        assert_eq!(columns["orders"].len(), 2);
    }

    #[test]
    fn test_fetch_result_flag_shapes() {
        let absent = FetchResult::not_found("events");
        assert!(!absent.exists);
        assert!(!absent.deleted);

        let removed = FetchResult::removed("events");
        assert!(!removed.exists);
        assert!(removed.deleted);

        let row = FetchResult::row("events", Row::new("row-1", vec![]));
        assert!(row.exists);
        assert!(!row.deleted);
        assert!(row.row_result.is_some());
        assert!(row.record_result.is_none());
    }
}
