//! End-to-end mutation tests through the full manager stack
//!
//! Every mutation goes in through the public surface and is verified by
//! fetching the stored row back out.

mod common;

use common::{
    manager_with_table, record, replace_row_mutation, update_row_mutation, MemIndexServer,
};
use std::sync::Arc;
use tablex::{
    Column, Record, RecordMutation, RecordMutationType, RowMutation, RowMutationType, Selector,
    TableManager, TablexConfig, TablexError,
};

fn column_values(record: &Record) -> Vec<(&str, Option<&str>)> {
    record
        .columns
        .iter()
        .map(|column| (column.name.as_str(), column.value.as_deref()))
        .collect()
}

#[tokio::test]
async fn test_replace_row_overwrites_previous_generation() {
    let manager = manager_with_table("events", 1).await;
    manager
        .mutate(replace_row_mutation(
            "events",
            "row-1",
            vec![
                record("rec-1", "users", &[("name", "ada")]),
                record("rec-2", "users", &[("name", "grace")]),
            ],
        ))
        .await
        .unwrap();
    manager
        .mutate(replace_row_mutation(
            "events",
            "row-1",
            vec![record("rec-9", "users", &[("name", "lovelace")])],
        ))
        .await
        .unwrap();

    let result = manager.fetch_row("events", &Selector::row("row-1")).await.unwrap();
    let row = &result.row_result.as_ref().unwrap().row;
    assert_eq!(row.record_count, 1);
    assert_eq!(row.records[0].id, "rec-9");
}

#[tokio::test]
async fn test_update_append_accumulates_and_skips_nulls() {
    let manager = manager_with_table("events", 1).await;
    manager
        .mutate(replace_row_mutation(
            "events",
            "row-1",
            vec![record("rec-1", "users", &[("a", "1")])],
        ))
        .await
        .unwrap();

    let append = Record::new(
        "rec-1",
        "users",
        vec![Column::new("a", "2"), Column::null("b"), Column::new("c", "3")],
    );
    manager
        .mutate(update_row_mutation(
            "events",
            "row-1",
            vec![RecordMutation::new(RecordMutationType::AppendColumnValues, append)],
        ))
        .await
        .unwrap();

    let result = manager.fetch_row("events", &Selector::row("row-1")).await.unwrap();
    let stored = &result.row_result.as_ref().unwrap().row.records[0];
    // the duplicate name is a legal multi-value; the null never lands
    assert_eq!(
        column_values(stored),
        vec![("a", Some("1")), ("a", Some("2")), ("c", Some("3"))]
    );
}

#[tokio::test]
async fn test_update_append_of_all_null_columns_is_noop() {
    let manager = manager_with_table("events", 1).await;
    manager
        .mutate(replace_row_mutation(
            "events",
            "row-1",
            vec![record("rec-1", "users", &[("a", "1"), ("b", "2")])],
        ))
        .await
        .unwrap();
    let before = manager.fetch_row("events", &Selector::row("row-1")).await.unwrap();

    let nulls = Record::new("rec-1", "users", vec![Column::null("a"), Column::null("x")]);
    manager
        .mutate(update_row_mutation(
            "events",
            "row-1",
            vec![RecordMutation::new(RecordMutationType::AppendColumnValues, nulls)],
        ))
        .await
        .unwrap();

    let after = manager.fetch_row("events", &Selector::row("row-1")).await.unwrap();
    assert_eq!(before.row_result, after.row_result);
}

#[tokio::test]
async fn test_update_replace_columns_keeps_unnamed_columns() {
    let manager = manager_with_table("events", 1).await;
    manager
        .mutate(replace_row_mutation(
            "events",
            "row-1",
            vec![record("rec-1", "users", &[("a", "1"), ("b", "2"), ("c", "3")])],
        ))
        .await
        .unwrap();

    manager
        .mutate(update_row_mutation(
            "events",
            "row-1",
            vec![RecordMutation::new(
                RecordMutationType::ReplaceColumns,
                record("rec-1", "users", &[("b", "20"), ("d", "40")]),
            )],
        ))
        .await
        .unwrap();

    let result = manager.fetch_row("events", &Selector::row("row-1")).await.unwrap();
    let stored = &result.row_result.as_ref().unwrap().row.records[0];
    assert_eq!(
        column_values(stored),
        vec![
            ("a", Some("1")),
            ("c", Some("3")),
            ("b", Some("20")),
            ("d", Some("40"))
        ]
    );
}

#[tokio::test]
async fn test_update_delete_record_keeps_row_siblings() {
    let manager = manager_with_table("events", 1).await;
    manager
        .mutate(replace_row_mutation(
            "events",
            "row-1",
            vec![
                record("rec-1", "users", &[("name", "ada")]),
                record("rec-2", "users", &[("name", "grace")]),
            ],
        ))
        .await
        .unwrap();

    manager
        .mutate(update_row_mutation(
            "events",
            "row-1",
            vec![RecordMutation::delete("rec-1")],
        ))
        .await
        .unwrap();

    let result = manager.fetch_row("events", &Selector::row("row-1")).await.unwrap();
    let row = &result.row_result.as_ref().unwrap().row;
    assert_eq!(row.record_count, 1);
    assert_eq!(row.records[0].id, "rec-2");
}

#[tokio::test]
async fn test_update_reconciling_every_record_away_deletes_the_row() {
    let manager = manager_with_table("events", 1).await;
    manager
        .mutate(replace_row_mutation(
            "events",
            "row-1",
            vec![record("rec-1", "users", &[("name", "ada")])],
        ))
        .await
        .unwrap();

    manager
        .mutate(update_row_mutation(
            "events",
            "row-1",
            vec![RecordMutation::delete("rec-1")],
        ))
        .await
        .unwrap();

    let result = manager.fetch_row("events", &Selector::row("row-1")).await.unwrap();
    assert!(!result.exists);
    assert!(result.deleted);
}

#[tokio::test]
async fn test_update_of_missing_row_creates_it() {
    let manager = manager_with_table("events", 1).await;

    manager
        .mutate(update_row_mutation(
            "events",
            "row-new",
            vec![
                RecordMutation::new(
                    RecordMutationType::AppendColumnValues,
                    record("rec-1", "users", &[("name", "ada")]),
                ),
                RecordMutation::new(
                    RecordMutationType::ReplaceColumns,
                    record("rec-2", "users", &[("name", "grace")]),
                ),
            ],
        ))
        .await
        .unwrap();

    let result = manager.fetch_row("events", &Selector::row("row-new")).await.unwrap();
    assert!(result.exists);
    let row = &result.row_result.as_ref().unwrap().row;
    assert_eq!(row.record_count, 2);
    assert_eq!(row.records[0].id, "rec-1");
    assert_eq!(row.records[1].id, "rec-2");
}

#[tokio::test]
async fn test_update_with_duplicate_record_ids_consumes_first_match() {
    let manager = manager_with_table("events", 1).await;
    manager
        .mutate(replace_row_mutation(
            "events",
            "row-1",
            vec![record("rec-1", "users", &[("v", "old")])],
        ))
        .await
        .unwrap();

    manager
        .mutate(update_row_mutation(
            "events",
            "row-1",
            vec![
                RecordMutation::new(
                    RecordMutationType::AppendColumnValues,
                    record("rec-1", "users", &[("v", "new1")]),
                ),
                RecordMutation::new(
                    RecordMutationType::AppendColumnValues,
                    record("rec-1", "users", &[("v", "new2")]),
                ),
            ],
        ))
        .await
        .unwrap();

    let result = manager.fetch_row("events", &Selector::row("row-1")).await.unwrap();
    let row = &result.row_result.as_ref().unwrap().row;
    // the first instruction reconciled into the stored record; the second
    // found its match consumed and created a sibling record
    assert_eq!(row.record_count, 2);
    assert_eq!(column_values(&row.records[0]), vec![("v", Some("old")), ("v", Some("new1"))]);
    assert_eq!(column_values(&row.records[1]), vec![("v", Some("new2"))]);
}

#[tokio::test]
async fn test_delete_of_absent_row_is_a_noop() {
    let manager = manager_with_table("events", 1).await;
    manager
        .mutate(RowMutation::new("events", "row-ghost", RowMutationType::DeleteRow, vec![]))
        .await
        .unwrap();

    let result = manager.fetch_row("events", &Selector::row("row-ghost")).await.unwrap();
    assert!(!result.exists);
    assert!(!result.deleted);
}

#[tokio::test]
async fn test_batch_spans_tables_and_shards() {
    let server = Arc::new(MemIndexServer::new());
    server.create_table("events", 2);
    server.create_table("audit", 1);
    let manager = TableManager::new(server, TablexConfig::new()).await.unwrap();

    let mut mutations: Vec<RowMutation> = (0..4)
        .map(|i| {
            replace_row_mutation(
                "events",
                &format!("row-{i}"),
                vec![record("rec-1", "users", &[("n", &i.to_string())])],
            )
        })
        .collect();
    mutations.push(replace_row_mutation(
        "audit",
        "row-log",
        vec![record("rec-1", "logs", &[("level", "warn")])],
    ));
    manager.mutate_batch(mutations).await.unwrap();

    for i in 0..4 {
        let result = manager
            .fetch_row("events", &Selector::row(format!("row-{i}")))
            .await
            .unwrap();
        assert!(result.exists, "row-{i} was not applied");
    }
    let audit = manager.fetch_row("audit", &Selector::row("row-log")).await.unwrap();
    assert!(audit.exists);
}

#[tokio::test]
async fn test_batch_validation_rejects_before_any_work() {
    let manager = manager_with_table("events", 1).await;

    let valid = replace_row_mutation("events", "row-ok", vec![record("rec-1", "users", &[("n", "1")])]);
    let invalid = RowMutation::new("events", "", RowMutationType::DeleteRow, vec![]);
    let error = manager.mutate_batch(vec![valid, invalid]).await.unwrap_err();
    assert!(matches!(error, TablexError::InvalidMutation { .. }));

    // up-front validation failed the batch before any member applied
    let result = manager.fetch_row("events", &Selector::row("row-ok")).await.unwrap();
    assert!(!result.exists);
}
