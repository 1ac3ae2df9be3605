#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use strata_core::errors::StrataError;
use strata_core::model::{Generation, Row, Value};
use strata_core::query::{
    Assignment, DeleteStatement, Expr, InsertStatement, SelectQuery, UpdateStatement,
};
use strata_store::{Driver, IsolationLevel, MemoryDriver};

use common::insert_post;

#[tokio::test]
async fn test_insert_assigns_increasing_ids() {
    // GIVEN: an empty memory store
    let driver = MemoryDriver::new();
    let mut runner = driver.create_runner();

    // WHEN: inserting two posts without ids
    let first = runner.insert(&insert_post("a")).await.unwrap();
    let second = runner.insert(&insert_post("b")).await.unwrap();

    // THEN: ids are generated in order and stored with the rows
    assert_eq!(first.generated.get("id"), Some(&Value::Int(1)));
    assert_eq!(second.generated.get("id"), Some(&Value::Int(2)));
    assert_eq!(driver.rows("post").len(), 2);
}

#[tokio::test]
async fn test_uuid_generation() {
    let driver = MemoryDriver::new();
    let mut runner = driver.create_runner();

    let values: Row = [("name".to_string(), Value::from("rust"))].into();
    let result = runner
        .insert(&InsertStatement::new("tag", values).returning("id", Generation::Uuid))
        .await
        .unwrap();

    assert!(matches!(result.generated.get("id"), Some(Value::Uuid(_))));
}

#[tokio::test]
async fn test_update_and_delete_report_affected_rows() {
    let driver = MemoryDriver::new();
    let mut runner = driver.create_runner();
    for title in ["a", "b", "c"] {
        runner.insert(&insert_post(title)).await.unwrap();
    }

    let updated = runner
        .update(&UpdateStatement {
            table: "post".to_string(),
            assignments: vec![Assignment::value("title", "z")],
            criteria: Expr::compare(
                strata_core::query::CompareOp::Gte,
                Expr::bare("id"),
                Expr::lit(2),
            ),
        })
        .await
        .unwrap();
    let deleted = runner
        .delete(&DeleteStatement {
            table: "post".to_string(),
            criteria: Expr::eq(Expr::bare("title"), Expr::lit("z")),
        })
        .await
        .unwrap();

    assert_eq!(updated, 2);
    assert_eq!(deleted, 2);
    let remaining = runner
        .select(&SelectQuery::from("post", "post"))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["title"], Value::from("a"));
}

#[tokio::test]
async fn test_rollback_restores_previous_state() {
    // GIVEN: one committed post
    let driver = MemoryDriver::new();
    let mut runner = driver.create_runner();
    runner.insert(&insert_post("kept")).await.unwrap();

    // WHEN: a transaction inserts another post and rolls back
    runner
        .begin_transaction(Some(IsolationLevel::Serializable))
        .await
        .unwrap();
    runner.insert(&insert_post("discarded")).await.unwrap();
    assert!(runner.is_transaction_active());
    runner.rollback_transaction().await.unwrap();

    // THEN: only the committed post remains
    let rows = driver.rows("post");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], Value::from("kept"));
    assert!(!runner.is_transaction_active());
}

#[tokio::test]
async fn test_commit_keeps_changes() {
    let driver = MemoryDriver::new();
    let mut runner = driver.create_runner();

    runner.begin_transaction(None).await.unwrap();
    runner.insert(&insert_post("kept")).await.unwrap();
    runner.commit_transaction().await.unwrap();

    let mut other = driver.create_runner();
    let rows = other
        .select(&SelectQuery::from("post", "post"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_transaction_state_errors() {
    let driver = MemoryDriver::new();
    let mut runner = driver.create_runner();

    let err = runner.commit_transaction().await.unwrap_err();
    assert!(matches!(err, StrataError::TransactionNotStarted));
    let err = runner.rollback_transaction().await.unwrap_err();
    assert!(matches!(err, StrataError::TransactionNotStarted));

    runner.begin_transaction(None).await.unwrap();
    let err = runner.begin_transaction(None).await.unwrap_err();
    assert!(matches!(err, StrataError::TransactionAlreadyStarted));
    runner.rollback_transaction().await.unwrap();
}

#[tokio::test]
async fn test_release_rolls_back_and_blocks_further_use() {
    // GIVEN: a runner with an open transaction holding an insert
    let driver = MemoryDriver::new();
    let mut runner = driver.create_runner();
    runner.begin_transaction(None).await.unwrap();
    runner.insert(&insert_post("pending")).await.unwrap();

    // WHEN: the runner is released
    runner.release().await.unwrap();

    // THEN: the insert is gone and the runner refuses statements
    assert!(driver.rows("post").is_empty());
    assert!(runner.is_released());
    let err = runner
        .select(&SelectQuery::from("post", "post"))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::RunnerReleased));
    runner.release().await.unwrap();
}

#[tokio::test]
async fn test_injected_insert_failure() {
    let driver = MemoryDriver::new();
    driver.fail_on_insert("post");
    let mut runner = driver.create_runner();

    let err = runner.insert(&insert_post("x")).await.unwrap_err();
    assert!(matches!(err, StrataError::Persistence { .. }));
    assert!(driver.rows("post").is_empty());

    driver.clear_faults();
    runner.insert(&insert_post("x")).await.unwrap();
    assert_eq!(driver.rows("post").len(), 1);
}

#[tokio::test]
async fn test_failed_rollback_still_restores_data() {
    let driver = MemoryDriver::new();
    driver.fail_rollback(true);
    let mut runner = driver.create_runner();

    runner.begin_transaction(None).await.unwrap();
    runner.insert(&insert_post("x")).await.unwrap();
    let err = runner.rollback_transaction().await.unwrap_err();

    assert!(matches!(err, StrataError::Persistence { .. }));
    assert!(driver.rows("post").is_empty());
    assert!(!runner.is_transaction_active());
}

#[tokio::test]
async fn test_statement_count_tracks_every_runner() {
    let driver = MemoryDriver::new();
    let mut first = driver.create_runner();
    let mut second = driver.create_runner();

    first.insert(&insert_post("a")).await.unwrap();
    second
        .select(&SelectQuery::from("post", "post"))
        .await
        .unwrap();

    assert_eq!(driver.statement_count(), 2);
    assert_eq!(driver.name(), "memory");
}
