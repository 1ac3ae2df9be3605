#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use futures::FutureExt;
use strata_core::errors::StrataError;
use strata_core::events::EventKind;
use strata_core::model::{Entity, EntityGraph};
use strata_engine::IsolationLevel;

use common::{blog_registry, memory_source, Failing, Recorder};

#[tokio::test]
async fn test_commit_notifies_once_with_all_events() {
    // GIVEN: a data source with a recording subscriber
    let (driver, mut source) = memory_source(blog_registry());
    let recorder = Arc::new(Recorder::default());
    source.subscribe(recorder.clone());
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let first = graph.add(Entity::new("Post").with("title", "one"));
    let second = graph.add(Entity::new("Post").with("title", "two"));
    let graph_ref = &mut graph;

    // WHEN: saving both posts in one transaction
    let saved = manager
        .transaction(None, |tx| {
            async move {
                assert!(tx.is_transactional());
                tx.save(graph_ref, first).await?;
                tx.save(graph_ref, second).await?;
                tx.repository("Post")?.count_all().await
            }
            .boxed()
        })
        .await
        .unwrap();

    // THEN: the closure saw its own writes and subscribers got one batch
    assert_eq!(saved, 2);
    assert_eq!(driver.rows("post").len(), 2);
    assert_eq!(
        recorder.kinds(),
        vec![vec![EventKind::Inserted, EventKind::Inserted]]
    );
    let batch = &recorder.batches()[0];
    assert_ne!(batch[0].unit_of_work, batch[1].unit_of_work);
}

#[tokio::test]
async fn test_error_in_work_rolls_back() {
    // GIVEN: a transaction that saves and then fails
    let (driver, mut source) = memory_source(blog_registry());
    let recorder = Arc::new(Recorder::default());
    source.subscribe(recorder.clone());
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let post = graph.add(Entity::new("Post").with("title", "doomed"));
    let graph_ref = &mut graph;

    // WHEN: running it
    let err = manager
        .transaction(Some(IsolationLevel::Serializable), |tx| {
            async move {
                tx.save(graph_ref, post).await?;
                Err::<(), _>(StrataError::Config {
                    message: "abort".to_string(),
                })
            }
            .boxed()
        })
        .await
        .unwrap_err();

    // THEN: the work's error comes back, nothing is stored or announced
    assert!(matches!(err, StrataError::Config { ref message } if message == "abort"));
    assert!(driver.rows("post").is_empty());
    assert!(recorder.batches().is_empty());
}

#[tokio::test]
async fn test_nested_transaction_is_rejected() {
    let (driver, source) = memory_source(blog_registry());
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let post = graph.add(Entity::new("Post").with("title", "outer"));
    let graph_ref = &mut graph;

    let err = manager
        .transaction(None, |tx| {
            async move {
                tx.save(graph_ref, post).await?;
                tx.transaction(None, |_inner| async { Ok(()) }.boxed())
                    .await
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::TransactionAlreadyStarted));
    assert!(driver.rows("post").is_empty());
}

#[tokio::test]
async fn test_failed_rollback_keeps_original_error() {
    // GIVEN: inserts into post fail and so does the rollback
    let (driver, source) = memory_source(blog_registry());
    driver.fail_on_insert("post");
    driver.fail_rollback(true);
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let post = graph.add(Entity::new("Post").with("title", "broken"));

    // WHEN: saving inside and outside an explicit transaction
    let plain = manager.save(&mut graph, post).await.unwrap_err();
    let graph_ref = &mut graph;
    let scoped = manager
        .transaction(None, |tx| {
            async move {
                tx.save(graph_ref, post).await?;
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap_err();

    // THEN: both report the insert failure, not the rollback failure
    for err in [plain, scoped] {
        assert!(matches!(err, StrataError::Persistence { ref op, .. } if op == "insert"));
    }
    assert!(driver.rows("post").is_empty());
}

#[tokio::test]
async fn test_failed_save_restores_the_graph() {
    let (driver, source) = memory_source(blog_registry());
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let post = graph.add(Entity::new("Post").with("title", "retry"));
    let tag = graph.add(Entity::new("Tag").with("name", "rust"));
    graph.add_to(post, "tags", tag);
    driver.fail_on_insert("post_tags");

    manager.save(&mut graph, post).await.unwrap_err();

    // ids assigned inside the failed unit of work are rolled back too
    assert_eq!(graph.entity(post).get("id"), None);
    assert_eq!(graph.entity(tag).get("id"), None);
    assert!(driver.rows("post").is_empty());
    assert!(driver.rows("tag").is_empty());

    driver.clear_faults();
    manager.save(&mut graph, post).await.unwrap();
    assert_eq!(driver.rows("post_tags").len(), 1);
}

#[tokio::test]
async fn test_subscriber_failure_does_not_undo_commit() {
    // GIVEN: a failing subscriber registered before a recording one
    let (driver, mut source) = memory_source(blog_registry());
    let recorder = Arc::new(Recorder::default());
    source.subscribe(Arc::new(Failing)).subscribe(recorder.clone());
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let post = graph.add(Entity::new("Post").with("title", "kept"));

    // WHEN: saving
    let result = manager.save(&mut graph, post).await;

    // THEN: the save succeeds and later subscribers still hear about it
    assert!(result.is_ok());
    assert_eq!(driver.rows("post").len(), 1);
    assert_eq!(recorder.kinds(), vec![vec![EventKind::Inserted]]);
}

#[tokio::test]
async fn test_managers_outside_wait_for_commit() {
    // GIVEN: a transaction writing two posts with a pause in between
    let (driver, source) = memory_source(blog_registry());
    let manager = source.manager();
    let observer = source.manager();
    let mut graph = EntityGraph::new();
    let first = graph.add(Entity::new("Post").with("title", "first"));
    let second = graph.add(Entity::new("Post").with("title", "second"));
    let graph_ref = &mut graph;

    // WHEN: another manager counts while the transaction runs
    let (committed, seen) = tokio::join!(
        manager.transaction(None, |tx| {
            async move {
                tx.save(graph_ref, first).await?;
                tokio::task::yield_now().await;
                tx.save(graph_ref, second).await?;
                Ok(())
            }
            .boxed()
        }),
        async {
            tokio::task::yield_now().await;
            observer.repository("Post").unwrap().count_all().await
        }
    );

    // THEN: the observer sees either nothing or both posts, never one
    committed.unwrap();
    let seen = seen.unwrap();
    assert!(seen == 0 || seen == 2, "observed {seen} posts");
    assert_eq!(driver.rows("post").len(), 2);
}
