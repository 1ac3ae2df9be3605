#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use futures::FutureExt;
use strata_core::errors::StrataError;
use strata_core::model::{Entity, EntityGraph, Value};
use strata_core::{Condition, FindOptions};
use strata_engine::{DataSource, DataSourceOptions};
use strata_store::SqliteDriver;
use tempfile::TempDir;

use common::{blog_registry, category, category_registry, names, Encoding, BLOG_DDL};

async fn blog_source() -> DataSource {
    let driver = SqliteDriver::open_in_memory().unwrap();
    driver.execute_batch(BLOG_DDL).await.unwrap();
    DataSource::new(blog_registry(), Arc::new(driver)).unwrap()
}

#[tokio::test]
async fn test_post_round_trip_through_sqlite() {
    // GIVEN: a post with two tags saved into SQLite
    let source = blog_source().await;
    let manager = source.manager();
    let posts = manager.repository("Post").unwrap();
    let mut graph = EntityGraph::new();
    let post = graph.add(
        posts
            .create()
            .with("title", "How to buy a dog")
            .with("author", "Jane Doe"),
    );
    let rust = graph.add(Entity::new("Tag").with("name", "rust"));
    let sql = graph.add(Entity::new("Tag").with("name", "sql"));
    graph.add_to(post, "tags", rust);
    graph.add_to(post, "tags", sql);
    posts.save(&mut graph, post).await.unwrap();

    // WHEN: loading it back
    let mut loaded = EntityGraph::new();
    let node = posts
        .find_one_or_fail(&mut loaded, Condition::eq("title", "How to buy a dog"))
        .await
        .unwrap();

    // THEN: stored values come back in their declared types
    let entity = loaded.entity(node);
    assert_eq!(entity.get("id"), Some(&Value::Int(1)));
    assert_eq!(entity.get("version"), Some(&Value::Int(1)));
    assert_eq!(entity.get("author"), Some(&Value::from("Jane Doe")));
    assert!(matches!(entity.get("created_at"), Some(Value::Timestamp(_))));
    assert!(matches!(graph.entity(rust).get("id"), Some(Value::Uuid(_))));
    assert_eq!(
        manager.repository("Tag").unwrap().count_all().await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_update_and_soft_remove_in_sqlite() {
    let source = blog_source().await;
    let posts = source.manager().repository("Post").unwrap();
    let mut graph = EntityGraph::new();
    let post = graph.add(posts.create().with("title", "draft"));
    posts.save(&mut graph, post).await.unwrap();

    graph.entity_mut(post).set("title", "final");
    posts.save(&mut graph, post).await.unwrap();
    posts.soft_remove(&mut graph, post).await.unwrap();

    assert_eq!(posts.count_all().await.unwrap(), 0);
    let mut loaded = EntityGraph::new();
    let all = posts
        .find(&mut loaded, FindOptions::new().with_deleted())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    let entity = loaded.entity(all[0]);
    assert_eq!(entity.get("title"), Some(&Value::from("final")));
    assert_eq!(entity.get("version"), Some(&Value::Int(2)));
    assert!(matches!(entity.get("deleted_at"), Some(Value::Timestamp(_))));
}

#[tokio::test]
async fn test_transaction_rollback_in_sqlite() {
    let source = blog_source().await;
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let post = graph.add(Entity::new("Post").with("title", "doomed"));
    let graph_ref = &mut graph;

    let err = manager
        .transaction(None, |tx| {
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

    assert!(matches!(err, StrataError::Config { .. }));
    let posts = manager.repository("Post").unwrap();
    assert_eq!(posts.count_all().await.unwrap(), 0);
}

#[tokio::test]
async fn test_closure_tree_in_sqlite() {
    // GIVEN: a small closure-table tree in SQLite
    let driver = SqliteDriver::open_in_memory().unwrap();
    driver
        .execute_batch(common::CATEGORY_CLOSURE_DDL)
        .await
        .unwrap();
    let source =
        DataSource::new(category_registry(Encoding::ClosureTable), Arc::new(driver)).unwrap();
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let root = category(&mut graph, "root", None);
    let left = category(&mut graph, "left", Some(root));
    let leaf = category(&mut graph, "leaf", Some(left));
    let right = category(&mut graph, "right", Some(root));
    for node in [root, left, leaf, right] {
        manager.save(&mut graph, node).await.unwrap();
    }
    let tree = manager.tree_repository("Category").unwrap();

    // WHEN: moving left (with its leaf) below right
    graph.relate(left, "parent", right);
    manager.save(&mut graph, left).await.unwrap();

    // THEN: traversals follow the new links
    let mut view = EntityGraph::new();
    let leaf = tree
        .repository()
        .find_one_by(&mut view, Condition::eq("name", "leaf"))
        .await
        .unwrap()
        .unwrap();
    let ancestors = tree.find_ancestors(&mut view, leaf).await.unwrap();
    assert_eq!(
        names(&view, &ancestors),
        vec!["leaf", "left", "right", "root"]
    );
    assert_eq!(tree.count_descendants(&graph, right).await.unwrap(), 3);
    assert_eq!(tree.count_descendants(&graph, root).await.unwrap(), 4);
}

#[tokio::test]
async fn test_data_source_from_toml_options() {
    // GIVEN: a database file with the blog schema and options pointing at it
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blog.db");
    SqliteDriver::open(&path)
        .unwrap()
        .execute_batch(BLOG_DDL)
        .await
        .unwrap();
    let options = DataSourceOptions::from_toml_str(&format!(
        "isolation = \"serializable\"\n\n[driver]\ntype = \"sqlite\"\npath = {:?}\n",
        path.display().to_string()
    ))
    .unwrap();

    // WHEN: building the data source and saving through it
    let source = DataSource::from_options(blog_registry(), options).unwrap();
    let manager = source.manager();
    let mut graph = EntityGraph::new();
    let post = graph.add(Entity::new("Post").with("title", "persisted"));
    manager.save(&mut graph, post).await.unwrap();

    // THEN: the row lands in the file
    assert_eq!(source.driver().name(), "sqlite");
    let reopened = DataSource::new(
        blog_registry(),
        Arc::new(SqliteDriver::open(&path).unwrap()),
    )
    .unwrap();
    let posts = reopened.manager().repository("Post").unwrap();
    assert_eq!(posts.count_all().await.unwrap(), 1);
}
