//! Shared fixtures for store tests

#![allow(dead_code)]

use strata_core::model::{Generation, Row, Value};
use strata_core::query::InsertStatement;

pub const POST_DDL: &str = "
    CREATE TABLE post (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 1,
        deleted_at TEXT
    );
    CREATE TABLE tag (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );
";

pub fn post_row(title: &str) -> Row {
    [
        ("title".to_string(), Value::from(title)),
        ("version".to_string(), Value::Int(1)),
    ]
    .into()
}

/// Insert of a post whose id the store assigns
pub fn insert_post(title: &str) -> InsertStatement {
    InsertStatement::new("post", post_row(title)).returning("id", Generation::Increment)
}
