//! Strata Store - query execution collaborators
//!
//! Provides:
//! - The `Driver` / `QueryRunner` contract the persistence engine executes through
//! - `MemoryDriver`: evaluates the query AST over in-memory tables with
//!   snapshot transactions (tests, embedding)
//! - `SqliteDriver`: renders the query AST for SQLite over `rusqlite`

pub mod db;
pub mod errors;
pub mod memory;
pub mod runner;
pub mod sqlite;

pub use memory::MemoryDriver;
pub use runner::{Driver, IsolationLevel, QueryRunner};
pub use sqlite::SqliteDriver;
