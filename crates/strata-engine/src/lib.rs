//! Strata Engine - units of work against a store
//!
//! Provides:
//! - `DataSource`: metadata registry, driver and subscribers, built directly
//!   or from `DataSourceOptions` (TOML)
//! - `EntityManager`: save/remove/soft-remove/recover of entity graphs, each
//!   call one unit of work, plus explicit transactions
//! - `Repository` / `TreeRepository`: lookups, counts, bulk criteria
//!   operations and tree traversals for one entity type
//!
//! The persistence executor keeps tree encodings (closure table, nested set,
//! materialized path) in step with parent links on every write.

pub mod config;
pub mod data_source;
pub mod manager;
mod persistence;
pub mod repository;
pub mod transaction;

pub use config::{DataSourceOptions, DriverConfig};
pub use data_source::DataSource;
pub use manager::EntityManager;
pub use repository::{Repository, TreeRepository};
pub use strata_store::IsolationLevel;
