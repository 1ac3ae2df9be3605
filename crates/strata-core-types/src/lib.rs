//! Correlation ids and log vocabulary for Strata
//!
//! Kept dependency-light so the error and logging facilities in
//! `strata-core` and the engine can share them:
//!
//! - [`UnitOfWorkId`] / [`TraceId`] / [`WorkContext`]: which unit of work a
//!   log line, event or error belongs to
//! - [`schema`]: field keys and lifecycle event names

pub mod correlation;
pub mod schema;

pub use correlation::{TraceId, UnitOfWorkId, WorkContext};
