//! Error helpers for strata-store
//!
//! Store failures surface as `StrataError::Persistence` carrying the failing
//! operation.

use strata_core::errors::StrataError;

pub use strata_core::errors::Result;

/// Create a persistence error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> StrataError {
    StrataError::persistence("sqlite", err.to_string())
}

/// Same as `from_rusqlite` with the statement kind that failed
pub fn sqlite_op(op: &'static str) -> impl Fn(rusqlite::Error) -> StrataError {
    move |err| StrataError::persistence(op, err.to_string())
}

/// Error for a poisoned in-memory table lock
pub fn lock_poisoned(op: &str) -> StrataError {
    StrataError::Internal {
        message: format!("memory store lock poisoned during {}", op),
    }
}
