//! Structured logging for the persistence layer
//!
//! Library code only emits `tracing` events through the lifecycle macros;
//! installing a subscriber is left to the embedding application, which can
//! call [`init`] with a [`Profile`] or install its own. Tests swap in
//! [`init_test_capture`] to assert on what a unit of work logged.
//!
//! ```rust
//! use strata_core::logging_facility::{init, Profile};
//!
//! init(Profile::Test);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
