//! Operation lifecycle macros
//!
//! Every public persistence call logs a `start` event and exactly one of
//! `end` / `end_error`. All three share the `component`/`op`/`event` fields
//! so a unit of work can be followed by filtering on `op`.

#[doc(hidden)]
#[macro_export]
macro_rules! __strata_op_event {
    ($level:ident, $event:ident, $op:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = module_path!(),
            op = $op,
            event = strata_core_types::schema::$event,
            $($($field)*)?
        )
    };
}

/// Log the start of an operation
///
/// ```
/// # use strata_core::log_op_start;
/// log_op_start!("save");
/// log_op_start!("save", target = "Post");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {
        $crate::__strata_op_event!(info, EVENT_START, $op $(, $($field)*)?)
    };
}

/// Log the successful end of an operation; `duration_ms` is mandatory
///
/// ```
/// # use strata_core::log_op_end;
/// log_op_end!("save", duration_ms = 42, affected = 3);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {
        $crate::__strata_op_event!(
            info, EVENT_END, $op, duration_ms = $duration $(, $($field)*)?
        )
    };
}

/// Log a failed operation with the stable code of its error
///
/// Anything convertible into [`ExError`](crate::errors::ExError) is accepted.
///
/// ```ignore
/// # use strata_core::{log_op_error, errors::StrataError};
/// log_op_error!("transaction", StrataError::TransactionAlreadyStarted, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        $crate::__strata_op_event!(
            error,
            EVENT_END_ERROR,
            $op,
            duration_ms = $duration,
            err_kind = ?ex_err.kind(),
            err_code = ex_err.code()
            $(, $($field)*)?
        )
    }};
}
