//! Names shared by the lifecycle macros, the capture layer and log consumers

/// Field holding the operation name (`save`, `find_one`, `transaction`, ...)
pub const FIELD_OP: &str = "op";
/// Field holding one of the `EVENT_*` values below
pub const FIELD_EVENT: &str = "event";
/// Field (and span name) carrying the [`UnitOfWorkId`](crate::UnitOfWorkId)
pub const FIELD_UNIT_OF_WORK: &str = "unit_of_work";

pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_events_are_distinct() {
        let events = [EVENT_START, EVENT_END, EVENT_END_ERROR];
        for (i, a) in events.iter().enumerate() {
            assert!(events[i + 1..].iter().all(|b| a != b));
        }
    }
}
