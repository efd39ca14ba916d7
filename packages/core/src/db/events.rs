//! Record Events
//!
//! Notifications emitted by a repository after its writes commit.
//!
//! # Architecture
//!
//! Events are delivered over a tokio broadcast channel, so any number of
//! subscribers can drain them independently. Each committed upsert or delete
//! produces exactly one event, sent only after the store commit succeeded;
//! writes buffered in a transaction emit when the transaction commits and
//! never if it is dropped.

/// Post-commit repository notification
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEvent<T> {
    /// The final record as the caller sees it (plaintext)
    Upserted(T),

    /// Snapshot of the record taken before deletion
    Deleted(T),
}

impl<T> RecordEvent<T> {
    /// Get a string representation of the event type
    pub fn event_type(&self) -> &str {
        match self {
            RecordEvent::Upserted(_) => "record:upserted",
            RecordEvent::Deleted(_) => "record:deleted",
        }
    }

    pub fn record(&self) -> &T {
        match self {
            RecordEvent::Upserted(record) | RecordEvent::Deleted(record) => record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(RecordEvent::Upserted(1).event_type(), "record:upserted");
        assert_eq!(RecordEvent::Deleted(2).event_type(), "record:deleted");
        assert_eq!(*RecordEvent::Deleted(2).record(), 2);
    }
}
