//! Events emitted by store writes.

/// Events emitted when a record changes.
///
/// These events are dispatched via a broadcast channel to subscribers such as
/// the controller's watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A record was created or replaced.
    Saved { id: String, etag: String },
    /// A record was deleted.
    Deleted { id: String },
}

impl Event {
    /// Get the record ID for this event.
    pub fn resource_id(&self) -> &str {
        match self {
            Event::Saved { id, .. } | Event::Deleted { id } => id,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Event::Deleted { .. })
    }
}
