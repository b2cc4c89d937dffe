use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventline_core::{Clock, DomainError, EntityId};

/// A fact produced when an action completes (order created, notification raised).
///
/// Notes:
/// - **Immutable**: fields are only readable once constructed.
/// - `id` is the stable entity identifier; it is also the partition key, so all
///   events for one entity stay ordered on the log.
/// - `occurred_at` has millisecond precision (the wire format carries millis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    id: EntityId,

    #[serde(rename = "type")]
    event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,

    #[serde(rename = "created_at")]
    occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Create an event stamped with the clock's current time.
    pub fn new(
        id: EntityId,
        event_type: impl Into<String>,
        message: Option<String>,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        Self::at(id, event_type, message, clock.now())
    }

    /// Create an event with an explicit occurrence time.
    pub fn at(
        id: EntityId,
        event_type: impl Into<String>,
        message: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(DomainError::validation("event type must not be empty"));
        }

        Ok(Self {
            id,
            event_type,
            message,
            occurred_at: truncate_to_millis(occurred_at),
        })
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Milliseconds since the Unix epoch (wire representation).
    pub fn timestamp_millis(&self) -> i64 {
        self.occurred_at.timestamp_millis()
    }
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
