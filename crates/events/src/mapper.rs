//! Native record → [`DomainEvent`] mapping.
//!
//! Upstream producers do not agree on field names across schema versions (the
//! order service writes `order_id`/`event_type`, the user service `user_id`,
//! newer producers `id`/`type`). Each logical field therefore has an ordered
//! list of candidate names, evaluated first-match-wins. Adding a fallback is a
//! table change, not a control-flow change.

use thiserror::Error;

use eventline_core::{EntityId, SharedClock, SystemClock};

use crate::event::DomainEvent;
use crate::record::NativeRecord;

const ID_FIELDS: &[&str] = &["id", "order_id", "user_id"];
const TYPE_FIELDS: &[&str] = &["type", "event_type"];
const MESSAGE_FIELDS: &[&str] = &["message"];
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "created_at"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// Neither the id nor the type could be resolved from any candidate field.
    #[error("missing required fields: id={id:?}, type={event_type:?}")]
    MissingFields {
        id: Option<String>,
        event_type: Option<String>,
    },
}

/// Ordered candidate field names per logical field.
///
/// A candidate that is `Null` or blank text counts as absent, so the next name
/// in the list is tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCandidates {
    pub id: Vec<String>,
    pub event_type: Vec<String>,
    pub message: Vec<String>,
    pub timestamp: Vec<String>,
}

impl Default for FieldCandidates {
    fn default() -> Self {
        fn owned(names: &[&str]) -> Vec<String> {
            names.iter().map(|n| n.to_string()).collect()
        }

        Self {
            id: owned(ID_FIELDS),
            event_type: owned(TYPE_FIELDS),
            message: owned(MESSAGE_FIELDS),
            timestamp: owned(TIMESTAMP_FIELDS),
        }
    }
}

impl FieldCandidates {
    /// Append a lower-priority fallback for the id.
    pub fn with_id_field(mut self, name: impl Into<String>) -> Self {
        self.id.push(name.into());
        self
    }

    /// Append a lower-priority fallback for the event type.
    pub fn with_type_field(mut self, name: impl Into<String>) -> Self {
        self.event_type.push(name.into());
        self
    }
}

/// Converts decoded records into domain events.
#[derive(Clone)]
pub struct EventMapper {
    candidates: FieldCandidates,
    clock: SharedClock,
}

impl core::fmt::Debug for EventMapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventMapper")
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

impl Default for EventMapper {
    fn default() -> Self {
        Self::new(SystemClock::shared())
    }
}

impl EventMapper {
    /// Mapper with the default candidate tables.
    ///
    /// `clock` stamps events whose record carries no usable timestamp.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            candidates: FieldCandidates::default(),
            clock,
        }
    }

    pub fn with_candidates(mut self, candidates: FieldCandidates) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn candidates(&self) -> &FieldCandidates {
        &self.candidates
    }

    pub fn map(&self, record: &NativeRecord) -> Result<DomainEvent, MappingError> {
        let id = first_text(record, &self.candidates.id);
        let event_type = first_text(record, &self.candidates.event_type);

        let (Some(id_text), Some(type_text)) = (id.clone(), event_type.clone()) else {
            return Err(MappingError::MissingFields { id, event_type });
        };

        let missing = || MappingError::MissingFields {
            id: id.clone(),
            event_type: event_type.clone(),
        };

        let message = first_text(record, &self.candidates.message);
        let occurred_at = self
            .candidates
            .timestamp
            .iter()
            .find_map(|name| record.get_present(name).and_then(|v| v.as_timestamp()))
            .unwrap_or_else(|| self.clock.now());

        let entity_id = EntityId::new(id_text).map_err(|_| missing())?;
        DomainEvent::at(entity_id, type_text, message, occurred_at).map_err(|_| missing())
    }
}

/// First candidate with a non-null, non-blank textual value.
fn first_text(record: &NativeRecord, names: &[String]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| record.get_present(name))
        .map(|v| v.render())
        .find(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;
    use eventline_core::FixedClock;

    fn mapper() -> EventMapper {
        EventMapper::new(FixedClock::at_millis(1_000).shared())
    }

    #[test]
    fn maps_canonical_fields() {
        let record = NativeRecord::new()
            .with("id", "o1")
            .with("type", "CREATED")
            .with("message", "hello")
            .with("timestamp", 1_700_000_000_000_i64);

        let ev = mapper().map(&record).unwrap();
        assert_eq!(ev.id().as_str(), "o1");
        assert_eq!(ev.event_type(), "CREATED");
        assert_eq!(ev.message(), Some("hello"));
        assert_eq!(ev.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn fallback_fields_produce_the_same_event() {
        let canonical = NativeRecord::new()
            .with("id", "o1")
            .with("type", "CREATED")
            .with("timestamp", 5_i64);
        let legacy = NativeRecord::new()
            .with("order_id", "o1")
            .with("event_type", "CREATED")
            .with("timestamp", 5_i64);

        assert_eq!(mapper().map(&canonical).unwrap(), mapper().map(&legacy).unwrap());
    }

    #[test]
    fn candidate_order_is_first_match_wins() {
        let record = NativeRecord::new()
            .with("user_id", "u1")
            .with("order_id", "o1")
            .with("type", "T");
        assert_eq!(mapper().map(&record).unwrap().id().as_str(), "o1");

        let record = NativeRecord::new().with("user_id", "u1").with("event_type", "T");
        assert_eq!(mapper().map(&record).unwrap().id().as_str(), "u1");
    }

    #[test]
    fn null_and_blank_candidates_fall_through() {
        let record = NativeRecord::new()
            .with("id", FieldValue::Null)
            .with("order_id", "")
            .with("user_id", "u9")
            .with("type", "T");
        assert_eq!(mapper().map(&record).unwrap().id().as_str(), "u9");
    }

    #[test]
    fn numeric_ids_are_rendered_as_text() {
        let record = NativeRecord::new().with("id", 42_i64).with("type", "T");
        assert_eq!(mapper().map(&record).unwrap().id().as_str(), "42");
    }

    #[test]
    fn missing_id_or_type_is_an_error() {
        let err = mapper()
            .map(&NativeRecord::new().with("message", "orphan"))
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingFields {
                id: None,
                event_type: None
            }
        );

        let err = mapper()
            .map(&NativeRecord::new().with("id", "o1"))
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingFields {
                id: Some("o1".to_string()),
                event_type: None
            }
        );
    }

    #[test]
    fn absent_timestamp_uses_injected_clock() {
        let record = NativeRecord::new().with("id", "o1").with("type", "T");
        assert_eq!(mapper().map(&record).unwrap().timestamp_millis(), 1_000);
    }

    #[test]
    fn float_and_native_timestamps_are_normalised() {
        let native = chrono::DateTime::from_timestamp_millis(77).unwrap();
        let a = NativeRecord::new().with("id", "o1").with("type", "T").with("timestamp", 77.0);
        let b = NativeRecord::new().with("id", "o1").with("type", "T").with("timestamp", native);
        assert_eq!(mapper().map(&a).unwrap(), mapper().map(&b).unwrap());
    }

    #[test]
    fn extra_fallbacks_extend_the_table() {
        let record = NativeRecord::new().with("notification_id", "n1").with("kind", "PING");
        let m = mapper().with_candidates(
            FieldCandidates::default()
                .with_id_field("notification_id")
                .with_type_field("kind"),
        );
        let ev = m.map(&record).unwrap();
        assert_eq!(ev.id().as_str(), "n1");
        assert_eq!(ev.event_type(), "PING");
    }
}
