//! Test doubles for sinks and events.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;

use eventline_core::EntityId;

use crate::event::DomainEvent;
use crate::sink::{EventSink, SinkError};

/// Event with a fixed timestamp (epoch + 1s) for assertions.
pub fn sample_event(id: &str, event_type: &str) -> DomainEvent {
    let at = DateTime::from_timestamp_millis(1_000).unwrap_or_default();
    DomainEvent::at(
        EntityId::new(id).unwrap_or_else(|_| EntityId::generate()),
        event_type,
        None,
        at,
    )
    .unwrap_or_else(|_| panic!("invalid sample event type: {event_type:?}"))
}

/// Records every delivered event in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.events().iter().map(|e| e.id().to_string()).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &DomainEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Rejects every event.
#[derive(Debug)]
pub struct FailingSink {
    name: String,
}

impl FailingSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl EventSink for FailingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, _event: &DomainEvent) -> Result<(), SinkError> {
        Err(SinkError::rejected(self.name.clone(), "always fails"))
    }
}

/// Never completes a delivery.
#[derive(Debug)]
pub struct StalledSink;

#[async_trait]
impl EventSink for StalledSink {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn deliver(&self, _event: &DomainEvent) -> Result<(), SinkError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}
