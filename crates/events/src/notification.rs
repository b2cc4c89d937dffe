//! Notification use case: the sink the consumer hands mapped events to.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{error, info};

use crate::event::DomainEvent;
use crate::sink::{EventSink, SinkError};

/// Logs each notification and forwards it to a publisher sink (usually a
/// [`SinkFanout`](crate::SinkFanout) holding the broadcast hub).
#[derive(Debug)]
pub struct NotificationService<S> {
    publisher: S,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl<S> NotificationService<S>
where
    S: EventSink,
{
    pub fn new(publisher: S) -> Self {
        Self {
            publisher,
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn publisher(&self) -> &S {
        &self.publisher
    }

    /// Notifications handed to the publisher so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Notifications the publisher failed to deliver.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub async fn process(&self, event: &DomainEvent) -> Result<(), SinkError> {
        info!(
            id = %event.id(),
            event_type = event.event_type(),
            message = event.message().unwrap_or_default(),
            "processing notification"
        );
        self.processed.fetch_add(1, Ordering::Relaxed);

        self.publisher.deliver(event).await.inspect_err(|err| {
            self.failed.fetch_add(1, Ordering::Relaxed);
            error!(id = %event.id(), error = %err, "failed to publish notification");
        })
    }
}

#[async_trait]
impl<S> EventSink for NotificationService<S>
where
    S: EventSink,
{
    fn name(&self) -> &str {
        "notifications"
    }

    async fn deliver(&self, event: &DomainEvent) -> Result<(), SinkError> {
        self.process(event).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{FailingSink, RecordingSink, sample_event};

    #[tokio::test]
    async fn forwards_to_publisher() {
        let recorder = Arc::new(RecordingSink::new());
        let service = NotificationService::new(recorder.clone());

        service.deliver(&sample_event("n1", "PING")).await.unwrap();

        assert_eq!(recorder.ids(), vec!["n1".to_string()]);
        assert_eq!(service.processed(), 1);
        assert_eq!(service.failed(), 0);
    }

    #[tokio::test]
    async fn counts_publisher_failures() {
        let service = NotificationService::new(FailingSink::new("hub"));

        assert!(service.deliver(&sample_event("n1", "PING")).await.is_err());
        assert_eq!(service.processed(), 1);
        assert_eq!(service.failed(), 1);
    }
}
