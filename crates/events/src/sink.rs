//! Downstream delivery of decoded events.
//!
//! The consumer calls exactly one [`EventSink`] per message, synchronously. A
//! slow sink therefore throttles consumption of its partition, which is the
//! intended backpressure. [`SinkFanout`] bounds every registered sink with a
//! deadline so a stalled subscriber cannot hold the loop indefinitely.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::event::DomainEvent;

/// Default per-sink deadline used by [`SinkFanout`].
pub const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink '{sink}' rejected event: {reason}")]
    Rejected { sink: String, reason: String },

    #[error("sink '{sink}' timed out after {timeout:?}")]
    TimedOut { sink: String, timeout: Duration },

    #[error("sink '{0}' is closed")]
    Closed(String),
}

impl SinkError {
    pub fn rejected(sink: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            sink: sink.into(),
            reason: reason.into(),
        }
    }
}

/// Receives decoded domain events (broadcast hubs, notification use cases, ...).
///
/// Implementations must tolerate duplicates: delivery is at-least-once.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str {
        "sink"
    }

    async fn deliver(&self, event: &DomainEvent) -> Result<(), SinkError>;
}

#[async_trait]
impl<S> EventSink for Arc<S>
where
    S: EventSink + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn deliver(&self, event: &DomainEvent) -> Result<(), SinkError> {
        (**self).deliver(event).await
    }
}

/// Forwards each event to zero or more registered sinks.
///
/// - Every sink is attempted, even when an earlier one fails
/// - Each call is bounded by `timeout`
/// - The first failure (if any) is returned after all sinks were attempted
pub struct SinkFanout {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    timeout: Duration,
}

impl core::fmt::Debug for SinkFanout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SinkFanout")
            .field("sinks", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for SinkFanout {
    fn default() -> Self {
        Self::new(DEFAULT_SINK_TIMEOUT)
    }
}

impl SinkFanout {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            timeout,
        }
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sink);
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Clone the handles so no lock is held across an await point.
    fn snapshot(&self) -> Vec<Arc<dyn EventSink>> {
        self.sinks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn publish(&self, event: &DomainEvent) -> Result<(), SinkError> {
        let mut first_failure = None;

        for sink in self.snapshot() {
            let outcome = match tokio::time::timeout(self.timeout, sink.deliver(event)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::TimedOut {
                    sink: sink.name().to_string(),
                    timeout: self.timeout,
                }),
            };

            if let Err(err) = outcome {
                warn!(sink = sink.name(), event_id = %event.id(), error = %err, "sink delivery failed");
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventSink for SinkFanout {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn deliver(&self, event: &DomainEvent) -> Result<(), SinkError> {
        self.publish(event).await
    }
}
