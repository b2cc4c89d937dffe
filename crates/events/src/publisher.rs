//! Upstream publication seam.
//!
//! Business use cases call an [`EventPublisher`] after their primary write has
//! committed. Publication is a best-effort side effect: the write is not rolled
//! back when the log is unreachable, so the caller decides whether a failure
//! matters.
//!
//! ```text
//! use case → primary write (committed) → EventPublisher::publish → log
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::event::DomainEvent;

/// Publishes domain events onto the log.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn publish(&self, event: &DomainEvent) -> Result<(), Self::Error>;
}

#[async_trait]
impl<P> EventPublisher for Arc<P>
where
    P: EventPublisher + ?Sized,
{
    type Error = P::Error;

    async fn publish(&self, event: &DomainEvent) -> Result<(), Self::Error> {
        (**self).publish(event).await
    }
}

/// Publish and log the outcome instead of failing the caller.
///
/// Returns `true` when the event reached the log.
pub async fn publish_best_effort<P>(publisher: &P, event: &DomainEvent) -> bool
where
    P: EventPublisher + ?Sized,
{
    match publisher.publish(event).await {
        Ok(()) => {
            info!(event_id = %event.id(), event_type = event.event_type(), "event published");
            true
        }
        Err(err) => {
            error!(
                event_id = %event.id(),
                event_type = event.event_type(),
                error = %err,
                "event publish failed; primary write is kept"
            );
            false
        }
    }
}
