//! Broadcast hub: the last sink in the pipeline.
//!
//! Every delivered event is cloned to all connected clients through a
//! `tokio::sync::broadcast` channel. Sending never waits on a client: a client
//! that falls more than `capacity` events behind skips the backlog, and having
//! no clients at all is not an error.

use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use eventline_events::{DomainEvent, EventSink, SinkError};

pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct BroadcastHub {
    // `None` once closed; dropping the sender ends every subscriber stream.
    tx: RwLock<Option<broadcast::Sender<DomainEvent>>>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: RwLock::new(Some(tx)),
        }
    }

    /// Register a client. `None` after [`BroadcastHub::close`].
    pub fn subscribe(&self) -> Option<broadcast::Receiver<DomainEvent>> {
        self.sender().map(|tx| tx.subscribe())
    }

    /// Currently connected clients.
    pub fn client_count(&self) -> usize {
        self.sender().map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Disconnect every client and refuse further deliveries.
    pub fn close(&self) {
        let dropped = self
            .tx
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if dropped.is_some() {
            info!("broadcast hub closed");
        }
    }

    fn sender(&self) -> Option<broadcast::Sender<DomainEvent>> {
        self.tx
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventSink for BroadcastHub {
    fn name(&self) -> &str {
        "broadcast-hub"
    }

    async fn deliver(&self, event: &DomainEvent) -> Result<(), SinkError> {
        let Some(tx) = self.sender() else {
            return Err(SinkError::Closed(self.name().to_string()));
        };

        // Err only means nobody is listening right now.
        let clients = tx.send(event.clone()).unwrap_or(0);
        debug!(event_id = %event.id(), clients, "notification broadcast");
        Ok(())
    }
}
