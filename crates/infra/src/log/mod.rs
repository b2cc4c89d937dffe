//! Partitioned log boundary (Kafka semantics).
//!
//! The pipeline only needs a small slice of a broker:
//!
//! - keyed appends with per-key ordering ([`LogProducer`])
//! - consumer groups whose members split partitions between them, with
//!   offsets committed per group ([`ConsumerGroup`] / [`GroupSession`])
//!
//! [`InMemoryLog`] implements both in-process; the Kafka adapters live behind
//! the `kafka` feature.

pub mod in_memory;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod partitioner;

use async_trait::async_trait;
use thiserror::Error;

pub use in_memory::InMemoryLog;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumerGroup, KafkaLogProducer};
pub use partitioner::compute_partition;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// Broker unreachable or refused the connection/session.
    #[error("log connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    /// The producer or group was already closed.
    #[error("log handle closed")]
    Closed,
}

/// A record to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<Vec<u8>>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
        }
    }
}

/// Where an appended record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordPosition {
    pub partition: i32,
    pub offset: i64,
}

/// A record delivered to a group member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl ConsumedRecord {
    pub fn position(&self) -> RecordPosition {
        RecordPosition {
            partition: self.partition,
            offset: self.offset,
        }
    }
}

#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Append one record; records with equal keys land on the same partition
    /// in send order.
    async fn send(&self, record: OutboundRecord) -> Result<RecordPosition, LogError>;

    /// Wait for outstanding sends to be acknowledged.
    async fn flush(&self) -> Result<(), LogError>;
}

/// One membership generation of a consumer group.
///
/// Ends (`next_record` yields `None`) when the group rebalances or the
/// session is torn down; the caller then joins again.
#[async_trait]
pub trait GroupSession: Send {
    async fn next_record(&mut self) -> Option<Result<ConsumedRecord, LogError>>;

    /// Mark `record` as processed; its offset is committed for the group.
    fn mark_consumed(&mut self, record: &ConsumedRecord) -> Result<(), LogError>;
}

#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    fn group_id(&self) -> &str;

    /// Join the group for `topic` and wait for a partition assignment.
    async fn join(&self, topic: &str) -> Result<Box<dyn GroupSession>, LogError>;

    /// Leave the group and release the connection. Further joins fail with
    /// [`LogError::Closed`].
    async fn close(&self) -> Result<(), LogError>;
}

#[async_trait]
impl<P> LogProducer for std::sync::Arc<P>
where
    P: LogProducer + ?Sized,
{
    async fn send(&self, record: OutboundRecord) -> Result<RecordPosition, LogError> {
        (**self).send(record).await
    }

    async fn flush(&self) -> Result<(), LogError> {
        (**self).flush().await
    }
}
