//! Kafka adapters (librdkafka via `rdkafka`).
//!
//! Offsets: auto-commit stays on but offsets are only *stored* when the
//! pipeline marks a record, so a crash never commits work that was not
//! attempted. librdkafka handles rebalances inside one consumer, so a session
//! only ends on a consume error or when the group is closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use super::{
    ConsumedRecord, ConsumerGroup, GroupSession, LogError, LogProducer, OutboundRecord,
    RecordPosition,
};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn joined(err: tokio::task::JoinError) -> LogError {
    LogError::Connection(format!("blocking task failed: {err}"))
}

/// Keyed producer; records with one key stay in order on one partition.
#[derive(Clone)]
pub struct KafkaLogProducer {
    producer: FutureProducer,
}

impl core::fmt::Debug for KafkaLogProducer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KafkaLogProducer").finish_non_exhaustive()
    }
}

impl KafkaLogProducer {
    /// Create a producer and confirm the brokers answer a metadata request.
    pub async fn connect(brokers: &str) -> Result<Self, LogError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", DELIVERY_TIMEOUT.as_millis().to_string())
            .create()
            .map_err(|e| LogError::Connection(e.to_string()))?;

        let probe = producer.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, Timeout::After(METADATA_TIMEOUT))
                .map(|_| ())
        })
        .await
        .map_err(joined)?
        .map_err(|e| LogError::Connection(e.to_string()))?;

        info!(brokers, "kafka producer connected");
        Ok(Self { producer })
    }
}

#[async_trait]
impl LogProducer for KafkaLogProducer {
    async fn send(&self, record: OutboundRecord) -> Result<RecordPosition, LogError> {
        let outgoing = FutureRecord::to(&record.topic)
            .key(record.key.as_slice())
            .payload(record.payload.as_slice());

        let (partition, offset) = self
            .producer
            .send(outgoing, Timeout::After(DELIVERY_TIMEOUT))
            .await
            .map_err(|(err, _)| LogError::Publish(err.to_string()))?;

        Ok(RecordPosition { partition, offset })
    }

    async fn flush(&self) -> Result<(), LogError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(joined)?
            .map_err(|e| LogError::Publish(e.to_string()))
    }
}

/// One group member backed by a `StreamConsumer`.
pub struct KafkaConsumerGroup {
    group_id: String,
    consumer: Arc<StreamConsumer>,
    closed: Arc<AtomicBool>,
}

impl core::fmt::Debug for KafkaConsumerGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KafkaConsumerGroup")
            .field("group_id", &self.group_id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl KafkaConsumerGroup {
    pub fn new(brokers: &str, group_id: &str) -> Result<Self, LogError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("partition.assignment.strategy", "roundrobin")
            .set("session.timeout.ms", "10000")
            .create()
            .map_err(|e| LogError::Connection(e.to_string()))?;

        Ok(Self {
            group_id: group_id.to_string(),
            consumer: Arc::new(consumer),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn join(&self, topic: &str) -> Result<Box<dyn GroupSession>, LogError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed);
        }

        self.consumer
            .subscribe(&[topic])
            .map_err(|e| LogError::Connection(e.to_string()))?;
        debug!(group = %self.group_id, topic, "subscribed");

        Ok(Box::new(KafkaSession {
            consumer: self.consumer.clone(),
            closed: self.closed.clone(),
        }))
    }

    async fn close(&self) -> Result<(), LogError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || {
            match consumer.commit_consumer_state(CommitMode::Sync) {
                Ok(()) | Err(KafkaError::ConsumerCommit(_)) => {}
                Err(e) => return Err(LogError::Connection(e.to_string())),
            }
            consumer.unsubscribe();
            Ok(())
        })
        .await
        .map_err(joined)?
    }
}

struct KafkaSession {
    consumer: Arc<StreamConsumer>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl GroupSession for KafkaSession {
    async fn next_record(&mut self) -> Option<Result<ConsumedRecord, LogError>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }

        let record = match self.consumer.recv().await {
            Ok(message) => Ok(ConsumedRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            }),
            Err(e) => Err(LogError::Consume(e.to_string())),
        };
        Some(record)
    }

    fn mark_consumed(&mut self, record: &ConsumedRecord) -> Result<(), LogError> {
        // Stored offsets name the next record to read.
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset + 1)
            .map_err(|e| LogError::Consume(e.to_string()))
    }
}
