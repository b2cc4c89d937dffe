//! Event producer: domain event → native record → envelope → log.
//!
//! The writer schema is registered once at construction; a producer that
//! cannot obtain a schema id does not exist. Every send is keyed by the event's
//! stable id so one entity's events stay ordered on one partition.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument};

use eventline_events::{DomainEvent, EventPublisher, NativeRecord};

use crate::codec::CodecError;
use crate::log::{LogError, LogProducer, OutboundRecord, RecordPosition};
use crate::schema::{
    RegistryError, SchemaError, SchemaHandle, SchemaRegistry, SchemaResolver, subject_for_topic,
};

/// Canonical notification record: `id`, `type`, optional `message`, `timestamp`.
pub const CANONICAL_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Notification",
    "namespace": "eventline",
    "fields": [
        {"name": "id", "type": "string"},
        {"name": "type", "type": "string"},
        {"name": "message", "type": ["null", "string"], "default": null},
        {"name": "timestamp", "type": {"type": "long", "logicalType": "timestamp-millis"}}
    ]
}"#;

/// Order-service record: `order_id`, `event_type`, `timestamp`.
pub const ORDER_EVENT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "OrderEvent",
    "namespace": "eventline.orders",
    "fields": [
        {"name": "order_id", "type": "string"},
        {"name": "event_type", "type": "string"},
        {"name": "timestamp", "type": "long"}
    ]
}"#;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProducerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The writer schema itself is unusable.
    #[error("invalid writer schema: {0}")]
    Schema(String),

    #[error(transparent)]
    Codec(CodecError),

    #[error(transparent)]
    Publish(LogError),

    /// The log could not be reached at construction.
    #[error("log unavailable: {0}")]
    Connection(LogError),
}

impl From<SchemaError> for ProducerError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Registry(e) => ProducerError::Registry(e),
            SchemaError::Codec(CodecError::InvalidSchema(reason)) => ProducerError::Schema(reason),
            SchemaError::Codec(e) => ProducerError::Codec(e),
        }
    }
}

/// Field names written into the native record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub id_field: String,
    pub type_field: String,
    /// `None` drops the message entirely (schemas without a message field).
    pub message_field: Option<String>,
    pub timestamp_field: String,
}

impl RecordLayout {
    /// Pairs with [`CANONICAL_SCHEMA`].
    pub fn canonical() -> Self {
        Self {
            id_field: "id".to_string(),
            type_field: "type".to_string(),
            message_field: Some("message".to_string()),
            timestamp_field: "timestamp".to_string(),
        }
    }

    /// Pairs with [`ORDER_EVENT_SCHEMA`].
    pub fn order_events() -> Self {
        Self {
            id_field: "order_id".to_string(),
            type_field: "event_type".to_string(),
            message_field: None,
            timestamp_field: "timestamp".to_string(),
        }
    }

    pub fn to_record(&self, event: &DomainEvent) -> NativeRecord {
        let mut record = NativeRecord::new()
            .with(self.id_field.clone(), event.id().as_str())
            .with(self.type_field.clone(), event.event_type())
            .with(self.timestamp_field.clone(), event.timestamp_millis());

        if let Some(field) = &self.message_field {
            record.insert(field.clone(), event.message());
        }
        record
    }
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self::canonical()
    }
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub topic: String,
    /// Registry subject; `None` means `<topic>-value`.
    pub subject: Option<String>,
    pub schema: String,
    pub layout: RecordLayout,
}

impl ProducerSettings {
    /// Canonical schema and layout on `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subject: None,
            schema: CANONICAL_SCHEMA.to_string(),
            layout: RecordLayout::canonical(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>, layout: RecordLayout) -> Self {
        self.schema = schema.into();
        self.layout = layout;
        self
    }

    pub fn subject(&self) -> String {
        self.subject
            .clone()
            .unwrap_or_else(|| subject_for_topic(&self.topic))
    }
}

pub struct EventProducer {
    log: Arc<dyn LogProducer>,
    topic: String,
    layout: RecordLayout,
    schema: SchemaHandle,
}

impl core::fmt::Debug for EventProducer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventProducer")
            .field("topic", &self.topic)
            .field("subject", &self.schema.subject())
            .field("schema_id", &self.schema.id())
            .finish_non_exhaustive()
    }
}

impl EventProducer {
    /// Register (or reuse) the writer schema, then bind to `log`.
    pub async fn new(
        log: Arc<dyn LogProducer>,
        registry: Arc<dyn SchemaRegistry>,
        settings: ProducerSettings,
    ) -> Result<Self, ProducerError> {
        let resolver = SchemaResolver::new(registry);
        Self::with_resolver(log, &resolver, settings).await
    }

    /// Like [`EventProducer::new`], sharing an existing resolver cache.
    pub async fn with_resolver(
        log: Arc<dyn LogProducer>,
        resolver: &SchemaResolver,
        settings: ProducerSettings,
    ) -> Result<Self, ProducerError> {
        let subject = settings.subject();
        let schema = resolver.register_or_reuse(&subject, &settings.schema).await?;

        info!(
            topic = %settings.topic,
            subject = %subject,
            schema_id = schema.id(),
            "event producer ready"
        );

        Ok(Self {
            log,
            topic: settings.topic,
            layout: settings.layout,
            schema,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn schema(&self) -> &SchemaHandle {
        &self.schema
    }

    /// Encode and publish one event, keyed by its id.
    #[instrument(
        skip_all,
        fields(topic = %self.topic, event_id = %event.id(), event_type = event.event_type())
    )]
    pub async fn send(&self, event: &DomainEvent) -> Result<RecordPosition, ProducerError> {
        let record = self.layout.to_record(event);
        let payload = self.schema.encode(&record)?;

        let position = self
            .log
            .send(OutboundRecord::new(
                self.topic.clone(),
                event.id().as_key(),
                payload,
            ))
            .await
            .map_err(ProducerError::Publish)?;

        debug!(partition = position.partition, offset = position.offset, "event sent");
        Ok(position)
    }

    /// Flush outstanding sends and release the producer.
    pub async fn close(self) -> Result<(), ProducerError> {
        self.log.flush().await.map_err(ProducerError::Publish)?;
        info!(topic = %self.topic, "event producer closed");
        Ok(())
    }
}

#[cfg(feature = "kafka")]
impl EventProducer {
    /// Register the schema over HTTP, then connect to Kafka.
    pub async fn connect(
        config: &crate::config::PipelineConfig,
        schema: impl Into<String>,
        layout: RecordLayout,
    ) -> Result<Self, ProducerError> {
        let registry = crate::schema::HttpSchemaRegistry::new(&config.schema_registry_url)?;
        let resolver = SchemaResolver::new(Arc::new(registry));

        let mut settings = ProducerSettings::new(config.topic.clone()).with_schema(schema, layout);
        settings.subject = Some(config.subject());
        let schema = resolver
            .register_or_reuse(&settings.subject(), &settings.schema)
            .await?;

        let log = crate::log::KafkaLogProducer::connect(&config.bootstrap_servers())
            .await
            .map_err(ProducerError::Connection)?;

        info!(topic = %settings.topic, schema_id = schema.id(), "event producer ready");
        Ok(Self {
            log: Arc::new(log),
            topic: settings.topic,
            layout: settings.layout,
            schema,
        })
    }
}

#[async_trait]
impl EventPublisher for EventProducer {
    type Error = ProducerError;

    async fn publish(&self, event: &DomainEvent) -> Result<(), Self::Error> {
        self.send(event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;

    use super::*;
    use crate::codec;
    use crate::log::InMemoryLog;
    use crate::schema::InMemorySchemaRegistry;
    use eventline_core::EntityId;
    use eventline_events::{FieldValue, publish_best_effort};

    fn event(id: &str, ty: &str, message: Option<&str>) -> DomainEvent {
        DomainEvent::at(
            EntityId::new(id).unwrap(),
            ty,
            message.map(str::to_string),
            DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
        )
        .unwrap()
    }

    async fn producer(log: &InMemoryLog, registry: &Arc<InMemorySchemaRegistry>) -> EventProducer {
        EventProducer::new(
            Arc::new(log.clone()),
            registry.clone(),
            ProducerSettings::new("order-events"),
        )
        .await
        .unwrap()
    }

    #[test]
    fn layouts_write_expected_fields() {
        let e = event("o1", "CREATED", Some("hi"));

        let canonical = RecordLayout::canonical().to_record(&e);
        assert_eq!(canonical.get("id"), Some(&FieldValue::from("o1")));
        assert_eq!(canonical.get("message"), Some(&FieldValue::from("hi")));
        assert_eq!(canonical.get("timestamp"), Some(&FieldValue::Int(1_700_000_000_123)));

        let orders = RecordLayout::order_events().to_record(&e);
        assert_eq!(orders.get("order_id"), Some(&FieldValue::from("o1")));
        assert_eq!(orders.get("event_type"), Some(&FieldValue::from("CREATED")));
        assert!(!orders.contains("message"));
    }

    #[tokio::test]
    async fn construction_registers_under_topic_subject() {
        let log = InMemoryLog::new();
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let producer = producer(&log, &registry).await;

        assert_eq!(producer.schema().subject(), "order-events-value");
        assert_eq!(registry.versions("order-events-value"), vec![producer.schema().id()]);
    }

    #[tokio::test]
    async fn registry_outage_is_fatal_at_construction() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        registry.set_available(false);

        let err = EventProducer::new(
            Arc::new(InMemoryLog::new()),
            registry,
            ProducerSettings::new("t"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProducerError::Registry(RegistryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn invalid_schema_is_fatal_at_construction() {
        let err = EventProducer::new(
            Arc::new(InMemoryLog::new()),
            Arc::new(InMemorySchemaRegistry::new()),
            ProducerSettings::new("t").with_schema("{", RecordLayout::canonical()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProducerError::Schema(_)));
    }

    #[tokio::test]
    async fn send_writes_envelope_keyed_by_id() {
        let log = InMemoryLog::new();
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let producer = producer(&log, &registry).await;

        let position = producer.send(&event("o1", "CREATED", None)).await.unwrap();
        let stored = log.records("order-events");

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].position(), position);
        assert_eq!(stored[0].key.as_deref(), Some(&b"o1"[..]));

        let (schema_id, _) = codec::decode(&stored[0].payload).unwrap();
        assert_eq!(schema_id, producer.schema().id());
    }

    #[tokio::test]
    async fn layout_mismatch_is_codec_error() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let producer = EventProducer::new(
            Arc::new(InMemoryLog::new()),
            registry,
            ProducerSettings::new("t").with_schema(ORDER_EVENT_SCHEMA, RecordLayout::canonical()),
        )
        .await
        .unwrap();

        assert!(matches!(
            producer.send(&event("o1", "CREATED", None)).await,
            Err(ProducerError::Codec(CodecError::Encoding(_)))
        ));
    }

    #[tokio::test]
    async fn publisher_seam_and_close() {
        let log = InMemoryLog::new();
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let producer = producer(&log, &registry).await;

        assert!(publish_best_effort(&producer, &event("u1", "SIGNED_UP", Some("welcome"))).await);
        producer.close().await.unwrap();
        assert_eq!(log.records("order-events").len(), 1);
    }
}
