//! Infrastructure layer: wire codec, schema registry, log adapters, producer,
//! consumer group runner and configuration.

pub mod codec;
pub mod config;
pub mod consumer;
pub mod log;
pub mod producer;
pub mod schema;


pub use codec::{AvroCodec, CodecError, WireEnvelope};
pub use config::{ConfigError, PipelineConfig};
pub use consumer::{
    ConsumerError, ConsumerGroupRunner, RunnerConfig, RunnerHandle, RunnerState, RunnerStats,
};
pub use log::{ConsumerGroup, InMemoryLog, LogError, LogProducer, RecordPosition};
pub use producer::{EventProducer, ProducerError, ProducerSettings, RecordLayout};
pub use schema::{
    HttpSchemaRegistry, InMemorySchemaRegistry, RegistryError, SchemaError, SchemaHandle,
    SchemaRegistry, SchemaResolver,
};
