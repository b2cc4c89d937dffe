//! Schema registry boundary and the caching resolver built on top of it.
//!
//! Producers register their writer schema under a subject and stamp the
//! returned id onto every envelope. Consumers go the other way: envelope id →
//! schema definition → compiled codec. Both directions are cached by
//! [`SchemaResolver`] so the registry is hit once per subject/definition and
//! once per id.

pub mod http;
pub mod in_memory;
pub mod resolver;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::CodecError;

pub use http::HttpSchemaRegistry;
pub use in_memory::InMemorySchemaRegistry;
pub use resolver::{SchemaHandle, SchemaResolver};

/// Subject naming: one value schema per topic.
pub fn subject_for_topic(topic: &str) -> String {
    format!("{topic}-value")
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Transport failure or a 5xx answer.
    #[error("schema registry unavailable: {0}")]
    Unavailable(String),

    #[error("unknown schema id {0}")]
    UnknownSchema(u32),

    /// The registry refused the definition (incompatible or unparsable).
    #[error("schema rejected for subject {subject}: {reason}")]
    Rejected { subject: String, reason: String },
}

/// Errors surfaced by the resolver: either the registry or the schema itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Remote schema registry (Confluent REST semantics).
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Register `definition` under `subject`, returning its global id.
    ///
    /// Registering an identical definition again must return the same id.
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError>;

    /// Fetch the definition for a global schema id.
    async fn fetch(&self, id: u32) -> Result<String, RegistryError>;
}

#[async_trait]
impl<R> SchemaRegistry for std::sync::Arc<R>
where
    R: SchemaRegistry + ?Sized,
{
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError> {
        (**self).register(subject, definition).await
    }

    async fn fetch(&self, id: u32) -> Result<String, RegistryError> {
        (**self).fetch(id).await
    }
}
