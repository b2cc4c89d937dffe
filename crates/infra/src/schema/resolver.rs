use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use eventline_events::NativeRecord;

use super::{RegistryError, SchemaError, SchemaRegistry};
use crate::codec::{self, AvroCodec};

/// A registered writer schema: what a producer stamps onto envelopes.
#[derive(Debug, Clone)]
pub struct SchemaHandle {
    subject: String,
    id: u32,
    codec: Arc<AvroCodec>,
}

impl SchemaHandle {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn codec(&self) -> &AvroCodec {
        &self.codec
    }

    /// Encode `record` into a full envelope carrying this schema's id.
    pub fn encode(&self, record: &NativeRecord) -> Result<Vec<u8>, SchemaError> {
        Ok(self.codec.encode(self.id, record)?)
    }
}

/// Caching front for a [`SchemaRegistry`].
///
/// - `register_or_reuse`: one registry round-trip per (subject, definition)
/// - `resolve`: one registry round-trip per schema id
///
/// Failed lookups are not cached; the next call retries the registry.
pub struct SchemaResolver {
    registry: Arc<dyn SchemaRegistry>,
    registered: RwLock<HashMap<(String, String), u32>>,
    codecs: RwLock<HashMap<u32, Arc<AvroCodec>>>,
}

impl core::fmt::Debug for SchemaResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchemaResolver")
            .field("cached_ids", &self.cached_ids())
            .finish_non_exhaustive()
    }
}

fn poisoned() -> SchemaError {
    SchemaError::Registry(RegistryError::Unavailable(
        "schema cache poisoned".to_string(),
    ))
}

impl SchemaResolver {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            registry,
            registered: RwLock::new(HashMap::new()),
            codecs: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SchemaRegistry> {
        &self.registry
    }

    /// Register `definition` under `subject`, or reuse the id from a previous
    /// call with the same pair.
    ///
    /// The definition is compiled before contacting the registry so a bad
    /// schema never reaches it.
    pub async fn register_or_reuse(
        &self,
        subject: &str,
        definition: &str,
    ) -> Result<SchemaHandle, SchemaError> {
        let key = (subject.to_string(), definition.to_string());

        let cached = self
            .registered
            .read()
            .map_err(|_| poisoned())?
            .get(&key)
            .copied();

        if let Some(id) = cached {
            let codec = self.codec_for(id, definition)?;
            return Ok(SchemaHandle {
                subject: key.0,
                id,
                codec,
            });
        }

        let compiled = AvroCodec::parse(definition)?;
        let id = self.registry.register(subject, definition).await?;
        info!(subject, schema_id = id, "schema registered");

        self.registered
            .write()
            .map_err(|_| poisoned())?
            .insert(key.clone(), id);
        let codec = self.cache_codec(id, compiled)?;

        Ok(SchemaHandle {
            subject: key.0,
            id,
            codec,
        })
    }

    /// Compiled codec for a schema id, fetching the definition on first use.
    pub async fn resolve(&self, id: u32) -> Result<Arc<AvroCodec>, SchemaError> {
        if let Some(codec) = self.cached(id)? {
            return Ok(codec);
        }

        let definition = self.registry.fetch(id).await?;
        let compiled = AvroCodec::parse(definition)?;
        debug!(schema_id = id, "schema resolved");

        self.cache_codec(id, compiled)
    }

    /// Definition text for a schema id.
    pub async fn definition(&self, id: u32) -> Result<String, SchemaError> {
        Ok(self.resolve(id).await?.definition().to_string())
    }

    /// Decode a raw envelope into a native record using the writer schema it names.
    pub async fn decode(&self, bytes: &[u8]) -> Result<(u32, NativeRecord), SchemaError> {
        let (id, payload) = codec::decode(bytes)?;
        let record = self.decode_payload(id, payload).await?;
        Ok((id, record))
    }

    /// Decode a header-less payload written with schema `id`.
    pub async fn decode_payload(&self, id: u32, payload: &[u8]) -> Result<NativeRecord, SchemaError> {
        let codec = self.resolve(id).await?;
        Ok(codec.decode_payload(payload)?)
    }

    /// Ids with a compiled codec in the cache.
    pub fn cached_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .codecs
            .read()
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn cached(&self, id: u32) -> Result<Option<Arc<AvroCodec>>, SchemaError> {
        Ok(self.codecs.read().map_err(|_| poisoned())?.get(&id).cloned())
    }

    fn codec_for(&self, id: u32, definition: &str) -> Result<Arc<AvroCodec>, SchemaError> {
        match self.cached(id)? {
            Some(codec) => Ok(codec),
            None => self.cache_codec(id, AvroCodec::parse(definition)?),
        }
    }

    fn cache_codec(&self, id: u32, compiled: AvroCodec) -> Result<Arc<AvroCodec>, SchemaError> {
        let mut codecs = self.codecs.write().map_err(|_| poisoned())?;
        Ok(codecs.entry(id).or_insert_with(|| Arc::new(compiled)).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecError;
    use crate::schema::InMemorySchemaRegistry;
    use crate::schema::fixtures::{NOTIFICATION_V1, NOTIFICATION_V2};

    fn resolver() -> (Arc<InMemorySchemaRegistry>, SchemaResolver) {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let resolver = SchemaResolver::new(registry.clone());
        (registry, resolver)
    }

    fn record() -> NativeRecord {
        NativeRecord::new()
            .with("id", "o1")
            .with("type", "CREATED")
            .with("timestamp", 5_i64)
    }

    #[tokio::test]
    async fn register_or_reuse_hits_registry_once() {
        let (registry, resolver) = resolver();

        let first = resolver.register_or_reuse("n-value", NOTIFICATION_V1).await.unwrap();
        let second = resolver.register_or_reuse("n-value", NOTIFICATION_V1).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(first.subject(), "n-value");
        assert_eq!(registry.registration_calls(), 1);
    }

    #[tokio::test]
    async fn resolve_caches_by_id() {
        let (registry, resolver) = resolver();
        let id = registry.register("n-value", NOTIFICATION_V1).await.unwrap();

        resolver.resolve(id).await.unwrap();
        resolver.resolve(id).await.unwrap();
        assert_eq!(registry.fetch_calls(), 1);
        assert_eq!(resolver.cached_ids(), vec![id]);
        assert_eq!(resolver.definition(id).await.unwrap(), NOTIFICATION_V1);
    }

    #[tokio::test]
    async fn registered_schema_resolves_without_fetch() {
        let (registry, resolver) = resolver();
        let handle = resolver.register_or_reuse("n-value", NOTIFICATION_V1).await.unwrap();

        let bytes = handle.encode(&record()).unwrap();
        let (id, decoded) = resolver.decode(&bytes).await.unwrap();

        assert_eq!(id, handle.id());
        assert_eq!(decoded.get("id").and_then(|v| v.as_str()), Some("o1"));
        assert_eq!(registry.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn outage_is_not_cached() {
        let (registry, resolver) = resolver();
        let id = registry.register("n-value", NOTIFICATION_V1).await.unwrap();

        registry.set_available(false);
        assert!(matches!(
            resolver.resolve(id).await,
            Err(SchemaError::Registry(RegistryError::Unavailable(_)))
        ));

        registry.set_available(true);
        assert!(resolver.resolve(id).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_id_and_bad_envelope() {
        let (_, resolver) = resolver();

        assert!(matches!(
            resolver.decode(&[0, 0, 0, 0, 42, 1]).await,
            Err(SchemaError::Registry(RegistryError::UnknownSchema(42)))
        ));
        assert!(matches!(
            resolver.decode(&[9, 9]).await,
            Err(SchemaError::Codec(CodecError::MalformedEnvelope(_)))
        ));
    }

    #[tokio::test]
    async fn invalid_schema_never_reaches_registry() {
        let (registry, resolver) = resolver();
        let err = resolver.register_or_reuse("n-value", r#""string""#).await.unwrap_err();

        assert!(matches!(err, SchemaError::Codec(CodecError::InvalidSchema(_))));
        assert_eq!(registry.registration_calls(), 0);
    }

    #[tokio::test]
    async fn evolved_schema_gets_distinct_id() {
        let (_, resolver) = resolver();
        let v1 = resolver.register_or_reuse("n-value", NOTIFICATION_V1).await.unwrap();
        let v2 = resolver.register_or_reuse("n-value", NOTIFICATION_V2).await.unwrap();

        assert_ne!(v1.id(), v2.id());

        let bytes = v2.encode(&record().with("source", "billing")).unwrap();
        let (_, decoded) = resolver.decode(&bytes).await.unwrap();
        assert_eq!(decoded.get("source").and_then(|v| v.as_str()), Some("billing"));
    }
}
