//! In-process schema registry for tests and local runs.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{RegistryError, SchemaRegistry};

#[derive(Debug, Default)]
struct State {
    /// Global id per distinct definition text.
    ids: HashMap<String, u32>,
    definitions: HashMap<u32, String>,
    /// Ids registered per subject, in version order.
    subjects: HashMap<String, Vec<u32>>,
}

/// Mirrors registry semantics: identical definitions share one global id
/// across subjects, ids start at 1.
///
/// Availability can be toggled to exercise outage paths.
#[derive(Debug)]
pub struct InMemorySchemaRegistry {
    state: RwLock<State>,
    available: AtomicBool,
    registrations: AtomicUsize,
    fetches: AtomicUsize,
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            available: AtomicBool::new(true),
            registrations: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `register` calls that reached the registry.
    pub fn registration_calls(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls that reached the registry.
    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Registered ids for `subject`, oldest first.
    pub fn versions(&self, subject: &str) -> Vec<u32> {
        self.state
            .read()
            .map(|s| s.subjects.get(subject).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<(), RegistryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::Unavailable("registry offline".to_string()))
        }
    }
}

fn poisoned() -> RegistryError {
    RegistryError::Unavailable("registry state poisoned".to_string())
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        if apache_avro::Schema::parse_str(definition).is_err() {
            return Err(RegistryError::Rejected {
                subject: subject.to_string(),
                reason: "invalid Avro schema".to_string(),
            });
        }

        let mut state = self.state.write().map_err(|_| poisoned())?;
        let next = state.definitions.len() as u32 + 1;
        let id = *state.ids.entry(definition.to_string()).or_insert(next);
        state.definitions.entry(id).or_insert_with(|| definition.to_string());

        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
        }

        Ok(id)
    }

    async fn fetch(&self, id: u32) -> Result<String, RegistryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let state = self.state.read().map_err(|_| poisoned())?;
        state
            .definitions
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownSchema(id))
    }
}
