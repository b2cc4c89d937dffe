//! Confluent-compatible schema registry over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RegistryError, SchemaRegistry};

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct RegisterRequest<'a> {
    schema: &'a str,
}

#[derive(Deserialize)]
struct RegisterResponse {
    id: u32,
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// REST client for `POST /subjects/{subject}/versions` and `GET /schemas/ids/{id}`.
#[derive(Debug, Clone)]
pub struct HttpSchemaRegistry {
    base: Url,
    client: Client,
}

impl HttpSchemaRegistry {
    pub fn new(base_url: &str) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        Self::with_client(base_url, client)
    }

    pub fn with_client(base_url: &str, client: Client) -> Result<Self, RegistryError> {
        let base = Url::parse(base_url)
            .map_err(|e| RegistryError::Unavailable(format!("invalid registry url {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RegistryError::Unavailable(format!(
                "invalid registry url {base_url}"
            )));
        }
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `cannot_be_a_base` was rejected in the constructor.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn transport(err: reqwest::Error) -> RegistryError {
    RegistryError::Unavailable(err.to_string())
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.unwrap_or_default();
    if body.message.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.message)
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn register(&self, subject: &str, definition: &str) -> Result<u32, RegistryError> {
        let url = self.endpoint(&["subjects", subject, "versions"]);
        debug!(%url, subject, "registering schema");

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&RegisterRequest { schema: definition })
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            let body: RegisterResponse = response.json().await.map_err(transport)?;
            return Ok(body.id);
        }

        let reason = error_message(response).await;
        if status.is_server_error() {
            Err(RegistryError::Unavailable(reason))
        } else {
            Err(RegistryError::Rejected {
                subject: subject.to_string(),
                reason,
            })
        }
    }

    async fn fetch(&self, id: u32) -> Result<String, RegistryError> {
        let url = self.endpoint(&["schemas", "ids", &id.to_string()]);
        debug!(%url, schema_id = id, "fetching schema");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, CONTENT_TYPE)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            s if s.is_success() => {
                let body: SchemaResponse = response.json().await.map_err(transport)?;
                Ok(body.schema)
            }
            StatusCode::NOT_FOUND => Err(RegistryError::UnknownSchema(id)),
            _ => Err(RegistryError::Unavailable(error_message(response).await)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_append_to_base_path() {
        let registry = HttpSchemaRegistry::new("http://registry:8081/api/").unwrap();
        assert_eq!(
            registry.endpoint(&["subjects", "order-events-value", "versions"]).as_str(),
            "http://registry:8081/api/subjects/order-events-value/versions"
        );

        let registry = HttpSchemaRegistry::new("http://registry:8081").unwrap();
        assert_eq!(
            registry.endpoint(&["schemas", "ids", "7"]).as_str(),
            "http://registry:8081/schemas/ids/7"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(HttpSchemaRegistry::new("not a url").is_err());
        assert!(HttpSchemaRegistry::new("mailto:someone@example.com").is_err());
    }
}
