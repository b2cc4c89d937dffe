//! Environment configuration for the pipeline.
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file in the working directory. Every variable has a default so a local run
//! needs no setup.

use std::time::Duration;

use thiserror::Error;

use crate::schema::subject_for_topic;

pub const DEFAULT_BROKERS: &str = "localhost:9092";
pub const DEFAULT_TOPIC: &str = "order-events";
pub const DEFAULT_GROUP_ID: &str = "notification-service";
pub const DEFAULT_REGISTRY_URL: &str = "http://localhost:8081";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_SINK_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub schema_registry_url: String,
    /// Registry subject; `None` means `<topic>-value`.
    pub subject: Option<String>,
    pub http_port: u16,
    pub sink_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            brokers: vec![DEFAULT_BROKERS.to_string()],
            topic: DEFAULT_TOPIC.to_string(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            schema_registry_url: DEFAULT_REGISTRY_URL.to_string(),
            subject: None,
            http_port: DEFAULT_HTTP_PORT,
            sink_timeout: Duration::from_millis(DEFAULT_SINK_TIMEOUT_MS),
        }
    }
}

impl PipelineConfig {
    /// Load from the environment (after reading `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is the normal case outside local development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let brokers = match get("KAFKA_BROKERS") {
            Some(raw) => {
                let brokers: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(str::to_string)
                    .collect();
                if brokers.is_empty() {
                    return Err(ConfigError::Invalid {
                        key: "KAFKA_BROKERS",
                        value: raw,
                        reason: "no broker addresses".to_string(),
                    });
                }
                brokers
            }
            None => defaults.brokers,
        };

        let http_port = match get("HTTP_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "HTTP_PORT",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.http_port,
        };

        let sink_timeout = match get("SINK_TIMEOUT_MS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                Ok(_) => {
                    return Err(ConfigError::Invalid {
                        key: "SINK_TIMEOUT_MS",
                        value: raw,
                        reason: "must be positive".to_string(),
                    });
                }
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        key: "SINK_TIMEOUT_MS",
                        value: raw,
                        reason: e.to_string(),
                    });
                }
            },
            None => defaults.sink_timeout,
        };

        Ok(Self {
            brokers,
            topic: get("KAFKA_TOPIC").unwrap_or(defaults.topic),
            group_id: get("KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            schema_registry_url: get("SCHEMA_REGISTRY_URL").unwrap_or(defaults.schema_registry_url),
            subject: get("SCHEMA_SUBJECT"),
            http_port,
            sink_timeout,
        })
    }

    pub fn with_brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.brokers = brokers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_schema_registry_url(mut self, url: impl Into<String>) -> Self {
        self.schema_registry_url = url.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn with_sink_timeout(mut self, timeout: Duration) -> Self {
        self.sink_timeout = timeout;
        self
    }

    /// Broker list in librdkafka's `bootstrap.servers` form.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    /// Explicit subject, else `<topic>-value`.
    pub fn subject(&self) -> String {
        self.subject
            .clone()
            .unwrap_or_else(|| subject_for_topic(&self.topic))
    }
}
