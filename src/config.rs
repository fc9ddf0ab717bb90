//! Bus configuration.
//!
//! Loadable from TOML and adjustable with `with_*` builders:
//!
//! ```toml
//! request_timeout_ms = 5000
//! default_content_type = "raw_json"
//! concurrency_limit = 4
//! namespace = "billing"
//! application_name = "billing-api"
//!
//! [retry]
//! limit = 3
//! interval_ms = 200
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::RetryPolicy;
use crate::serialization::SerializerKind;
use crate::transport::DEFAULT_CONCURRENCY_LIMIT;

/// Default request/response timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry applied to every consumer that does not configure its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub limit: u32,
    /// Delay before each retry, in milliseconds.
    pub interval_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        if self.interval_ms == 0 {
            RetryPolicy::immediate(self.limit)
        } else {
            RetryPolicy::interval(self.limit, Duration::from_millis(self.interval_ms))
        }
    }
}

/// Runtime settings for a [`Bus`](crate::bus::Bus).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    pub default_content_type: SerializerKind,
    /// Frames handled concurrently per endpoint.
    pub concurrency_limit: usize,
    pub retry: Option<RetryConfig>,
    /// Prefix for derived queue names.
    pub namespace: Option<String>,
    /// Overrides the machine name reported in host metadata.
    pub host_name: Option<String>,
    /// Application name reported as the host `assembly`.
    pub application_name: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_content_type: SerializerKind::Envelope,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            retry: None,
            namespace: None,
            host_name: None,
            application_name: None,
        }
    }
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Read and parse a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_default_content_type(mut self, kind: SerializerKind) -> Self {
        self.default_content_type = kind;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn with_retry(mut self, limit: u32, interval: Duration) -> Self {
        self.retry = Some(RetryConfig {
            limit,
            interval_ms: interval.as_millis() as u64,
        });
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = Some(host_name.into());
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
