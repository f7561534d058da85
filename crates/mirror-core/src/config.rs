//! Bridge configuration.
//!
//! Configuration comes either from environment variables (the default for
//! container deployments) or from a YAML document with the same fields:
//!
//! ```yaml
//! client_id: "acct-42"
//! consumer_group: "mirror-bridge"
//! source:
//!   brokers: "source-kafka:9092"
//!   topic: "mirrored-traffic"
//! destination:
//!   brokers: "dest-kafka:9092"
//!   topic: "akto.api.logs"
//!   sasl:
//!     enabled: true
//!     username: "bridge"
//!     password: "secret"
//! max_concurrent_messages: 20
//! output_format: protobuf
//! ```

use ::config::{Config, Environment};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0} is required but not configured")]
    Missing(&'static str),

    #[error("config error: invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },

    #[error("config error: failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("config error: {0}")]
    Env(#[from] ::config::ConfigError),
}

/// What the pipeline publishes to the destination stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The flat record serialized as a JSON object.
    #[default]
    #[serde(alias = "JSON")]
    Json,
    /// The binary traffic record encoded as protobuf.
    #[serde(alias = "PROTOBUF", alias = "proto")]
    Protobuf,
}

/// How far the commit timer may move the committed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitPolicy {
    /// Commit everything fetched so far, whether or not it was published.
    /// A crash between a commit and the end of in-flight work loses records.
    #[default]
    #[serde(alias = "FETCHED")]
    Fetched,
    /// Commit only up to the last position below every unfinished record.
    #[serde(alias = "COMPLETED")]
    Completed,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SaslConfig {
    pub enabled: bool,
    pub mechanism: String,
    pub username: String,
    pub password: String,
    pub security_protocol: String,
}

impl Default for SaslConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mechanism: default_sasl_mechanism(),
            username: String::new(),
            password: String::new(),
            security_protocol: default_security_protocol(),
        }
    }
}

impl fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslConfig")
            .field("enabled", &self.enabled)
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("security_protocol", &self.security_protocol)
            .finish()
    }
}

/// One side of the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    pub topic: String,
    #[serde(default)]
    pub sasl: SaslConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Fallback client identifier stamped on records that carry none.
    pub client_id: String,
    pub consumer_group: String,
    pub source: EndpointConfig,
    pub destination: EndpointConfig,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Size of the concurrency budget.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_messages: usize,
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,
    /// Bounded wait of a single fetch.
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
    /// Bounded wait for a delivery confirmation.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub commit_policy: CommitPolicy,
}

fn default_sasl_mechanism() -> String {
    "PLAIN".to_string()
}

fn default_security_protocol() -> String {
    "SASL_PLAINTEXT".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_max_concurrent() -> usize {
    10
}

fn default_commit_interval_ms() -> u64 {
    5_000
}

fn default_processing_timeout_ms() -> u64 {
    10_000
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_metrics_interval_secs() -> u64 {
    3_600
}

/// The environment as one flat set of variables, lower-cased by `config`.
///
/// Required variables default to empty here so that [`BridgeConfig::validate`]
/// can report the first missing one by name.
#[derive(Debug, Deserialize)]
struct EnvVars {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    source_brokers: String,
    #[serde(default)]
    source_topic: String,
    #[serde(default)]
    destination_brokers: String,
    #[serde(default)]
    destination_topic: String,
    #[serde(default)]
    consumer_group: String,

    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_concurrent")]
    max_concurrent_messages: usize,
    #[serde(default = "default_commit_interval_ms")]
    commit_interval_ms: u64,
    #[serde(default = "default_processing_timeout_ms")]
    processing_timeout_ms: u64,
    #[serde(default = "default_publish_timeout_ms")]
    publish_timeout_ms: u64,
    #[serde(default = "default_metrics_interval_secs")]
    metrics_interval_secs: u64,
    #[serde(default)]
    output_format: OutputFormat,
    #[serde(default)]
    commit_policy: CommitPolicy,

    #[serde(default)]
    source_sasl_enabled: bool,
    #[serde(default = "default_sasl_mechanism")]
    source_sasl_mechanism: String,
    #[serde(default)]
    source_sasl_username: String,
    #[serde(default)]
    source_sasl_password: String,
    #[serde(default = "default_security_protocol")]
    source_security_protocol: String,

    #[serde(default)]
    destination_sasl_enabled: bool,
    #[serde(default = "default_sasl_mechanism")]
    destination_sasl_mechanism: String,
    #[serde(default)]
    destination_sasl_username: String,
    #[serde(default)]
    destination_sasl_password: String,
    #[serde(default = "default_security_protocol")]
    destination_security_protocol: String,
}

impl From<EnvVars> for BridgeConfig {
    fn from(vars: EnvVars) -> Self {
        Self {
            client_id: vars.client_id,
            consumer_group: vars.consumer_group,
            source: EndpointConfig {
                brokers: vars.source_brokers,
                topic: vars.source_topic,
                sasl: SaslConfig {
                    enabled: vars.source_sasl_enabled,
                    mechanism: vars.source_sasl_mechanism,
                    username: vars.source_sasl_username,
                    password: vars.source_sasl_password,
                    security_protocol: vars.source_security_protocol,
                },
            },
            destination: EndpointConfig {
                brokers: vars.destination_brokers,
                topic: vars.destination_topic,
                sasl: SaslConfig {
                    enabled: vars.destination_sasl_enabled,
                    mechanism: vars.destination_sasl_mechanism,
                    username: vars.destination_sasl_username,
                    password: vars.destination_sasl_password,
                    security_protocol: vars.destination_security_protocol,
                },
            },
            log_level: vars.log_level,
            max_concurrent_messages: vars.max_concurrent_messages,
            commit_interval_ms: vars.commit_interval_ms,
            processing_timeout_ms: vars.processing_timeout_ms,
            publish_timeout_ms: vars.publish_timeout_ms,
            metrics_interval_secs: vars.metrics_interval_secs,
            output_format: vars.output_format,
            commit_policy: vars.commit_policy,
        }
    }
}

impl BridgeConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default())
    }

    /// Loads configuration from the given variables instead of the process
    /// environment.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: ::config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_environment(Environment::default().source(Some(vars)))
    }

    fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        // Empty values count as unset.
        let vars: EnvVars = Config::builder()
            .add_source(environment.ignore_empty(true))
            .build()?
            .try_deserialize()?;

        let config = Self::from(vars);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&raw)?;
        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Parses a YAML document and validates it.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects empty required fields, checked in a fixed order so the first
    /// missing one is reported, and zero-sized budgets or intervals.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &str); 6] = [
            ("CLIENT_ID", &self.client_id),
            ("SOURCE_BROKERS", &self.source.brokers),
            ("SOURCE_TOPIC", &self.source.topic),
            ("DESTINATION_BROKERS", &self.destination.brokers),
            ("DESTINATION_TOPIC", &self.destination.topic),
            ("CONSUMER_GROUP", &self.consumer_group),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.is_empty()) {
            return Err(ConfigError::Missing(*name));
        }

        let positive: [(&'static str, u64); 5] = [
            ("MAX_CONCURRENT_MESSAGES", self.max_concurrent_messages as u64),
            ("COMMIT_INTERVAL_MS", self.commit_interval_ms),
            ("PROCESSING_TIMEOUT_MS", self.processing_timeout_ms),
            ("PUBLISH_TIMEOUT_MS", self.publish_timeout_ms),
            ("METRICS_INTERVAL_SECS", self.metrics_interval_secs),
        ];
        if let Some((name, value)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid {
                name: *name,
                value: value.to_string(),
            });
        }
        Ok(())
    }

    /// Interval between two commit timer ticks.
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    /// Bounded wait of a single fetch.
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }

    /// Bounded wait for a delivery confirmation.
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Interval between two counters reports.
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}
