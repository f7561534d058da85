//! # Mirror Core - shared types for the mirror bridge
//!
//! This crate provides the record types, stream abstractions and error
//! taxonomy shared by the transformation engine (`mirror-tx`) and the Kafka
//! pipeline (`mirror-io`).
//!
//! ## Key Components
//!
//! - **Records**: [`InboundRecord`] as fetched from the source stream and
//!   [`OutboundRecord`] as handed to the destination stream
//! - **Stream Traits**: [`RecordSource`] and [`RecordSink`], the two seams the
//!   pipeline talks to, implemented over rdkafka in `mirror-io`
//! - **Errors**: one enum per failure domain, so callers can tell a fetch
//!   timeout from a transport failure or a missing commit offset
//! - **Configuration**: [`BridgeConfig`], loaded from the environment or YAML

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

pub mod config;

pub use config::{
    BridgeConfig, CommitPolicy, ConfigError, EndpointConfig, OutputFormat, SaslConfig,
};

/// Location of a record inside the source stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl Position {
    /// Position of the record at `offset` in `topic[partition]`.
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// One record fetched from the source stream.
///
/// The payload is opaque at this level; `mirror-tx` decodes it. Headers keep
/// their wire order and may repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub payload: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub position: Position,
}

impl InboundRecord {
    /// A record without headers.
    pub fn new(payload: impl Into<Vec<u8>>, position: Position) -> Self {
        Self {
            payload: payload.into(),
            headers: Vec::new(),
            position,
        }
    }

    /// Appends one header, keeping any earlier one with the same key.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// First header with the given key, if any.
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }
}

/// A transformed record ready to be published.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    /// Partitioning key, the resolved client identifier.
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// Where the destination stream placed a published record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Errors that abort startup or a single record's transformation.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Subscription or stream-handle creation failed; the pipeline cannot start.
    #[error("startup failed: {0}")]
    Startup(String),

    /// The inbound payload is not a well-formed nested record.
    #[error("malformed inbound record: {0}")]
    Parse(String),
}

/// Outcome of a failed fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Nothing arrived within the bounded wait. Not an error for the loop.
    #[error("fetch timed out")]
    Timeout,

    #[error("fetch failed: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to produce to {topic}: {reason}")]
    Produce { topic: String, reason: String },

    #[error("delivery to {topic} not confirmed within {timeout:?}")]
    ConfirmTimeout { topic: String, timeout: Duration },

    #[error("failed to encode outbound record: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// There is no position to commit yet.
    #[error("no offset to commit")]
    NoOffset,

    #[error("commit failed: {0}")]
    Failed(String),
}

/// Read side of the bridge.
///
/// `fetch` is only ever called from the single dispatcher; `commit` is called
/// from the commit timer concurrently with `fetch`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Subscribes to the source topic. Failure is fatal for startup.
    fn subscribe(&self) -> Result<(), BridgeError>;

    /// Waits up to `wait` for the next record.
    async fn fetch(&self, wait: Duration) -> Result<InboundRecord, FetchError>;

    /// Marks every record up to and including each given position as consumed.
    ///
    /// Returns only once the commit is confirmed, so an `Ok` means the
    /// positions are durable.
    async fn commit(&self, positions: &[Position]) -> Result<(), CommitError>;

    /// Releases the underlying handle. Further calls may fail.
    fn close(&self);
}

/// Write side of the bridge. Safe to share between concurrent tasks.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Publishes `record` and waits up to `confirm` for the delivery report.
    async fn publish(
        &self,
        record: OutboundRecord,
        confirm: Duration,
    ) -> Result<Delivery, PublishError>;

    /// Flushes pending deliveries for at most `timeout` and releases the handle.
    fn close(&self, timeout: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_returns_first_match() {
        let record = InboundRecord::new(b"{}".to_vec(), Position::new("traffic", 0, 7))
            .with_header("client_id", "acct-1")
            .with_header("client_id", "acct-2");

        assert_eq!(record.header("client_id"), Some(&b"acct-1"[..]));
        assert_eq!(record.header("missing"), None);
    }

    #[test]
    fn position_display() {
        assert_eq!(Position::new("traffic", 3, 42).to_string(), "traffic[3]@42");
    }
}
