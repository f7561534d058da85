//! # Mirror IO - Kafka pipeline for mirrored traffic
//!
//! Moves records from the source topic through the transformation engine and
//! onto the destination topic:
//!
//! - [`kafka`]: rdkafka consumer and producer behind the core stream traits
//! - [`pipeline`]: bounded dispatcher, worker pool and periodic commit timer
//! - [`cursor`]: per-partition bookkeeping of what may be committed
//! - [`metrics`]: shared counters and the periodic report
//! - [`service`]: start and deadline-bounded stop of the whole bridge

pub mod cursor;
pub mod kafka;
pub mod metrics;
pub mod pipeline;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use cursor::CommitCursor;
pub use kafka::{KafkaRecordSink, KafkaRecordSource};
pub use metrics::{Metrics, MetricsSnapshot};
pub use pipeline::{
    resolve_client_id, DrainOutcome, Pipeline, PipelineHandle, PipelineSettings, PipelineState,
};
pub use service::TransformerService;
