use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Counters shared by every task of a pipeline.
///
/// All updates are relaxed atomic increments; [`Metrics::snapshot`] reads
/// each field once, so a snapshot taken while tasks run may mix counts from
/// slightly different instants.
#[derive(Debug, Default)]
pub struct Metrics {
    received: AtomicU64,
    transformed: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    processing_nanos: AtomicU64,
}

impl Metrics {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A record entered a worker.
    pub fn increment_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was converted to the output schema.
    pub fn increment_transformed(&self) {
        self.transformed.fetch_add(1, Ordering::Relaxed);
    }

    /// A record's delivery was confirmed.
    pub fn increment_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// A record failed to transform, encode or publish.
    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds the time one published record took from admission to delivery.
    pub fn add_processing_time(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.processing_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Reads every counter once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let transformed = self.transformed.load(Ordering::Relaxed);
        let total_time = Duration::from_nanos(self.processing_nanos.load(Ordering::Relaxed));
        let avg_time = if transformed > 0 {
            total_time / u32::try_from(transformed).unwrap_or(u32::MAX)
        } else {
            Duration::ZERO
        };

        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            transformed,
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            total_time,
            avg_time,
        }
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub transformed: u64,
    pub published: u64,
    pub failed: u64,
    pub total_time: Duration,
    /// Accumulated processing time divided by the transformed count.
    pub avg_time: Duration,
}

impl MetricsSnapshot {
    /// Logs the counters at INFO.
    pub fn log_report(&self) {
        info!("=== metrics report ===");
        info!("  Received:    {} messages", self.received);
        info!("  Transformed: {} messages", self.transformed);
        info!("  Published:   {} messages", self.published);
        info!("  Failed:      {} messages", self.failed);
        info!("  Avg time:    {:?}", self.avg_time);
    }
}
