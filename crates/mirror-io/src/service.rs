//! Lifecycle controller owning both stream handles and the pipeline.

use crate::kafka::{KafkaRecordSink, KafkaRecordSource};
use crate::metrics::Metrics;
use crate::pipeline::{DrainOutcome, Pipeline, PipelineHandle, PipelineSettings, PipelineState};
use mirror_core::{BridgeConfig, BridgeError, RecordSink, RecordSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{info, warn};

/// Owns both stream handles and the pipeline between them.
pub struct TransformerService {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn RecordSink>,
    pipeline: Pipeline,
    running: Mutex<Option<PipelineHandle>>,
}

impl TransformerService {
    /// Opens the Kafka consumer and producer described by `config`.
    pub async fn connect(config: &BridgeConfig) -> Result<Self, BridgeError> {
        info!(
            client_id = %config.client_id,
            source_brokers = %config.source.brokers,
            source_topic = %config.source.topic,
            destination_brokers = %config.destination.brokers,
            destination_topic = %config.destination.topic,
            group = %config.consumer_group,
            max_concurrent = config.max_concurrent_messages,
            format = ?config.output_format,
            "starting transformer service"
        );

        let source = KafkaRecordSource::new(&config.source, &config.consumer_group)?;
        let sink = KafkaRecordSink::connect(&config.destination).await?;

        Ok(Self::new(
            Arc::new(source),
            Arc::new(sink),
            PipelineSettings::from(config),
        ))
    }

    /// Wraps already opened streams.
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RecordSink>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pipeline: Pipeline::new(Arc::clone(&source), Arc::clone(&sink), settings),
            source,
            sink,
            running: Mutex::new(None),
        }
    }

    /// Counters of the pipeline, live while it runs.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.pipeline.metrics()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Receiver notified on every lifecycle transition.
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.pipeline.watch_state()
    }

    /// Subscribes and launches processing in the background.
    ///
    /// Returns once the subscription is in place; a failure means nothing
    /// was spawned.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(BridgeError::Startup("service already started".to_string()));
        }
        *running = Some(self.pipeline.start()?);
        Ok(())
    }

    /// Drains the pipeline for at most `deadline`, then closes both streams.
    ///
    /// Always returns. An exceeded deadline is logged and reported in the
    /// outcome; the stream handles are closed either way.
    pub async fn stop(&self, deadline: Duration) -> DrainOutcome {
        info!("stopping transformer service");
        let stop_by = Instant::now() + deadline;

        let outcome = match self.running.lock().await.take() {
            Some(handle) => {
                info!(in_flight = handle.in_flight(), "draining in-flight records");
                handle.drain(deadline).await
            }
            None => DrainOutcome::Completed,
        };
        if let DrainOutcome::DeadlineExceeded { in_flight } = outcome {
            warn!(in_flight, "shutdown timeout exceeded, closing streams anyway");
        }

        self.source.close();
        self.sink.close(stop_by.saturating_duration_since(Instant::now()));
        self.pipeline.set_state(PipelineState::Stopped);

        self.pipeline.metrics().snapshot().log_report();
        info!("transformer service stopped");
        outcome
    }
}
