//! The bounded fetch, dispatch and commit pipeline.
//!
//! One dispatcher task fetches records in source order and admits each one
//! into a fixed pool of workers through a concurrency budget. When every
//! permit is held the dispatcher waits, which is the only backpressure the
//! pipeline applies. A separate timer commits source positions on a fixed
//! interval, independently of worker progress, and a reporter logs the
//! counters periodically.
//!
//! Workers finish in any order, so records may reach the destination in a
//! different order than they were fetched.

use crate::cursor::CommitCursor;
use crate::metrics::Metrics;
use chrono::Utc;
use mirror_core::{
    BridgeConfig, BridgeError, CommitError, CommitPolicy, FetchError, InboundRecord,
    OutboundRecord, OutputFormat, PublishError, RecordSink, RecordSource,
};
use mirror_tx::{to_binary, to_flat, Fields, FlatRecord, HttpResponseParam};
use prost::Message as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Header carrying the client identifier, on both inbound and outbound records.
pub const CLIENT_ID_HEADER: &str = "client_id";

/// Outbound header carrying the RFC 3339 time the record was transformed.
pub const TRANSFORMED_AT_HEADER: &str = "transformed_at";

/// Payload field consulted when the inbound record has no client header.
pub const ACCOUNT_ID_FIELD: &str = "akto_account_id";

/// Lifecycle of a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Subscribed,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Size of the concurrency budget and of the worker pool.
    pub max_concurrent: usize,
    pub fetch_timeout: Duration,
    pub commit_interval: Duration,
    pub publish_timeout: Duration,
    pub metrics_interval: Duration,
    pub output_format: OutputFormat,
    pub commit_policy: CommitPolicy,
    /// Client identifier used when a record carries none.
    pub default_client_id: String,
}

impl From<&BridgeConfig> for PipelineSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_messages,
            fetch_timeout: config.processing_timeout(),
            commit_interval: config.commit_interval(),
            publish_timeout: config.publish_timeout(),
            metrics_interval: config.metrics_interval(),
            output_format: config.output_format,
            commit_policy: config.commit_policy,
            default_client_id: config.client_id.clone(),
        }
    }
}

/// Picks the client identifier for a record: the `client_id` header, then
/// the payload's `akto_account_id`, then `fallback`.
pub fn resolve_client_id(record: &InboundRecord, fallback: &str) -> String {
    if let Some(id) = record
        .header(CLIENT_ID_HEADER)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .filter(|id| !id.is_empty())
    {
        return id.to_string();
    }

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&record.payload) {
        let id = Fields::new(&value).str(&[ACCOUNT_ID_FIELD]);
        if !id.is_empty() {
            return id.to_string();
        }
    }

    fallback.to_string()
}

/// A record admitted into the worker pool, holding one unit of the budget.
struct Job {
    record: InboundRecord,
    permit: OwnedSemaphorePermit,
}

enum Transformed {
    Flat(FlatRecord),
    Binary(HttpResponseParam),
}

impl Transformed {
    fn encode(&self) -> Result<Vec<u8>, PublishError> {
        match self {
            Transformed::Flat(record) => record
                .to_json_bytes()
                .map_err(|e| PublishError::Encode(e.to_string())),
            Transformed::Binary(record) => Ok(record.encode_to_vec()),
        }
    }
}

/// Body of a pipeline task, shared by every worker.
struct Processor {
    sink: Arc<dyn RecordSink>,
    metrics: Arc<Metrics>,
    cursor: Arc<CommitCursor>,
    output_format: OutputFormat,
    publish_timeout: Duration,
    default_client_id: String,
}

impl Processor {
    async fn process(&self, record: InboundRecord) {
        let started = Instant::now();
        let client_id = resolve_client_id(&record, &self.default_client_id);
        info!(client_id = %client_id, position = %record.position, "processing message");

        self.metrics.increment_received();
        self.transform_and_publish(&record, &client_id, started).await;
        self.cursor.record_finished(&record.position);
    }

    async fn transform_and_publish(&self, record: &InboundRecord, client_id: &str, started: Instant) {
        let transformed = match self.output_format {
            OutputFormat::Json => to_flat(&record.payload, client_id).map(Transformed::Flat),
            OutputFormat::Protobuf => to_binary(&record.payload, client_id).map(Transformed::Binary),
        };
        let transformed = match transformed {
            Ok(transformed) => transformed,
            Err(e) => {
                error!(error = %e, position = %record.position, "transformation failed");
                self.metrics.increment_failed();
                return;
            }
        };
        self.metrics.increment_transformed();

        let payload = match transformed.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, position = %record.position, "failed to encode");
                self.metrics.increment_failed();
                return;
            }
        };

        let outbound = OutboundRecord {
            key: client_id.to_string(),
            payload,
            headers: vec![
                (CLIENT_ID_HEADER.to_string(), client_id.to_string()),
                (TRANSFORMED_AT_HEADER.to_string(), Utc::now().to_rfc3339()),
            ],
        };

        match self.sink.publish(outbound, self.publish_timeout).await {
            Ok(delivery) => {
                self.metrics.increment_published();
                self.metrics.add_processing_time(started.elapsed());
                info!(
                    client_id,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "published"
                );
                debug!(client_id, elapsed = ?started.elapsed(), "message processed");
            }
            Err(e) => {
                error!(error = %e, client_id, "failed to publish");
                self.metrics.increment_failed();
            }
        }
    }
}

/// Pipeline between one source and one sink.
pub struct Pipeline {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn RecordSink>,
    settings: PipelineSettings,
    metrics: Arc<Metrics>,
    cursor: Arc<CommitCursor>,
    state: Arc<watch::Sender<PipelineState>>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn RecordSink>,
        settings: PipelineSettings,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Created);
        Self {
            source,
            sink,
            cursor: Arc::new(CommitCursor::new(settings.commit_policy)),
            settings,
            metrics: Arc::new(Metrics::new()),
            state: Arc::new(state),
        }
    }

    /// Counters shared by every task of this pipeline.
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Receiver notified on every lifecycle transition.
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: PipelineState) {
        self.state.send_replace(state);
    }

    /// Subscribes and spawns the dispatcher, workers, commit timer and
    /// reporter. Must be called from within a Tokio runtime.
    ///
    /// A subscription failure leaves the pipeline in `Created`.
    pub fn start(&self) -> Result<PipelineHandle, BridgeError> {
        if self.state() != PipelineState::Created {
            return Err(BridgeError::Startup(format!(
                "pipeline cannot start from state {:?}",
                self.state()
            )));
        }

        self.source.subscribe()?;
        self.set_state(PipelineState::Subscribed);

        let capacity = self.settings.max_concurrent.max(1);
        let budget = Arc::new(Semaphore::new(capacity));
        let cancel = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel::<Job>(capacity);
        let queue_rx = Arc::new(AsyncMutex::new(queue_rx));

        let processor = Arc::new(Processor {
            sink: Arc::clone(&self.sink),
            metrics: Arc::clone(&self.metrics),
            cursor: Arc::clone(&self.cursor),
            output_format: self.settings.output_format,
            publish_timeout: self.settings.publish_timeout,
            default_client_id: self.settings.default_client_id.clone(),
        });

        let mut tasks = Vec::with_capacity(capacity + 3);
        tasks.push((
            "dispatcher",
            tokio::spawn(dispatch_loop(
                Arc::clone(&self.source),
                Arc::clone(&self.cursor),
                Arc::clone(&budget),
                queue_tx,
                self.settings.fetch_timeout,
                cancel.clone(),
            )),
        ));
        for id in 0..capacity {
            tasks.push((
                "worker",
                tokio::spawn(worker_loop(id, Arc::clone(&queue_rx), Arc::clone(&processor))),
            ));
        }
        tasks.push((
            "committer",
            tokio::spawn(commit_loop(
                Arc::clone(&self.source),
                Arc::clone(&self.cursor),
                self.settings.commit_interval,
                cancel.clone(),
            )),
        ));
        tasks.push((
            "reporter",
            tokio::spawn(report_loop(
                Arc::clone(&self.metrics),
                self.settings.metrics_interval,
                cancel.clone(),
            )),
        ));

        self.set_state(PipelineState::Running);
        info!(
            workers = capacity,
            format = ?self.settings.output_format,
            commit_policy = ?self.settings.commit_policy,
            "pipeline running"
        );

        Ok(PipelineHandle {
            cancel,
            budget,
            capacity,
            tasks,
            state: Arc::clone(&self.state),
        })
    }
}

/// Outcome of draining a running pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every task finished before the deadline.
    Completed,
    /// The deadline passed; `in_flight` admitted records were abandoned.
    DeadlineExceeded { in_flight: usize },
}

/// Tasks of a started pipeline.
pub struct PipelineHandle {
    cancel: CancellationToken,
    budget: Arc<Semaphore>,
    capacity: usize,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    state: Arc<watch::Sender<PipelineState>>,
}

impl PipelineHandle {
    /// Records currently holding a unit of the concurrency budget.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.budget.available_permits()
    }

    /// Stops fetching and committing, then waits up to `deadline` for the
    /// workers to finish what was already admitted. The pipeline is
    /// `Stopped` once this returns.
    ///
    /// Admitted records are never cancelled. Past the deadline the remaining
    /// tasks are detached and keep running on their own.
    pub async fn drain(self, deadline: Duration) -> DrainOutcome {
        self.state.send_replace(PipelineState::Draining);
        self.cancel.cancel();

        let tasks = self.tasks;
        let join_all = async move {
            for (name, handle) in tasks {
                if let Err(e) = handle.await {
                    error!(task = name, error = %e, "pipeline task failed");
                }
            }
        };

        let outcome = match tokio::time::timeout(deadline, join_all).await {
            Ok(()) => {
                info!("all pipeline tasks stopped");
                DrainOutcome::Completed
            }
            Err(_) => {
                let in_flight = self.capacity - self.budget.available_permits();
                warn!(in_flight, ?deadline, "shutdown deadline exceeded");
                DrainOutcome::DeadlineExceeded { in_flight }
            }
        };
        self.state.send_replace(PipelineState::Stopped);
        outcome
    }
}

async fn dispatch_loop(
    source: Arc<dyn RecordSource>,
    cursor: Arc<CommitCursor>,
    budget: Arc<Semaphore>,
    queue: mpsc::Sender<Job>,
    fetch_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            fetched = source.fetch(fetch_timeout) => fetched,
        };

        let record = match fetched {
            Ok(record) => record,
            Err(FetchError::Timeout) => continue,
            Err(e) => {
                error!(error = %e, "consumer error");
                continue;
            }
        };
        info!(
            position = %record.position,
            size = record.payload.len(),
            "message received"
        );
        debug!(content = %String::from_utf8_lossy(&record.payload), "message content");

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(position = %record.position, "stopped before dispatch, record not admitted");
                break;
            }
            permit = Arc::clone(&budget).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        cursor.record_fetched(&record.position);
        if queue.send(Job { record, permit }).await.is_err() {
            error!("worker pool is gone, stopping dispatcher");
            break;
        }
    }
    info!("message processing stopped");
}

async fn worker_loop(id: usize, queue: Arc<AsyncMutex<mpsc::Receiver<Job>>>, processor: Arc<Processor>) {
    loop {
        let job = queue.lock().await.recv().await;
        let Some(Job { record, permit }) = job else {
            break;
        };
        processor.process(record).await;
        drop(permit);
    }
    debug!(worker = id, "worker stopped");
}

async fn commit_loop(
    source: Arc<dyn RecordSource>,
    cursor: Arc<CommitCursor>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => commit_once(source.as_ref(), &cursor).await,
        }
    }
    debug!("commit timer stopped");
}

/// Commits whatever the cursor allows. Failures are logged, never raised;
/// the cursor only moves on a confirmed commit, so the next tick retries.
pub(crate) async fn commit_once(source: &dyn RecordSource, cursor: &CommitCursor) {
    let positions = cursor.committable();
    if positions.is_empty() {
        debug!("no committable position yet");
        return;
    }

    match source.commit(&positions).await {
        Ok(()) => {
            cursor.mark_committed(&positions);
            debug!(?positions, "committed");
        }
        Err(CommitError::NoOffset) => debug!("no offset to commit"),
        Err(e) => warn!(error = %e, "commit failed"),
    }
}

async fn report_loop(metrics: Arc<Metrics>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => metrics.snapshot().log_report(),
        }
    }
}
