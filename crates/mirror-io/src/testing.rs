//! In-memory sources and sinks for pipeline and service tests.

use crate::pipeline::PipelineSettings;
use async_trait::async_trait;
use mirror_core::{
    BridgeError, CommitError, CommitPolicy, Delivery, FetchError, InboundRecord, OutboundRecord,
    OutputFormat, Position, PublishError, RecordSink, RecordSource,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const TOPIC: &str = "mirrored";

pub fn sample_payload() -> Vec<u8> {
    json!({
        "request": {
            "url": "https://api.x.com/v1/users?id=5",
            "method": "GET",
            "headers": "{\"Accept\":\"application/json\"}",
            "body": ""
        },
        "response": {
            "headers": "{\"Content-Type\":[\"application/json\"]}",
            "body": "{\"id\":5}",
            "statusCode": 201
        },
        "info": {
            "ip": "1.2.3.4",
            "dateTime": 1_700_000_000_123_i64,
            "responseTime": 12
        }
    })
    .to_string()
    .into_bytes()
}

pub fn record(offset: i64, payload: &[u8]) -> InboundRecord {
    InboundRecord::new(payload.to_vec(), Position::new(TOPIC, 0, offset))
}

pub fn settings(max_concurrent: usize) -> PipelineSettings {
    PipelineSettings {
        max_concurrent,
        fetch_timeout: Duration::from_millis(20),
        commit_interval: Duration::from_secs(3600),
        publish_timeout: Duration::from_secs(1),
        metrics_interval: Duration::from_secs(3600),
        output_format: OutputFormat::Json,
        commit_policy: CommitPolicy::Fetched,
        default_client_id: "acct-default".to_string(),
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
pub struct FakeSource {
    records: Mutex<VecDeque<InboundRecord>>,
    commits: Mutex<Vec<Vec<Position>>>,
    failing_fetches: AtomicUsize,
    failing_commits: AtomicUsize,
    subscribed: AtomicBool,
    closed: AtomicBool,
}

impl FakeSource {
    pub fn with_records(records: impl IntoIterator<Item = InboundRecord>) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(records.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// Rejects the next `count` commits; rejected commits are not recorded.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn commits(&self) -> Vec<Vec<Position>> {
        self.commits.lock().unwrap().clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    fn subscribe(&self) -> Result<(), BridgeError> {
        self.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, wait: Duration) -> Result<InboundRecord, FetchError> {
        let failing = self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(FetchError::Transport("broker unreachable".to_string()));
        }

        let next = self.records.lock().unwrap().pop_front();
        match next {
            Some(record) => Ok(record),
            None => {
                tokio::time::sleep(wait).await;
                Err(FetchError::Timeout)
            }
        }
    }

    async fn commit(&self, positions: &[Position]) -> Result<(), CommitError> {
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(CommitError::Failed("coordinator rejected commit".to_string()));
        }
        self.commits.lock().unwrap().push(positions.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Sink that records what it publishes. A gated sink holds every publish
/// until [`FakeSink::release`] lets it through.
#[derive(Default)]
pub struct FakeSink {
    gate: Option<Semaphore>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    next_offset: AtomicI64,
    published: Mutex<Vec<OutboundRecord>>,
    closed: AtomicBool,
}

impl FakeSink {
    pub fn open() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<OutboundRecord> {
        self.published.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSink for FakeSink {
    async fn publish(
        &self,
        record: OutboundRecord,
        _confirm: Duration,
    ) -> Result<Delivery, PublishError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        self.published.lock().unwrap().push(record);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Delivery {
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn close(&self, _timeout: Duration) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
