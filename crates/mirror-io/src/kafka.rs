//! rdkafka implementations of the stream traits.

use async_trait::async_trait;
use mirror_core::{
    BridgeError, CommitError, Delivery, EndpointConfig, FetchError, InboundRecord,
    OutboundRecord, Position, PublishError, RecordSink, RecordSource,
};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message as KafkaMessage, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

const PRODUCER_CONNECT_ATTEMPTS: u32 = 5;
const PRODUCER_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Connection settings shared by the consumer and the producer.
fn client_config(endpoint: &EndpointConfig, role: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &endpoint.brokers)
        .set("socket.keepalive.enable", "true")
        .set("socket.timeout.ms", "60000")
        .set("api.version.request.timeout.ms", "30000")
        .set("reconnect.backoff.ms", "100")
        .set("reconnect.backoff.max.ms", "10000")
        .set("metadata.max.age.ms", "300000");

    let sasl = &endpoint.sasl;
    if sasl.enabled {
        config
            .set("security.protocol", &sasl.security_protocol)
            .set("sasl.mechanism", &sasl.mechanism)
            .set("sasl.username", &sasl.username)
            .set("sasl.password", &sasl.password);
        info!(
            role,
            protocol = %sasl.security_protocol,
            mechanism = %sasl.mechanism,
            username = %sasl.username,
            "SASL enabled"
        );
    } else {
        warn!(role, brokers = %endpoint.brokers, "SASL disabled");
    }
    config
}

/// Source stream backed by a Kafka consumer group.
///
/// Auto-commit is off; positions are committed explicitly by the pipeline.
/// The consumer is dropped on [`RecordSource::close`]; a fetch or commit
/// already in progress keeps it alive until it returns.
pub struct KafkaRecordSource {
    consumer: Mutex<Option<Arc<StreamConsumer>>>,
    topic: String,
}

impl KafkaRecordSource {
    pub fn new(endpoint: &EndpointConfig, group_id: &str) -> Result<Self, BridgeError> {
        let consumer: StreamConsumer = client_config(endpoint, "consumer")
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BridgeError::Startup(format!("failed to create consumer: {e}")))?;

        info!(brokers = %endpoint.brokers, group = group_id, "consumer created");
        Ok(Self {
            consumer: Mutex::new(Some(Arc::new(consumer))),
            topic: endpoint.topic.clone(),
        })
    }

    fn consumer(&self) -> Option<Arc<StreamConsumer>> {
        self.consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.unwrap_or_default().to_vec()))
                .collect()
        })
        .unwrap_or_default();

    InboundRecord {
        payload: message.payload().unwrap_or_default().to_vec(),
        headers,
        position: Position::new(message.topic(), message.partition(), message.offset()),
    }
}

fn to_partition_list(positions: &[Position]) -> Result<TopicPartitionList, CommitError> {
    let mut tpl = TopicPartitionList::new();
    for position in positions {
        // Kafka commits the next offset to read.
        tpl.add_partition_offset(
            &position.topic,
            position.partition,
            Offset::Offset(position.offset + 1),
        )
        .map_err(|e| CommitError::Failed(e.to_string()))?;
    }
    Ok(tpl)
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    fn subscribe(&self) -> Result<(), BridgeError> {
        let consumer = self
            .consumer()
            .ok_or_else(|| BridgeError::Startup("consumer is closed".to_string()))?;
        consumer.subscribe(&[self.topic.as_str()]).map_err(|e| {
            BridgeError::Startup(format!("failed to subscribe to {}: {e}", self.topic))
        })?;
        info!(topic = %self.topic, "subscribed");
        Ok(())
    }

    async fn fetch(&self, wait: Duration) -> Result<InboundRecord, FetchError> {
        let consumer = self
            .consumer()
            .ok_or_else(|| FetchError::Transport("consumer is closed".to_string()))?;
        match tokio::time::timeout(wait, consumer.recv()).await {
            Err(_) => Err(FetchError::Timeout),
            Ok(Err(e)) => Err(FetchError::Transport(e.to_string())),
            Ok(Ok(message)) => Ok(to_inbound(&message)),
        }
    }

    async fn commit(&self, positions: &[Position]) -> Result<(), CommitError> {
        if positions.is_empty() {
            return Err(CommitError::NoOffset);
        }
        let consumer = self
            .consumer()
            .ok_or_else(|| CommitError::Failed("consumer is closed".to_string()))?;
        let tpl = to_partition_list(positions)?;

        // A synchronous commit blocks until the broker answers.
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync))
            .await
            .map_err(|e| CommitError::Failed(e.to_string()))?
            .map_err(|e| match e {
                KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset) => CommitError::NoOffset,
                other => CommitError::Failed(other.to_string()),
            })
    }

    fn close(&self) {
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(consumer) = consumer {
            consumer.unsubscribe();
            info!(topic = %self.topic, "consumer closed");
        }
    }
}

/// Destination stream backed by a Kafka producer.
pub struct KafkaRecordSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaRecordSink {
    fn create(endpoint: &EndpointConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = client_config(endpoint, "producer")
            .set("acks", "all")
            .set("retries", "10")
            .set("max.in.flight.requests.per.connection", "5")
            .set("delivery.timeout.ms", "300000")
            .create()?;

        Ok(Self {
            producer,
            topic: endpoint.topic.clone(),
        })
    }

    /// Creates the producer, retrying with a growing delay.
    pub async fn connect(endpoint: &EndpointConfig) -> Result<Self, BridgeError> {
        let mut delay = PRODUCER_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match Self::create(endpoint) {
                Ok(sink) => {
                    info!(brokers = %endpoint.brokers, "producer connected");
                    return Ok(sink);
                }
                Err(e) if attempt < PRODUCER_CONNECT_ATTEMPTS => {
                    warn!(
                        "producer connection attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, PRODUCER_CONNECT_ATTEMPTS, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(1.5);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(BridgeError::Startup(format!(
                        "failed to create producer after {attempt} attempts: {e}"
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl RecordSink for KafkaRecordSink {
    async fn publish(
        &self,
        record: OutboundRecord,
        confirm: Duration,
    ) -> Result<Delivery, PublishError> {
        let headers = record
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_bytes()),
                })
            });

        let message = FutureRecord::to(&self.topic)
            .key(&record.key)
            .payload(&record.payload)
            .headers(headers);

        match tokio::time::timeout(confirm, self.producer.send(message, Duration::ZERO)).await {
            Err(_) => Err(PublishError::ConfirmTimeout {
                topic: self.topic.clone(),
                timeout: confirm,
            }),
            Ok(Err((e, _))) => Err(PublishError::Produce {
                topic: self.topic.clone(),
                reason: e.to_string(),
            }),
            Ok(Ok((partition, offset))) => Ok(Delivery { partition, offset }),
        }
    }

    fn close(&self, timeout: Duration) {
        if let Err(e) = self.producer.flush(timeout) {
            warn!("error flushing producer: {:?}", e);
        }
        info!(topic = %self.topic, "producer closed");
    }
}
