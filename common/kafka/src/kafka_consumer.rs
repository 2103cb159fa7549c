use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message, Offset as KafkaOffset,
};
use serde::de::DeserializeOwned;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;
use tracing::{debug, warn};

use crate::config::{ConsumerConfig, KafkaConfig};
use crate::kafka_producer::KafkaContext;
use crate::transport::{Acknowledge, OffsetErr, RecvErr, Subscription};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer<KafkaContext>,
    topic: String,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: KafkaConfig,
        consumer_config: ConsumerConfig,
        liveness: HealthHandle,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            );

        // Offsets are stored by hand once a message is handled, and committed in the background
        client_config
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "true");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka consumer configuration: {:?}", client_config);
        let consumer: StreamConsumer<KafkaContext> =
            client_config.create_with_context(KafkaContext::from(liveness))?;
        consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

        let inner = Inner {
            consumer,
            topic: consumer_config.kafka_consumer_topic,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub async fn json_recv<T>(&self) -> Result<(T, Offset), RecvErr>
    where
        T: DeserializeOwned,
    {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            // Poison pills are stored right away, nobody will ever handle them
            store_poison_pill(offset);
            return Err(RecvErr::Empty);
        };

        match serde_json::from_slice(payload) {
            Ok(p) => Ok((p, offset)),
            Err(e) => {
                store_poison_pill(offset);
                Err(RecvErr::Serde(e))
            }
        }
    }
}

fn store_poison_pill(offset: Offset) {
    if let Err(e) = offset.store() {
        warn!("failed to store offset of undecodable message: {}", e);
    }
}

#[async_trait]
impl<T> Subscription<T> for SingleTopicConsumer
where
    T: DeserializeOwned + Send + 'static,
{
    type Ack = Offset;

    async fn recv(&self) -> Result<(T, Offset), RecvErr> {
        self.json_recv().await
    }

    fn topic(&self) -> &str {
        &self.inner.topic
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }

    /// Seek the partition back to this message so the next fetch delivers it again.
    pub fn rewind(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        off_async_workers(|| {
            inner.consumer.seek(
                &inner.topic,
                self.partition,
                KafkaOffset::Offset(self.offset),
                SEEK_TIMEOUT,
            )
        })?;
        Ok(())
    }
}

/// Run a call that blocks on librdkafka. On a multi-threaded runtime the worker
/// hands its other tasks off first, elsewhere the call just runs in place.
fn off_async_workers<R>(call: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            task::block_in_place(call)
        }
        _ => call(),
    }
}

impl Acknowledge for Offset {
    fn ack(self) -> Result<(), OffsetErr> {
        self.store()
    }

    fn rewind(self) -> Result<(), OffsetErr> {
        Offset::rewind(self)
    }
}

#[cfg(test)]
mod tests {
    use health::HealthRegistry;
    use rdkafka::producer::FutureRecord;
    use serde_json::{json, Value};

    use super::*;
    use crate::test::{create_mock_kafka, mock_kafka_config};

    #[test]
    fn blocking_calls_run_in_place_without_a_runtime() {
        assert_eq!(off_async_workers(|| 7), 7);
    }

    #[tokio::test]
    async fn blocking_calls_run_in_place_on_a_current_thread_runtime() {
        assert_eq!(off_async_workers(|| 7), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_calls_leave_the_worker_on_a_multi_thread_runtime() {
        assert_eq!(off_async_workers(|| 7), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rewound_message_is_received_again() {
        let (cluster, producer) = create_mock_kafka().await;
        cluster
            .create_topic("follows", 1, 1)
            .expect("failed to create topic");
        producer
            .send(
                FutureRecord::to("follows")
                    .key("1")
                    .payload(r#"{"followee_id":1}"#),
                Duration::from_secs(5),
            )
            .await
            .map_err(|(err, _)| err)
            .expect("failed to produce");

        let registry = HealthRegistry::new("liveness");
        let liveness = registry
            .register("follows".to_string(), Duration::from_secs(30))
            .await;
        let consumer = SingleTopicConsumer::new(
            mock_kafka_config(cluster.bootstrap_servers()),
            ConsumerConfig::new("rewind-test", "follows", "earliest"),
            liveness,
        )
        .expect("failed to create consumer");

        let (first, offset): (Value, Offset) =
            tokio::time::timeout(Duration::from_secs(30), consumer.json_recv())
                .await
                .expect("nothing received")
                .expect("failed to receive");
        let position = offset.offset;
        offset.rewind().expect("failed to rewind");

        let (again, offset): (Value, Offset) =
            tokio::time::timeout(Duration::from_secs(30), consumer.json_recv())
                .await
                .expect("nothing received after rewind")
                .expect("failed to receive after rewind");
        assert_eq!(first, json!({"followee_id": 1}));
        assert_eq!(again, first);
        assert_eq!(offset.offset, position);
        offset.store().expect("failed to store offset");
    }
}
