use async_trait::async_trait;
use rdkafka::error::KafkaError;
use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
    #[error("message too large for topic {0}")]
    MessageTooLarge(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Settles one received message.
pub trait Acknowledge: Send {
    /// The message was handled, it must not be delivered again.
    fn ack(self) -> Result<(), OffsetErr>;

    /// The message was not handled, the transport must deliver it again.
    fn rewind(self) -> Result<(), OffsetErr>;
}

/// A single-topic subscription decoding JSON messages into `T`.
///
/// Undecodable messages are settled by the subscription itself before the error is
/// returned, so a poison pill is never redelivered.
#[async_trait]
pub trait Subscription<T>: Send + Sync
where
    T: DeserializeOwned + Send + 'static,
{
    type Ack: Acknowledge;

    async fn recv(&self) -> Result<(T, Self::Ack), RecvErr>;

    fn topic(&self) -> &str;
}

/// Topic-addressed publishing, the write side of the bus.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns once the transport accepted the message.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), PublishError>;
}
