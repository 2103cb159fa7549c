use common_kafka::transport::PublishError;
use common_redis::CustomRedisError;
use thiserror::Error;

/// Why an event was not fully handled. The consumer loop settles the message
/// according to `is_retryable`.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[source] CustomRedisError),
    #[error("failed to publish to {topic}: {error}")]
    Publish {
        topic: String,
        #[source]
        error: PublishError,
    },
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{} cache writes failed after others succeeded, keys need repair: {}", .repair_keys.len(), .repair_keys.join(", "))]
    PartiallyApplied { repair_keys: Vec<String> },
}

impl ProcessError {
    /// Retryable errors leave the message to be delivered again. Everything else is
    /// settled, a redelivery would fail the same way or duplicate writes.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::CacheUnavailable(_) => true,
            ProcessError::Publish { error, .. } => {
                !matches!(error, PublishError::MessageTooLarge(_))
            }
            ProcessError::InvalidEvent(_)
            | ProcessError::Serialization(_)
            | ProcessError::PartiallyApplied { .. } => false,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ProcessError::InvalidEvent(_) => "invalid_event",
            ProcessError::CacheUnavailable(_) => "cache_unavailable",
            ProcessError::Publish { .. } => "publish_failed",
            ProcessError::Serialization(_) => "serialization",
            ProcessError::PartiallyApplied { .. } => "partially_applied",
        }
    }
}
