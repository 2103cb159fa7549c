use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use redis::ErrorKind as RedisErrorKind;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl CustomRedisError {
    /// Build a Redis error from an ErrorKind, mostly for tests and mocks
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// `true` for configuration and permanent failures, `false` for transient
    /// network/connection issues that may resolve on retry.
    pub fn is_unrecoverable_error(&self) -> bool {
        match self {
            CustomRedisError::Timeout => false,
            CustomRedisError::InvalidConfiguration(_) => true,
            CustomRedisError::Redis(err) => {
                matches!(
                    err.kind(),
                    redis::ErrorKind::InvalidClientConfig | redis::ErrorKind::AuthenticationFailed
                ) || err.is_unrecoverable_error()
            }
        }
    }
}

/// Keyed ordered-list store. Every operation is atomic for a single key; nothing
/// spans keys or clients.
#[async_trait]
pub trait Client {
    /// The whole list at `k`. A missing key reads as an empty list.
    async fn lrange(&self, k: String) -> Result<Vec<String>, CustomRedisError>;

    /// Append `v` at the tail of `k`, creating the list if needed.
    async fn rpush(&self, k: String, v: String) -> Result<(), CustomRedisError>;

    /// Remove up to `count` occurrences of `v` scanning from the head, 0 removes all.
    /// Returns how many were removed.
    async fn lrem(&self, k: String, count: usize, v: String) -> Result<usize, CustomRedisError>;

    /// Set `k` to exactly `values`, in order. An empty `values` leaves `k` absent.
    async fn replace_list(&self, k: String, values: Vec<String>) -> Result<(), CustomRedisError>;

    async fn del(&self, k: String) -> Result<(), CustomRedisError>;

    /// Drop every key of the selected database.
    async fn flushdb(&self) -> Result<(), CustomRedisError>;
}

mod client;
mod mock;

pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient};
