use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use crate::{Client, CustomRedisError};

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Connect without timeouts: commands block until redis answers.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Connect with optional response and connection timeouts. `None` means no timeout,
    /// `Some(Duration::ZERO)` is rejected as `InvalidConfiguration`.
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        if response_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis response timeout cannot be zero - use None for no timeout".to_string(),
            ));
        }
        if connection_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis connection timeout cannot be zero - use None for no timeout".to_string(),
            ));
        }

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn lrange(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let values: Vec<String> = conn.lrange(k, 0, -1).await?;
        Ok(values)
    }

    async fn rpush(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.rpush::<_, _, ()>(k, v).await?;
        Ok(())
    }

    async fn lrem(&self, k: String, count: usize, v: String) -> Result<usize, CustomRedisError> {
        let mut conn = self.connection.clone();
        let count = isize::try_from(count).unwrap_or(isize::MAX);
        let removed: usize = conn.lrem(k, count, v).await?;
        Ok(removed)
    }

    async fn replace_list(&self, k: String, values: Vec<String>) -> Result<(), CustomRedisError> {
        let mut pipe = redis::pipe();
        pipe.atomic().del(&k).ignore();
        // RPUSH without values is a syntax error, the DEL alone leaves the list empty
        if !values.is_empty() {
            pipe.rpush(&k, values).ignore();
        }

        let mut conn = self.connection.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(k).await?;
        Ok(())
    }

    async fn flushdb(&self) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
