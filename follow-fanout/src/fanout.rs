use std::sync::Arc;

use async_trait::async_trait;
use common_kafka::transport::Publisher;
use metrics::{counter, histogram};
use tracing::{info, instrument};

use crate::cache::{follower_ids_key, CacheClient};
use crate::consumer::EventHandler;
use crate::error::ProcessError;
use crate::metrics_consts::{FANOUT_PUBLISHED, FANOUT_RECIPIENTS};
use crate::retry::RetryPolicy;
use crate::types::{FanoutMessage, TweetEvent};

/// Output topics of the fanout, one per timeline cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutTopics {
    pub data: String,
    pub html: String,
}

/// Turns a new tweet into one follower list announcement per timeline cache.
pub struct FanoutProcessor {
    data_cache: CacheClient,
    retry: RetryPolicy,
    publisher: Arc<dyn Publisher>,
    topics: FanoutTopics,
}

impl FanoutProcessor {
    pub fn new(
        data_cache: CacheClient,
        retry: RetryPolicy,
        publisher: Arc<dyn Publisher>,
        topics: FanoutTopics,
    ) -> Self {
        Self {
            data_cache,
            retry,
            publisher,
            topics,
        }
    }

    /// Read the author's follower ids as they are right now and publish them to
    /// both topics. The payload is encoded once, so both topics carry the same
    /// bytes. An author with no followers still gets a message with an empty list.
    /// The follower read is retried like the follow side's cache writes, publishing
    /// is left to the producer's own retries.
    #[instrument(skip_all, fields(tweet_id = %tweet.tweet_id, author_id = %tweet.author_id))]
    pub async fn fanout(&self, tweet: &TweetEvent) -> Result<FanoutMessage, ProcessError> {
        let key = follower_ids_key(tweet.author_id);
        let follower_ids = self
            .retry
            .run("lrange", || self.data_cache.lrange(key.clone()))
            .await
            .map_err(ProcessError::CacheUnavailable)?;

        let message = FanoutMessage {
            tweet_id: tweet.tweet_id,
            follower_ids,
        };
        let payload = serde_json::to_vec(&message)?;
        let partition_key = tweet.tweet_id.to_string();

        for topic in [&self.topics.data, &self.topics.html] {
            self.publisher
                .publish(topic, Some(&partition_key), &payload)
                .await
                .map_err(|error| ProcessError::Publish {
                    topic: topic.clone(),
                    error,
                })?;
            counter!(FANOUT_PUBLISHED, "topic" => topic.clone()).increment(1);
        }

        histogram!(FANOUT_RECIPIENTS).record(message.follower_ids.len() as f64);
        Ok(message)
    }
}

#[async_trait]
impl EventHandler<TweetEvent> for FanoutProcessor {
    async fn handle(&self, event: TweetEvent) -> Result<(), ProcessError> {
        let message = self.fanout(&event).await?;
        info!(
            tweet_id = %event.tweet_id,
            recipients = message.follower_ids.len(),
            "tweet fanned out"
        );
        Ok(())
    }
}
