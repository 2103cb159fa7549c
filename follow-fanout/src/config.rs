use std::time::Duration;

use common_kafka::config::{ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

use crate::fanout::FanoutTopics;
use crate::retry::RetryPolicy;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "0.0.0.0")]
    pub host: String,

    #[envconfig(default = "3310")]
    pub port: u16,

    // Id lists, <user>:follower_ids and <user>:followee_ids
    #[envconfig(default = "redis://localhost:6379/0")]
    pub data_redis_url: String,

    // Rendered lists, <user>:followers and <user>:followees
    #[envconfig(default = "redis://localhost:6379/1")]
    pub html_redis_url: String,

    #[envconfig(default = "250")]
    pub redis_response_timeout_ms: u64,

    #[envconfig(default = "5000")]
    pub redis_connection_timeout_ms: u64,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "new_follow.data")]
    pub follow_topic: String,

    #[envconfig(default = "new_tweet.follow.tweet_data")]
    pub tweet_topic: String,

    #[envconfig(default = "new_tweet.timeline.follower_ids_data")]
    pub fanout_data_topic: String,

    #[envconfig(default = "new_tweet.timeline.follower_ids_html")]
    pub fanout_html_topic: String,

    #[envconfig(default = "follow-fanout-follows")]
    pub follow_consumer_group: String,

    #[envconfig(default = "follow-fanout-tweets")]
    pub tweet_consumer_group: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Skip a follow whose id is already in the list instead of appending it again
    #[envconfig(default = "false")]
    pub follow_dedupe: bool,

    #[envconfig(default = "3")]
    pub cache_write_max_attempts: u32,

    #[envconfig(default = "50")]
    pub cache_write_retry_backoff_ms: u64,

    // Pause after a retryable failure, before the message is received again
    #[envconfig(default = "500")]
    pub redelivery_backoff_ms: u64,

    #[envconfig(default = "60")]
    pub seed_timeout_secs: u64,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "false")]
    pub log_json: bool,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Defaults only, ignoring the environment.
    pub fn from_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_hashmap(&Default::default())
    }

    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn follow_consumer(&self) -> ConsumerConfig {
        ConsumerConfig::new(
            &self.follow_consumer_group,
            &self.follow_topic,
            &self.kafka_consumer_offset_reset,
        )
    }

    pub fn tweet_consumer(&self) -> ConsumerConfig {
        ConsumerConfig::new(
            &self.tweet_consumer_group,
            &self.tweet_topic,
            &self.kafka_consumer_offset_reset,
        )
    }

    pub fn fanout_topics(&self) -> FanoutTopics {
        FanoutTopics {
            data: self.fanout_data_topic.clone(),
            html: self.fanout_html_topic.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.cache_write_max_attempts,
            Duration::from_millis(self.cache_write_retry_backoff_ms),
        )
    }

    pub fn redelivery_backoff(&self) -> Duration {
        Duration::from_millis(self.redelivery_backoff_ms)
    }

    pub fn seed_timeout(&self) -> Duration {
        Duration::from_secs(self.seed_timeout_secs)
    }

    pub fn redis_response_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_response_timeout_ms)
    }

    pub fn redis_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_connection_timeout_ms)
    }
}
