use std::sync::Arc;

use common_kafka::transport::Publisher;
use common_redis::{CustomRedisError, RedisClient};
use health::HealthRegistry;
use tracing::info;

use crate::cache::Caches;
use crate::config::Config;
use crate::fanout::FanoutProcessor;
use crate::follow::FollowProcessor;
use crate::seed::CacheSeeder;

pub struct AppContext {
    pub config: Config,
    pub liveness: HealthRegistry,
    pub caches: Caches,
    pub seeder: CacheSeeder,
}

impl AppContext {
    /// Connects to both caches. Must run inside a tokio runtime.
    pub async fn new(config: Config) -> Result<Self, CustomRedisError> {
        let data = connect(&config, &config.data_redis_url).await?;
        let html = connect(&config, &config.html_redis_url).await?;
        let caches = Caches::new(Arc::new(data), Arc::new(html));
        Ok(Self::with_caches(config, caches))
    }

    pub fn with_caches(config: Config, caches: Caches) -> Self {
        let seeder = CacheSeeder::new(caches.clone(), config.seed_timeout());
        Self {
            liveness: HealthRegistry::new("liveness"),
            seeder,
            caches,
            config,
        }
    }

    pub fn follow_processor(&self) -> FollowProcessor {
        FollowProcessor::new(
            self.caches.clone(),
            self.config.retry_policy(),
            self.config.follow_dedupe,
        )
    }

    pub fn fanout_processor(&self, publisher: Arc<dyn Publisher>) -> FanoutProcessor {
        FanoutProcessor::new(
            self.caches.data().clone(),
            self.config.retry_policy(),
            publisher,
            self.config.fanout_topics(),
        )
    }
}

async fn connect(config: &Config, url: &str) -> Result<RedisClient, CustomRedisError> {
    let client = RedisClient::with_config(
        url.to_owned(),
        Some(config.redis_response_timeout()),
        Some(config.redis_connection_timeout()),
    )
    .await?;
    info!("connected to redis at {}", url);
    Ok(client)
}
