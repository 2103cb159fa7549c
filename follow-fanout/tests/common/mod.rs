#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common_kafka::memory::MemoryBus;
use common_kafka::transport::Publisher;
use common_redis::{Client, MockRedisClient};
use follow_fanout::app_context::AppContext;
use follow_fanout::cache::Caches;
use follow_fanout::config::Config;
use follow_fanout::server::serve;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub static DEFAULT_CONFIG: Lazy<Config> = Lazy::new(|| {
    let mut config = Config::from_defaults().expect("defaults must parse");
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.export_prometheus = false;
    config.cache_write_max_attempts = 2;
    config.cache_write_retry_backoff_ms = 1;
    config.redelivery_backoff_ms = 10;
    config.seed_timeout_secs = 5;
    config
});

/// The whole service on an ephemeral port, wired to an in-memory bus and caches.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub config: Config,
    pub bus: MemoryBus,
    pub data: MockRedisClient,
    pub html: MockRedisClient,
    shutdown: CancellationToken,
}

impl ServerHandle {
    pub async fn new() -> Self {
        Self::for_config(DEFAULT_CONFIG.clone()).await
    }

    pub async fn for_config(config: Config) -> Self {
        let data = MockRedisClient::new();
        let html = MockRedisClient::new();
        let caches = Caches::new(Arc::new(data.clone()), Arc::new(html.clone()));
        let context = Arc::new(AppContext::with_caches(config.clone(), caches));

        let bus = MemoryBus::new();
        let follows = bus.subscribe(&config.follow_topic);
        let tweets = bus.subscribe(&config.tweet_topic);
        let publisher: Arc<dyn Publisher> = Arc::new(bus.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            serve(context, follows, tweets, publisher, listener, token)
                .await
                .expect("failed to serve")
        });

        Self {
            addr,
            config,
            bus,
            data,
            html,
            shutdown,
        }
    }

    pub fn send_follow(&self, event: Value) {
        self.bus
            .send_json(&self.config.follow_topic, &event)
            .unwrap();
    }

    pub fn send_tweet(&self, event: Value) {
        self.bus.send_json(&self.config.tweet_topic, &event).unwrap();
    }

    pub fn pop_fanout_data(&self) -> Option<Value> {
        self.pop_json(&self.config.fanout_data_topic)
    }

    pub fn pop_fanout_html(&self) -> Option<Value> {
        self.pop_json(&self.config.fanout_html_topic)
    }

    fn pop_json(&self, topic: &str) -> Option<Value> {
        self.bus
            .try_pop(topic)
            .map(|payload| serde_json::from_slice(&payload).unwrap())
    }

    pub async fn seed(&self, cache: &str, csv_url: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{}/seed/{}", self.addr, cache))
            .form(&[("csv_url", csv_url)])
            .send()
            .await
            .unwrap()
    }

    /// Empty both caches and drop any injected failures, for a test with several phases.
    pub async fn flush_caches(&self) {
        for cache in [&self.data, &self.html] {
            cache.clear_failures();
            cache.flushdb().await.unwrap();
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::get(format!("http://{}{}", self.addr, path))
            .await
            .unwrap()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel()
    }
}

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}_{}", prefix, suffix)
}

/// A CSV file in the temp dir, removed on drop.
pub struct TempCsv {
    pub path: PathBuf,
}

impl TempCsv {
    pub fn new(contents: &str) -> Self {
        let path = std::env::temp_dir().join(format!("{}.csv", random_string("seed", 12)));
        std::fs::write(&path, contents).unwrap();
        Self { path }
    }

    pub fn location(&self) -> &str {
        self.path.to_str().unwrap()
    }
}

impl Drop for TempCsv {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            eprintln!("failed to remove {:?}: {}", self.path, e);
        }
    }
}

pub async fn assert_or_retry<F>(check: F)
where
    F: Fn() -> bool,
{
    assert_or_retry_for_duration(check, Duration::from_secs(5)).await
}

pub async fn assert_or_retry_for_duration<F>(check: F, timeout: Duration)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check())
}
