use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common_kafka::kafka_consumer::SingleTopicConsumer;
use common_kafka::kafka_producer::{create_kafka_producer, KafkaPublisher};
use follow_fanout::app_context::AppContext;
use follow_fanout::config::Config;
use follow_fanout::server::serve;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// librdkafka reports statistics every 10 seconds
const KAFKA_LIVENESS_DEADLINE: Duration = Duration::from_secs(30);

fn setup_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = if json {
        fmt::layer().json().with_filter(filter).boxed()
    } else {
        fmt::layer().with_target(true).with_filter(filter).boxed()
    };
    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown_signal() -> Result<(), std::io::Error> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_with_defaults().context("invalid configuration")?;
    setup_tracing(config.log_json);
    info!("Starting up...");

    let context = Arc::new(
        AppContext::new(config.clone())
            .await
            .context("failed to connect to redis")?,
    );

    let follow_kafka_liveness = context
        .liveness
        .register("rdkafka_follows".to_owned(), KAFKA_LIVENESS_DEADLINE)
        .await;
    let tweet_kafka_liveness = context
        .liveness
        .register("rdkafka_tweets".to_owned(), KAFKA_LIVENESS_DEADLINE)
        .await;
    let producer_liveness = context
        .liveness
        .register("rdkafka_producer".to_owned(), KAFKA_LIVENESS_DEADLINE)
        .await;

    let follows = SingleTopicConsumer::new(
        config.kafka.clone(),
        config.follow_consumer(),
        follow_kafka_liveness,
    )?;
    let tweets = SingleTopicConsumer::new(
        config.kafka.clone(),
        config.tweet_consumer(),
        tweet_kafka_liveness,
    )?;
    info!(
        "Subscribed to topics: {}, {}",
        config.follow_topic, config.tweet_topic
    );

    let producer = create_kafka_producer(&config.kafka, producer_liveness).await?;
    let publisher = Arc::new(KafkaPublisher::new(producer));

    let listener = tokio::net::TcpListener::bind(config.bind())
        .await
        .with_context(|| format!("could not bind {}", config.bind()))?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("failed to register signal handlers: {}", e);
        }
        on_signal.cancel();
    });

    serve(
        context,
        follows,
        tweets,
        publisher.clone(),
        listener,
        shutdown,
    )
    .await?;

    if let Err(e) = publisher.flush() {
        error!("failed to flush pending fanout messages: {}", e);
    }
    info!("Stopped");
    Ok(())
}
