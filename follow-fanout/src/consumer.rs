use std::time::Duration;

use async_trait::async_trait;
use common_kafka::transport::{Acknowledge, RecvErr, Subscription};
use health::HealthHandle;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ProcessError;
use crate::metrics_consts::{
    EMPTY_EVENTS, EVENTS_DROPPED, EVENTS_PROCESSED, EVENTS_RECEIVED, EVENTS_RETRIED,
    EVENT_PARSE_ERROR, EVENT_PROCESS_TIME, OFFSET_ERRORS, RECV_ERRORS,
};

/// How long the loop waits for a message before reporting itself alive anyway.
pub const IDLE_HEARTBEAT: Duration = Duration::from_secs(5);

/// Handles one decoded event of a consumer loop.
#[async_trait]
pub trait EventHandler<T>: Send + Sync {
    async fn handle(&self, event: T) -> Result<(), ProcessError>;
}

/// Receive, handle and settle events from `subscription` until `shutdown` fires.
///
/// One message is handled at a time, so events are applied in delivery order.
/// A handled message is acked. A retryable failure rewinds the subscription to
/// the message and waits `redelivery_backoff` before receiving again. Anything
/// else is logged and acked, the event is dropped.
pub async fn run_consumer<T, S, H>(
    name: &'static str,
    subscription: S,
    handler: H,
    liveness: HealthHandle,
    redelivery_backoff: Duration,
    shutdown: CancellationToken,
) where
    T: DeserializeOwned + Send + 'static,
    S: Subscription<T>,
    H: EventHandler<T>,
{
    info!(consumer = name, topic = subscription.topic(), "consumer loop started");

    loop {
        liveness.report_healthy().await;

        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = tokio::time::timeout(IDLE_HEARTBEAT, subscription.recv()) => received,
        };

        let (event, ack) = match received {
            Err(_idle) => continue,
            Ok(Ok(r)) => r,
            Ok(Err(RecvErr::Empty)) => {
                warn!(consumer = name, "received empty event");
                metrics::counter!(EMPTY_EVENTS, "consumer" => name).increment(1);
                continue;
            }
            Ok(Err(RecvErr::Serde(e))) => {
                warn!(consumer = name, "failed to parse event: {:?}", e);
                metrics::counter!(EVENT_PARSE_ERROR, "consumer" => name).increment(1);
                continue;
            }
            Ok(Err(RecvErr::Kafka(e))) => {
                error!(consumer = name, "failed to receive event: {:?}", e);
                metrics::counter!(RECV_ERRORS, "consumer" => name).increment(1);
                if pause(redelivery_backoff, &shutdown).await {
                    break;
                }
                continue;
            }
        };
        metrics::counter!(EVENTS_RECEIVED, "consumer" => name).increment(1);

        let timer = common_metrics::timing_guard(EVENT_PROCESS_TIME, &[]).label("consumer", name);
        let result = handler.handle(event).await;
        timer.label("outcome", if result.is_ok() { "ok" } else { "error" }).fin();

        match result {
            Ok(()) => {
                debug!(consumer = name, "event handled");
                metrics::counter!(EVENTS_PROCESSED, "consumer" => name).increment(1);
                settle(name, ack.ack());
            }
            Err(e) if e.is_retryable() => {
                warn!(consumer = name, "event will be redelivered: {}", e);
                metrics::counter!(EVENTS_RETRIED, "consumer" => name, "reason" => e.reason())
                    .increment(1);
                settle(name, ack.rewind());
                if pause(redelivery_backoff, &shutdown).await {
                    break;
                }
            }
            Err(e) => {
                error!(consumer = name, "dropping event: {}", e);
                metrics::counter!(EVENTS_DROPPED, "consumer" => name, "reason" => e.reason())
                    .increment(1);
                settle(name, ack.ack());
            }
        }
    }

    info!(consumer = name, "consumer loop stopped");
}

fn settle(name: &'static str, result: Result<(), common_kafka::transport::OffsetErr>) {
    if let Err(e) = result {
        error!(consumer = name, "failed to settle message: {}", e);
        metrics::counter!(OFFSET_ERRORS, "consumer" => name).increment(1);
    }
}

/// Sleep for `backoff`, returns true if shutdown fired in the meantime.
async fn pause(backoff: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(backoff) => false,
    }
}
