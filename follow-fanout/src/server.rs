use std::sync::Arc;
use std::time::Duration;

use common_kafka::transport::{Publisher, Subscription};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::app_context::AppContext;
use crate::consumer::run_consumer;
use crate::router::router;
use crate::types::{FollowEvent, TweetEvent};

/// A consumer loop is stalled if it has not reported for this long.
const LOOP_LIVENESS_DEADLINE: Duration = Duration::from_secs(30);

/// Run both consumer loops and the HTTP server until `shutdown` fires, then wait
/// for the loops to finish their in-flight message.
pub async fn serve<F, T>(
    context: Arc<AppContext>,
    follows: F,
    tweets: T,
    publisher: Arc<dyn Publisher>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error>
where
    F: Subscription<FollowEvent> + 'static,
    T: Subscription<TweetEvent> + 'static,
{
    let follow_liveness = context
        .liveness
        .register("follow_consumer".to_owned(), LOOP_LIVENESS_DEADLINE)
        .await;
    let tweet_liveness = context
        .liveness
        .register("tweet_consumer".to_owned(), LOOP_LIVENESS_DEADLINE)
        .await;
    let redelivery_backoff = context.config.redelivery_backoff();

    let follow_loop = tokio::spawn(run_consumer(
        "follow",
        follows,
        context.follow_processor(),
        follow_liveness,
        redelivery_backoff,
        shutdown.clone(),
    ));
    let fanout_loop = tokio::spawn(run_consumer(
        "fanout",
        tweets,
        context.fanout_processor(publisher),
        tweet_liveness,
        redelivery_backoff,
        shutdown.clone(),
    ));

    let app = router(context.clone(), context.config.export_prometheus);
    info!("listening on {:?}", listener.local_addr()?);
    let served = common_metrics::serve(app, listener, shutdown.clone().cancelled_owned()).await;
    // Whatever ended the server ends the loops too
    shutdown.cancel();

    for (name, handle) in [("follow", follow_loop), ("fanout", fanout_loop)] {
        if let Err(e) = handle.await {
            error!("{} consumer loop failed: {}", name, e);
        }
    }
    served
}
