use std::future::ready;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};
use common_metrics::setup_metrics_routes;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::app_context::AppContext;
use crate::seed_endpoint;

// Seed bodies only carry the location of the rows
const SEED_BODY_LIMIT: usize = 64 * 1024;

async fn index() -> &'static str {
    "follow fanout"
}

pub fn router(context: Arc<AppContext>, metrics: bool) -> Router {
    let liveness = context.liveness.clone();

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .route("/seed/data", post(seed_endpoint::data))
        .route("/seed/html", post(seed_endpoint::html))
        .layer(DefaultBodyLimit::max(SEED_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(context);

    // The recorder is global, tests build many routers in one process
    if !metrics {
        return router;
    }
    match setup_metrics_routes(router.clone()) {
        Ok(router) => router,
        Err(e) => {
            warn!("failed to install metrics recorder, serving without /metrics: {}", e);
            router
        }
    }
}
