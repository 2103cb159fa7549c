use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use metrics::counter;
use tracing::{info, instrument, warn};

use crate::api::{SeedError, SeedRequest};
use crate::app_context::AppContext;
use crate::cache::CacheKind;
use crate::metrics_consts::SEED_REQUESTS;
use crate::seed::SeedReport;

/// `POST /seed/data`, replaces id lists.
pub async fn data(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SeedReport>, SeedError> {
    seed(&context, CacheKind::Data, &headers, &body).await
}

/// `POST /seed/html`, replaces rendered lists.
pub async fn html(
    State(context): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SeedReport>, SeedError> {
    seed(&context, CacheKind::Html, &headers, &body).await
}

#[instrument(skip_all, fields(cache = kind.as_str()))]
async fn seed(
    context: &AppContext,
    kind: CacheKind,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<SeedReport>, SeedError> {
    let request = SeedRequest::from_body(headers, body)?;
    info!(csv_url = %request.csv_url, "seeding cache");

    let result = context.seeder.seed_from(kind, &request.csv_url).await;
    let status = match &result {
        Ok(_) => "ok",
        Err(e) => {
            warn!("seed failed: {}", e);
            "error"
        }
    };
    counter!(SEED_REQUESTS, "cache" => kind.as_str(), "status" => status).increment(1);

    result.map(Json)
}
