use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::seed::RowFailure;

/// Body of a seed request, sent as a form or as JSON.
#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SeedRequest {
    pub csv_url: String,
}

impl SeedRequest {
    pub fn from_body(headers: &HeaderMap, body: &[u8]) -> Result<Self, SeedError> {
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        let request: SeedRequest = if is_json {
            serde_json::from_slice(body).map_err(|e| SeedError::RequestDecoding(e.to_string()))?
        } else {
            serde_urlencoded::from_bytes(body)
                .map_err(|e| SeedError::RequestDecoding(e.to_string()))?
        };

        if request.csv_url.trim().is_empty() {
            return Err(SeedError::MissingSource);
        }
        Ok(request)
    }
}

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("failed to decode request: {0}")]
    RequestDecoding(String),
    #[error("request holds no csv_url")]
    MissingSource,

    #[error("cannot read {location}: {reason}")]
    SourceUnreadable { location: String, reason: String },
    #[error("failed to fetch rows: {0}")]
    SourceFetch(String),
    #[error("failed to parse rows: {0}")]
    Csv(#[from] csv::Error),
    #[error("{} malformed rows, nothing was written", .0.len())]
    MalformedRows(Vec<RowFailure>),

    #[error("{} of {rows} rows could not be written", .failures.len())]
    RowsFailed {
        rows: usize,
        failures: Vec<RowFailure>,
    },
    #[error("seed did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SeedErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RowFailure>,
}

impl IntoResponse for SeedError {
    fn into_response(self) -> Response {
        let status = match self {
            SeedError::RequestDecoding(_)
            | SeedError::MissingSource
            | SeedError::SourceUnreadable { .. }
            | SeedError::Csv(_)
            | SeedError::MalformedRows(_) => StatusCode::BAD_REQUEST,

            SeedError::SourceFetch(_) => StatusCode::BAD_GATEWAY,
            SeedError::RowsFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SeedError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };

        let error = self.to_string();
        let failures = match self {
            SeedError::MalformedRows(failures) | SeedError::RowsFailed { failures, .. } => failures,
            _ => Vec::new(),
        };
        (status, Json(SeedErrorBody { error, failures })).into_response()
    }
}
