use std::collections::HashMap;
use std::time::Duration;

use futures::{stream, StreamExt};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::api::SeedError;
use crate::cache::{CacheKind, Caches};
use crate::metrics_consts::{SEED_ROWS_APPLIED, SEED_ROWS_FAILED, SEED_TIME};
use crate::types::NumericId;

/// Rows written at the same time while applying a load.
const SEED_CONCURRENCY: usize = 16;

/// One CSV row: the list key, then its values in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRow {
    /// 1-based position in the source
    pub row: usize,
    pub key: String,
    pub values: Vec<String>,
}

/// Why a row was not applied. `key` is only reported once it passed validation,
/// so a source that is not a seed file never has its content echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFailure {
    pub row: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedReport {
    pub cache: CacheKind,
    pub rows: usize,
}

/// Parse a headerless CSV document. Rows may have any number of columns.
///
/// Values are kept byte for byte, whitespace included. Only the key is trimmed.
pub fn parse_rows(document: &[u8]) -> Result<Vec<SeedRow>, SeedError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(document);

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let mut fields = record.iter();
        let key = fields.next().unwrap_or_default().trim().to_owned();
        rows.push(SeedRow {
            row: index + 1,
            key,
            values: fields.map(str::to_owned).collect(),
        });
    }
    Ok(rows)
}

/// Every problem with every row, empty when the whole load can be applied.
pub fn validate_rows(kind: CacheKind, rows: &[SeedRow]) -> Vec<RowFailure> {
    let mut failures = Vec::new();
    for row in rows {
        if let Some(reason) = check_row(kind, row) {
            let key = kind.accepts_key(&row.key).then(|| row.key.clone());
            failures.push(RowFailure {
                row: row.row,
                key,
                reason,
            });
        }
    }
    failures
}

fn check_row(kind: CacheKind, row: &SeedRow) -> Option<String> {
    if row.key.is_empty() {
        return Some("empty key".to_owned());
    }
    if !kind.accepts_key(&row.key) {
        return Some(format!(
            "key must look like <user id>:{} or <user id>:{}",
            kind.suffixes()[0],
            kind.suffixes()[1]
        ));
    }
    for (position, value) in row.values.iter().enumerate() {
        if value.is_empty() {
            return Some(format!("value {} is empty", position + 1));
        }
        if kind == CacheKind::Data && value.parse::<NumericId>().is_err() {
            return Some(format!("value {} is not a user id", position + 1));
        }
    }
    None
}

/// Where a seed load comes from: an `http(s)://` URL, or else a local path.
pub async fn load_source(http: &reqwest::Client, location: &str) -> Result<Vec<u8>, SeedError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let response = http
            .get(location)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SeedError::SourceFetch(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| SeedError::SourceFetch(e.to_string()))?;
        return Ok(body.to_vec());
    }

    tokio::fs::read(location)
        .await
        .map_err(|e| SeedError::SourceUnreadable {
            location: location.to_owned(),
            reason: e.to_string(),
        })
}

/// Later rows for a key replace earlier ones, so only the last is written.
fn last_row_per_key(rows: Vec<SeedRow>) -> Vec<SeedRow> {
    let mut latest: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for (position, row) in rows.iter().enumerate() {
        latest.insert(row.key.clone(), position);
    }
    rows.into_iter()
        .enumerate()
        .filter(|(position, row)| latest.get(&row.key) == Some(position))
        .map(|(_, row)| row)
        .collect()
}

/// Bulk-loads lists into either cache, replacing whatever the keys held.
pub struct CacheSeeder {
    caches: Caches,
    http: reqwest::Client,
    timeout: Duration,
}

impl CacheSeeder {
    pub fn new(caches: Caches, timeout: Duration) -> Self {
        Self {
            caches,
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Load, check and apply the rows found at `location`, within the seed timeout.
    #[instrument(skip(self))]
    pub async fn seed_from(
        &self,
        kind: CacheKind,
        location: &str,
    ) -> Result<SeedReport, SeedError> {
        let timer = common_metrics::timing_guard(SEED_TIME, &[]).label("cache", kind.as_str());
        let load = self.load_and_seed(kind, location);
        let result = match tokio::time::timeout(self.timeout, load).await {
            Ok(result) => result,
            Err(_elapsed) => Err(SeedError::Timeout(self.timeout)),
        };
        timer.label("outcome", if result.is_ok() { "ok" } else { "error" }).fin();
        result
    }

    async fn load_and_seed(
        &self,
        kind: CacheKind,
        location: &str,
    ) -> Result<SeedReport, SeedError> {
        let document = load_source(&self.http, location).await?;
        let rows = parse_rows(&document)?;
        self.seed(kind, rows).await
    }

    /// Replace each row's key with the row's values, or clear it when the row has none.
    ///
    /// Nothing is written unless every row is well formed. Rows are then applied
    /// independently: a failed row neither stops the others nor undoes them.
    pub async fn seed(
        &self,
        kind: CacheKind,
        rows: Vec<SeedRow>,
    ) -> Result<SeedReport, SeedError> {
        let malformed = validate_rows(kind, &rows);
        if !malformed.is_empty() {
            warn!(
                cache = kind.as_str(),
                rows = malformed.len(),
                "rejecting malformed seed rows"
            );
            return Err(SeedError::MalformedRows(malformed));
        }

        let total = rows.len();
        let client = self.caches.get(kind);
        let mut failures: Vec<RowFailure> = stream::iter(last_row_per_key(rows))
            .map(|row| async move {
                // A row with only a key clears the list
                let written = if row.values.is_empty() {
                    client.del(row.key.clone()).await
                } else {
                    client.replace_list(row.key.clone(), row.values).await
                };
                match written {
                    Ok(()) => None,
                    Err(err) => Some(RowFailure {
                        row: row.row,
                        key: Some(row.key),
                        reason: err.to_string(),
                    }),
                }
            })
            .buffer_unordered(SEED_CONCURRENCY)
            .filter_map(|failure| async move { failure })
            .collect()
            .await;

        counter!(SEED_ROWS_APPLIED, "cache" => kind.as_str())
            .increment((total - failures.len()) as u64);
        if !failures.is_empty() {
            failures.sort_by_key(|failure| failure.row);
            counter!(SEED_ROWS_FAILED, "cache" => kind.as_str()).increment(failures.len() as u64);
            warn!(cache = kind.as_str(), failed = failures.len(), "seed partially applied");
            return Err(SeedError::RowsFailed {
                rows: total,
                failures,
            });
        }

        info!(cache = kind.as_str(), rows = total, "seed applied");
        Ok(SeedReport {
            cache: kind,
            rows: total,
        })
    }
}
