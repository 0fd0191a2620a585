//! Bulk loader: POSTs every deal in a JSON array file to `/api/deals`.
//!
//! Usage: `ingest <deals.json>`
//! Env: `API_URL` (default http://localhost:3001), `API_KEY`, `INGEST_CONCURRENCY` (default 8).

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Delay before each retry of a transient failure.
const BACKOFF_MS: [u64; 4] = [250, 500, 1_000, 2_000];
const REQUEST_TIMEOUT_SECS: u64 = 8;
const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Accepted,
    Suppressed,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    total: usize,
    accepted: usize,
    suppressed: usize,
    failed: usize,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        ))
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: ingest <deals.json>");
        std::process::exit(2);
    };
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3001".to_string());
    let api_key = std::env::var("API_KEY").ok().filter(|k| !k.trim().is_empty());
    let concurrency = std::env::var("INGEST_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_CONCURRENCY)
        .max(1);

    let deals = match load_deals(&path) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to read {path}: {e}");
            std::process::exit(1);
        }
    };

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            std::process::exit(1);
        }
    };

    info!(count = deals.len(), api = %base_url, concurrency, "Ingesting deals");
    let summary = ingest(&client, &base_url, api_key.as_deref(), deals, concurrency).await;
    info!(
        total = summary.total,
        accepted = summary.accepted,
        suppressed = summary.suppressed,
        failed = summary.failed,
        "Ingest finished"
    );
    if summary.failed > 0 {
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn load_deals(path: &str) -> Result<Vec<Value>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let parsed: Value = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
    let Value::Array(items) = parsed else {
        return Err("expected a JSON array of deals".to_string());
    };
    Ok(items.into_iter().map(with_id).collect())
}

/// Fill in a missing `id` from the deal's sku (or name).
fn with_id(mut deal: Value) -> Value {
    if let Value::Object(fields) = &mut deal {
        if fields.get("id").map_or(true, Value::is_null) {
            let sku = fields.get("sku").and_then(Value::as_str).unwrap_or_default();
            let name = fields.get("name").and_then(Value::as_str).unwrap_or_default();
            fields.insert("id".to_string(), Value::from(derive_id(sku, name)));
        }
    }
    deal
}

/// FNV-1a 64 over `sku`, or `name` when `sku` is empty, masked to 31 bits.
fn derive_id(sku: &str, name: &str) -> i64 {
    const OFFSET: u64 = 1_469_598_103_934_665_603;
    const PRIME: u64 = 1_099_511_628_211;

    let key = if sku.is_empty() { name } else { sku };
    let hash = key
        .bytes()
        .fold(OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(PRIME));
    (hash & 0x7FFF_FFFF) as i64
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

async fn ingest(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
    deals: Vec<Value>,
    concurrency: usize,
) -> Summary {
    let url = format!("{}/api/deals", base_url.trim_end_matches('/'));
    let mut summary = Summary { total: deals.len(), ..Summary::default() };

    let mut results = stream::iter(deals)
        .map(|deal| {
            let url = &url;
            async move {
                let result = post_deal(client, url, api_key, &deal).await;
                (deal, result)
            }
        })
        .buffer_unordered(concurrency);

    while let Some((deal, result)) = results.next().await {
        let id = deal.get("id").cloned().unwrap_or(Value::Null);
        let name = deal.get("name").and_then(Value::as_str).unwrap_or_default();
        match result {
            Ok(Outcome::Accepted) => summary.accepted += 1,
            Ok(Outcome::Suppressed) => {
                summary.suppressed += 1;
                info!(%id, name, "suppressed");
            }
            Err(e) => {
                summary.failed += 1;
                warn!(%id, name, "failed: {e}");
            }
        }
    }
    summary
}

fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 500 | 502 | 503 | 504)
}

async fn post_deal(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    deal: &Value,
) -> Result<Outcome, String> {
    let mut attempt = 0usize;
    loop {
        let mut request = client.post(url).json(deal);
        if let Some(key) = api_key {
            request = request.header("X-API-Key", key);
        }

        let retry_reason = match request.send().await {
            Ok(resp) => match resp.status() {
                StatusCode::OK => return Ok(Outcome::Accepted),
                StatusCode::ACCEPTED => return Ok(Outcome::Suppressed),
                status if is_transient(status) => format!("HTTP {status}"),
                status => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(format!("HTTP {status}: {body}"));
                }
            },
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => e.to_string(),
            Err(e) => return Err(e.to_string()),
        };

        let Some(delay) = BACKOFF_MS.get(attempt) else {
            return Err(format!("gave up after {} retries: {retry_reason}", BACKOFF_MS.len()));
        };
        attempt += 1;
        warn!(attempt, delay_ms = delay, "transient failure ({retry_reason}), retrying");
        tokio::time::sleep(Duration::from_millis(*delay)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
