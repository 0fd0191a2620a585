use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::stream::stream_events;
use crate::error::AppError;
use crate::fanout::FanOut;
use crate::service::{DealService, SubmitOutcome};
use crate::state::DealStore;
use crate::types::{now_ms, Deal, DealFilter, DealInput, SuppressionEntry};

pub const API_KEY_HEADER: &str = "x-api-key";

pub struct ApiState<S> {
    pub service: Arc<DealService<S>>,
    pub fanout: Arc<FanOut>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    /// `None` disables the guard on mutating routes.
    pub api_key: Option<Arc<str>>,
}

impl<S> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            fanout: Arc::clone(&self.fanout),
            health: Arc::clone(&self.health),
            latency: Arc::clone(&self.latency),
            api_key: self.api_key.clone(),
        }
    }
}

pub fn router<S: DealStore>(state: ApiState<S>) -> Router {
    Router::new()
        .route("/api/health", get(get_health::<S>))
        .route("/api/deals", get(list_deals::<S>).post(submit_deal::<S>))
        .route("/api/deals/:id", delete(delete_deal::<S>))
        .route("/api/suppressions", get(list_suppressions::<S>))
        .route("/api/stream", get(stream_events::<S>))
        .route("/api/stats/latency", get(get_stats_latency::<S>))
        .with_state(state)
}

fn authorize<S>(state: &ApiState<S>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(());
    };
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected => Ok(()),
        _ => Err(AppError::Unauthorized),
    }
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealsQuery {
    pub limit: Option<i64>,
    pub min_margin: Option<f64>,
    pub min_liquidity: Option<f64>,
    pub search: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub subscribers: usize,
    pub accepted: u64,
    pub suppressed: u64,
    pub deleted: u64,
    pub purged: u64,
    pub last_purge_at: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health<S: DealStore>(State(state): State<ApiState<S>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        subscribers: state.fanout.subscriber_count(),
        accepted: state.health.accepted_total(),
        suppressed: state.health.suppressed_total(),
        deleted: state.health.deleted_total(),
        purged: state.health.purged_total(),
        last_purge_at: state.health.last_purge_at_ms(),
    })
}

async fn list_deals<S: DealStore>(
    State(state): State<ApiState<S>>,
    Query(params): Query<DealsQuery>,
) -> Result<Json<Vec<Deal>>, AppError> {
    let filter = DealFilter::new(params.min_margin, params.min_liquidity, params.search.as_deref());
    let deals = state.service.list(&filter, params.limit).await?;
    Ok(Json(deals))
}

async fn submit_deal<S: DealStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    authorize(&state, &headers)?;
    let started = Instant::now();

    let body: serde_json::Value = serde_json::from_slice(&body)?;
    let deal = DealInput::parse(body)?;
    let outcome = state.service.submit(deal, now_ms()).await;
    state.latency.record(started.elapsed());

    let response = match outcome? {
        SubmitOutcome::Stored(deal) => (StatusCode::OK, Json(json!(deal))).into_response(),
        SubmitOutcome::Suppressed { threshold } => (
            StatusCode::ACCEPTED,
            Json(json!({ "suppressed": true, "threshold": threshold })),
        )
            .into_response(),
    };
    Ok(response)
}

async fn delete_deal<S: DealStore>(
    State(state): State<ApiState<S>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    authorize(&state, &headers)?;
    let id: i64 = id
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid deal id {id:?}")))?;

    let suppression = state.service.remove(id, now_ms()).await?;
    Ok(Json(json!({ "ok": true, "suppression": suppression })))
}

async fn list_suppressions<S: DealStore>(
    State(state): State<ApiState<S>>,
) -> Result<Json<Vec<SuppressionEntry>>, AppError> {
    Ok(Json(state.service.active_suppressions(now_ms()).await?))
}

async fn get_stats_latency<S: DealStore>(State(state): State<ApiState<S>>) -> Json<LatencyResponse> {
    let (p50_us, p95_us, p99_us) = state.latency.percentiles();
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_us,
        p95_us,
        p99_us,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
