//! HTTP surface: campaign status reads, phase lifecycle triggers, and the
//! SSE event stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::errors::SchedulerError;
use crate::events::{BusEvent, EventBus};
use crate::models::PhaseType;
use crate::scheduler::PhaseScheduler;
use crate::store::StoreHandle;

/// How often the bus publishes a keep-alive tick for SSE clients.
const KEEP_ALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: StoreHandle,
    pub scheduler: Arc<PhaseScheduler>,
    pub bus: EventBus,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub owner: String,
    #[serde(default)]
    pub campaign_type: Option<String>,
}

#[derive(Deserialize)]
pub struct ConfigurePhaseRequest {
    pub configuration: serde_json::Value,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match &err {
            SchedulerError::PreconditionNotMet { .. }
            | SchedulerError::DiscoveryImmutable { .. } => ApiError::Conflict(err.to_string()),
            SchedulerError::NotConfigured { .. }
            | SchedulerError::InvalidConfiguration(_)
            | SchedulerError::NoActiveExecution { .. } => ApiError::BadRequest(err.to_string()),
            SchedulerError::CampaignNotFound { .. } => ApiError::NotFound(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<crate::errors::StoreError> for ApiError {
    fn from(err: crate::errors::StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

fn parse_phase(raw: &str) -> Result<PhaseType, ApiError> {
    PhaseType::from_str(raw).map_err(ApiError::BadRequest)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/campaigns", post(create_campaign))
        .route("/api/campaigns/{id}", get(get_campaign))
        .route("/api/campaigns/{id}/counters", get(get_counters))
        .route(
            "/api/campaigns/{id}/phases/{phase}/configure",
            post(configure_phase),
        )
        .route(
            "/api/campaigns/{id}/phases/{phase}/execute",
            post(execute_phase),
        )
        .route(
            "/api/campaigns/{id}/phases/{phase}/cancel",
            post(cancel_phase),
        )
        .route(
            "/api/campaigns/{id}/phases/{phase}/status",
            get(phase_status),
        )
        .route("/api/events", get(sse_events))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until ctrl-c; pauses active executions on shutdown.
pub async fn serve(state: SharedState, port: u16) -> anyhow::Result<()> {
    let bus = state.bus.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEP_ALIVE_INTERVAL);
        loop {
            ticker.tick().await;
            bus.publish(BusEvent::KeepAlive {
                ts: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            });
        }
    });

    let scheduler = state.scheduler.clone();
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "dragnet listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested, pausing active executions");
            scheduler.shutdown();
        })
        .await?;
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_campaign(
    State(state): State<SharedState>,
    Json(payload): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.owner.trim().is_empty() {
        return Err(ApiError::BadRequest("owner must not be empty".to_string()));
    }
    let campaign = state.store.lock()?.create_campaign(
        &payload.owner,
        payload.campaign_type.as_deref().unwrap_or("lead_generation"),
    )?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

async fn get_campaign(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let (campaign, phases) = {
        let store = state.store.lock()?;
        let campaign = store
            .get_campaign(id)?
            .ok_or_else(|| ApiError::NotFound(format!("Campaign {} not found", id)))?;
        let phases = store.list_campaign_phases(id)?;
        (campaign, phases)
    };
    Ok(Json(serde_json::json!({
        "campaign": campaign,
        "phases": phases,
    })))
}

async fn get_counters(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let counters = state.store.lock()?.get_counters(id).map_err(|e| match e {
        crate::errors::StoreError::CountersNotFound { .. } => {
            ApiError::NotFound(format!("Campaign {} not found", id))
        }
        other => ApiError::Internal(other.to_string()),
    })?;
    Ok(Json(counters))
}

async fn configure_phase(
    State(state): State<SharedState>,
    Path((id, phase)): Path<(i64, String)>,
    Json(payload): Json<ConfigurePhaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    state.scheduler.configure(id, phase, &payload.configuration)?;
    Ok(Json(serde_json::json!({
        "campaign_id": id,
        "phase": phase,
        "status": "configured",
    })))
}

async fn execute_phase(
    State(state): State<SharedState>,
    Path((id, phase)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    // The progress stream stays server-side; clients follow /api/events.
    let _rx = state.scheduler.execute(id, phase)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "campaign_id": id,
            "phase": phase,
            "status": "in_progress",
        })),
    ))
}

async fn cancel_phase(
    State(state): State<SharedState>,
    Path((id, phase)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    state.scheduler.cancel(id, phase)?;
    Ok(Json(serde_json::json!({
        "campaign_id": id,
        "phase": phase,
        "status": "cancelling",
    })))
}

async fn phase_status(
    State(state): State<SharedState>,
    Path((id, phase)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = parse_phase(&phase)?;
    let status = state.scheduler.get_status(id, phase)?;
    let row = state.store.lock()?.get_campaign_phase(id, phase)?;
    Ok(Json(serde_json::json!({
        "campaign_id": id,
        "phase": phase,
        "status": status,
        "progress_pct": row.as_ref().map(|r| r.progress_pct).unwrap_or(0.0),
        "items_processed": row.as_ref().map(|r| r.items_processed).unwrap_or(0),
        "items_total": row.as_ref().map(|r| r.items_total).unwrap_or(0),
        "last_error": row.and_then(|r| r.last_error),
    })))
}

/// Forward the bus to an SSE client. Lagged receivers skip missed events
/// rather than disconnecting.
async fn sse_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(_) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Tests ─────────────────────────────────────────────────────────────
