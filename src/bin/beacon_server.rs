//! Beacon HTTP server.
//!
//! Endpoints (responses MessagePack unless noted):
//! - GET  /api/pubkey                      → operator public key PEM (octet-stream)
//! - GET  /api/beacon_config               → { interval_seconds, window_size }
//! - GET  /api/info                        → { stage, phase, contributions }
//! - POST /api/contribute  (JSON body)     → { stage, data_index, signature }
//! - GET  /api/stage/{i}                   → stage snapshot (i = -1 is the sentinel)
//! - GET  /api/stage?start=&end=           → inclusive list of snapshots
//! - GET  /api/stage/{i}/accproof/{j}      → membership witness (requires EVALUATION)
//!
//! Errors map to JSON `{ error }` bodies: 400 for malformed input, 404 for
//! unknown stages, 409 for phase violations.
//!
//! The scheduler runs on its own thread and keeps rolling stages over until
//! the process receives ctrl-c; in-flight VDF workers are left to finish.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use randbeacon::beacon::Beacon;
use randbeacon::config::BeaconConfig;
use randbeacon::keys;
use randbeacon::merkle::MerkleAccumulator;
use randbeacon::stage::{Phase, StageError};
use randbeacon::vdf::AggregateVdf;
use randbeacon::wire::{BeaconConfigMsg, ContributeReply, ContributeRequest, ErrorMsg, InfoMsg};

#[derive(Clone)]
struct AppState {
    beacon: Arc<Beacon<MerkleAccumulator>>,
    public_pem: Arc<Vec<u8>>,
}

/// MessagePack responder: structs pack with field names.
struct Msgpack<T>(T);

impl<T: Serialize> IntoResponse for Msgpack<T> {
    fn into_response(self) -> Response {
        match rmp_serde::to_vec_named(&self.0) {
            Ok(body) => ([(header::CONTENT_TYPE, "application/msgpack")], body).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorMsg {
                    error: format!("encoding failed: {err}"),
                }),
            )
                .into_response(),
        }
    }
}

enum ApiError {
    BadRequest(String),
    NotFound(String),
    WrongPhase(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            ApiError::NotFound(e) => (StatusCode::NOT_FOUND, e),
            ApiError::WrongPhase(e) => (StatusCode::CONFLICT, e),
        };
        (status, Json(ErrorMsg { error })).into_response()
    }
}

impl From<StageError> for ApiError {
    fn from(err: StageError) -> ApiError {
        match err {
            StageError::WrongPhase { .. } => ApiError::WrongPhase(err.to_string()),
            StageError::DataIndex { .. } => ApiError::BadRequest(err.to_string()),
        }
    }
}

async fn pubkey(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        state.public_pem.as_ref().clone(),
    )
}

async fn beacon_config(State(state): State<AppState>) -> Msgpack<BeaconConfigMsg> {
    Msgpack(BeaconConfigMsg {
        interval_seconds: state.beacon.interval().as_secs(),
        window_size: state.beacon.window() as u64,
    })
}

async fn info(State(state): State<AppState>) -> Msgpack<InfoMsg> {
    let stage = state.beacon.current_stage();
    Msgpack(InfoMsg {
        stage: stage.index() as i64,
        phase: stage.phase().name().to_string(),
        contributions: stage.contribution_count() as u64,
    })
}

async fn contribute(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Msgpack<ContributeReply>, ApiError> {
    let request: ContributeRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("no randomness provided".to_string()))?;
    let randomness = base64::engine::general_purpose::STANDARD
        .decode(request.randomness.as_bytes())
        .map_err(|_| ApiError::BadRequest("randomness isn't base64 encoded".to_string()))?;
    let receipt = state.beacon.contribute(&randomness)?;
    Ok(Msgpack(ContributeReply {
        stage: receipt.stage as i64,
        data_index: receipt.data_index,
        signature: receipt.signature,
    }))
}

async fn stage_one(
    State(state): State<AppState>,
    Path(index): Path<i64>,
) -> Msgpack<randbeacon::wire::StageSnapshot> {
    Msgpack(state.beacon.snapshot(index))
}

#[derive(Deserialize)]
struct RangeParams {
    start: Option<i64>,
    end: Option<i64>,
}

async fn stage_range(
    State(state): State<AppState>,
    Query(range): Query<RangeParams>,
) -> Result<Msgpack<Vec<randbeacon::wire::StageSnapshot>>, ApiError> {
    let start = range.start.unwrap_or(0);
    let end = range.end.unwrap_or(state.beacon.current_index() as i64);
    if end < start || end - start > 10_000 {
        return Err(ApiError::BadRequest(format!(
            "invalid stage range [{start}, {end}]"
        )));
    }
    Ok(Msgpack((start..=end).map(|i| state.beacon.snapshot(i)).collect()))
}

async fn acc_proof(
    State(state): State<AppState>,
    Path((stage_index, data_index)): Path<(i64, u64)>,
) -> Result<Msgpack<randbeacon::merkle::MerkleProof>, ApiError> {
    let stage = u64::try_from(stage_index)
        .ok()
        .and_then(|i| state.beacon.stage(i))
        .ok_or_else(|| ApiError::NotFound(format!("no stage {stage_index}")))?;
    if stage.phase() < Phase::Evaluation {
        return Err(ApiError::WrongPhase(format!(
            "stage {stage_index} has no accumulator yet"
        )));
    }
    Ok(Msgpack(stage.acc_proof(data_index as usize)?))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/pubkey", get(pubkey))
        .route("/api/beacon_config", get(beacon_config))
        .route("/api/info", get(info))
        .route("/api/contribute", post(contribute))
        .route("/api/stage", get(stage_range))
        .route("/api/stage/:index", get(stage_one))
        .route("/api/stage/:index/accproof/:data_index", get(acc_proof))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BeaconConfig::from_env()?;
    let signing_key = keys::load_signing_key(&config.private_key_path)
        .context("load signing key (run the keygen binary first)")?;
    let public_pem = keys::load_public_pem(&config.public_key_path)
        .context("load public key (run the keygen binary first)")?;

    let avdf = AggregateVdf::new(
        config.vdf_bits,
        config.vdf_iterations,
        &config.aggregation_seed,
    );
    info!(
        window = config.window,
        interval_seconds = config.interval_seconds,
        iterations = config.vdf_iterations,
        "beacon starting"
    );

    let beacon = Beacon::new(
        MerkleAccumulator,
        avdf,
        config.window,
        config.interval(),
        signing_key,
    );
    let scheduler = beacon.spawn_scheduler();

    let state = AppState {
        beacon,
        public_pem: Arc::new(public_pem),
    };
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("bind {}", config.listen))?;
    info!(listen = %config.listen, "serving");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    scheduler.shutdown();
    Ok(())
}
