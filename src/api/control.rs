// =============================================================================
// Control Surface — Axum 0.7 command endpoints
// =============================================================================
//
// The thin operator-facing surface: commands are forwarded onto the engine's
// command channel and acknowledged immediately; reads serve snapshots from
// the shared context. The dashboard itself lives elsewhere — only the command
// set and status reads exist here.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::config::ConfigPatch;
use crate::context::EngineContext;
use crate::orchestrator::{EngineCommand, Orchestrator};
use crate::types::Direction;

#[derive(Clone)]
pub struct ControlState {
    pub commands: mpsc::Sender<EngineCommand>,
    pub ctx: Arc<EngineContext>,
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the control router with CORS and shared state.
pub fn router(state: ControlState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/trades", get(trades))
        .route("/api/v1/control/start", post(start))
        .route("/api/v1/control/stop", post(stop))
        .route("/api/v1/control/pause", post(pause))
        .route("/api/v1/control/resume", post(resume))
        .route("/api/v1/control/config", post(update_config))
        .route("/api/v1/control/close", post(manual_close))
        .route("/api/v1/control/trade", post(manual_trade))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Reads
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<ControlState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.ctx.start_time.elapsed().as_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn status(State(state): State<ControlState>) -> impl IntoResponse {
    let capital = state.ctx.risk.capital();
    let stats = state.ctx.risk.stats();
    Json(serde_json::json!({
        "engine_state": state.orchestrator.state().to_string(),
        "dry_run": state.ctx.config.read().dry_run,
        "capital": capital,
        "risk": stats,
        "open_positions": state.ctx.book.open_count(),
        "cycles_completed": state.ctx.telemetry.cycles_completed(),
    }))
}

async fn positions(State(state): State<ControlState>) -> impl IntoResponse {
    Json(state.ctx.book.open_positions())
}

#[derive(Deserialize)]
struct TradesQuery {
    symbol: Option<String>,
}

async fn trades(
    State(state): State<ControlState>,
    Query(query): Query<TradesQuery>,
) -> impl IntoResponse {
    match query.symbol {
        Some(symbol) => match state.ctx.trade_store.by_symbol(&symbol) {
            Ok(records) => Json(records).into_response(),
            Err(e) => {
                warn!(error = %e, "trade store query failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        None => Json(state.ctx.book.recent_closed(100)).into_response(),
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn send(state: &ControlState, command: EngineCommand) -> impl IntoResponse {
    match state.commands.send(command).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(serde_json::json!({"accepted": true}))),
        Err(e) => {
            warn!(error = %e, "engine command channel closed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"accepted": false})),
            )
        }
    }
}

#[derive(Deserialize)]
struct StartRequest {
    dry_run: Option<bool>,
}

async fn start(
    State(state): State<ControlState>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    send(&state, EngineCommand::Start { dry_run: req.dry_run }).await
}

async fn stop(State(state): State<ControlState>) -> impl IntoResponse {
    send(&state, EngineCommand::Stop).await
}

async fn pause(State(state): State<ControlState>) -> impl IntoResponse {
    send(&state, EngineCommand::Pause).await
}

async fn resume(State(state): State<ControlState>) -> impl IntoResponse {
    send(&state, EngineCommand::Resume).await
}

async fn update_config(
    State(state): State<ControlState>,
    Json(patch): Json<ConfigPatch>,
) -> impl IntoResponse {
    send(&state, EngineCommand::UpdateConfig(patch)).await
}

#[derive(Deserialize)]
struct CloseRequest {
    symbol: String,
}

async fn manual_close(
    State(state): State<ControlState>,
    Json(req): Json<CloseRequest>,
) -> impl IntoResponse {
    send(
        &state,
        EngineCommand::ManualClose {
            symbol: req.symbol.to_uppercase(),
        },
    )
    .await
}

#[derive(Deserialize)]
struct TradeRequest {
    symbol: String,
    /// "LONG" or "SHORT".
    direction: String,
    notional: f64,
    leverage: Option<u32>,
}

async fn manual_trade(
    State(state): State<ControlState>,
    Json(req): Json<TradeRequest>,
) -> axum::response::Response {
    let direction = match req.direction.to_uppercase().as_str() {
        "LONG" => Direction::Long,
        "SHORT" => Direction::Short,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("unknown direction '{other}'")})),
            )
                .into_response()
        }
    };
    if req.notional <= 0.0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "notional must be positive"})),
        )
            .into_response();
    }

    send(
        &state,
        EngineCommand::ManualTrade {
            symbol: req.symbol.to_uppercase(),
            direction,
            notional: req.notional,
            leverage: req.leverage,
        },
    )
    .await
    .into_response()
}
