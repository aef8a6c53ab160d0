use std::sync::Arc;

use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::warn;

use tictactoe_core::protocol::{LeaderboardEntry, PlayerProfile};

use crate::state::AppState;
use crate::ws;

const DEFAULT_LEADERBOARD_LIMIT: usize = 50;
const MAX_LEADERBOARD_LIMIT: usize = 100;

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ── Leaderboard ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<usize>,
}

pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<Vec<LeaderboardEntry>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(1, MAX_LEADERBOARD_LIMIT);
    Json(state.ledger.leaderboard(limit))
}

// ── Profile ─────────────────────────────────────────────────────────────

pub async fn profile(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<PlayerProfile> {
    let record = state.ledger.lookup(&user_id);
    Json(PlayerProfile {
        user_id,
        display_name: record.display_name,
        rating: record.rating,
        wins: record.wins,
        losses: record.losses,
        draws: record.draws,
    })
}

// ── WebSocket upgrade ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub user_id: String,
    pub name: Option<String>,
}

pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = query.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    if let Err(current) = state.try_reserve_connection() {
        warn!(current, "connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let display_name = query
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| user_id.clone());

    let released = state.clone();
    Ok(ws
        .on_failed_upgrade(move |e| {
            warn!(error = %e, "websocket upgrade failed");
            released.release_connection();
        })
        .on_upgrade(move |socket| ws::handle_socket(state, socket, user_id, display_name)))
}
