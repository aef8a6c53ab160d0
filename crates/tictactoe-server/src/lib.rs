pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod ledger;
pub mod match_task;
pub mod reconnect;
pub mod rematch;
pub mod routes;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::state::AppState;

/// Build a fully configured Router + shared state.
///
/// Opens the database, creates missing tables and seeds the rating ledger
/// from what was persisted by earlier runs.
pub async fn build_app(config: ServerConfig) -> Result<(Router, Arc<AppState>), sqlx::Error> {
    // Every connection to `sqlite::memory:` is its own database.
    let max_db_connections = if config.database_url.contains(":memory:") {
        1
    } else {
        5
    };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_db_connections)
        .connect(&config.database_url)
        .await?;
    db::init_db(&pool).await?;

    let state = Arc::new(AppState::new(config, pool));
    let persisted = db::load_ratings(&state.db).await?;
    info!(players = persisted.len(), "loaded ratings");
    for (user_id, record) in persisted {
        state.ledger.seed(&user_id, record);
    }

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/leaderboard", get(routes::leaderboard))
        .route("/profile/{user_id}", get(routes::profile))
        .route("/ws", get(routes::ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok((app, state))
}
