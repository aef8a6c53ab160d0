use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::time::Instant;

use tictactoe_core::{MatchId, MatchMode, ServerMessage};

use crate::config::ServerConfig;
use crate::ledger::RatingLedger;
use crate::match_task::MatchHandle;

/// Handle to push messages to a connected WebSocket client.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Distinguishes this socket from a newer one for the same user.
    pub connection_id: u64,
    pub user_id: String,
    pub display_name: String,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
    /// Match the user currently plays in, if any.
    pub match_id: Option<MatchId>,
}

/// An entry in a per-mode matchmaking queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub user_id: String,
    pub display_name: String,
    pub joined_at: Instant,
}

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub db: SqlitePool,
    pub ledger: RatingLedger,
    pub matches: DashMap<MatchId, MatchHandle>,
    pub connections: DashMap<String, ConnectionHandle>,
    pub matchmaking: DashMap<MatchMode, Vec<QueueEntry>>,
    pub connection_count: AtomicU32,
    next_connection_id: AtomicU64,
}

impl AppState {
    pub fn new(config: ServerConfig, db: SqlitePool) -> Self {
        let ledger = RatingLedger::new(config.rating);
        Self {
            config,
            db,
            ledger,
            matches: DashMap::new(),
            connections: DashMap::new(),
            matchmaking: DashMap::new(),
            connection_count: AtomicU32::new(0),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Fire-and-forget delivery; a user without a live socket misses the message.
    pub fn send_to(&self, user_id: &str, msg: ServerMessage) {
        if let Some(conn) = self.connections.get(user_id) {
            let _ = conn.tx.send(msg);
        }
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn bound_match(&self, user_id: &str) -> Option<MatchId> {
        self.connections
            .get(user_id)
            .and_then(|c| c.match_id.clone())
    }

    /// Point the user's live connection at `match_id` (or at nothing).
    pub fn bind_match(&self, user_id: &str, match_id: Option<MatchId>) {
        if let Some(mut conn) = self.connections.get_mut(user_id) {
            conn.match_id = match_id;
        }
    }

    /// Clear the binding only if it still points at `match_id`.
    pub fn unbind_match(&self, user_id: &str, match_id: &MatchId) {
        if let Some(mut conn) = self.connections.get_mut(user_id) {
            if conn.match_id.as_ref() == Some(match_id) {
                conn.match_id = None;
            }
        }
    }

    /// Every registered match the user is seated in, oldest first.
    pub fn matches_for(&self, user_id: &str) -> Vec<MatchId> {
        let mut seated: Vec<_> = self
            .matches
            .iter()
            .filter(|m| m.has_player(user_id))
            .map(|m| (m.started_at, m.key().clone()))
            .collect();
        seated.sort_by_key(|(started_at, _)| *started_at);
        seated.into_iter().map(|(_, id)| id).collect()
    }

    /// Claim a connection slot. Fails with the current count when full.
    pub fn try_reserve_connection(&self) -> Result<u32, u32> {
        let max = self.config.max_connections;
        self.connection_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
    }

    pub fn release_connection(&self) {
        self.connection_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn remove_from_queues(&self, user_id: &str) {
        for mut queue in self.matchmaking.iter_mut() {
            queue.value_mut().retain(|e| e.user_id != user_id);
        }
    }
}

/// Generate a random 8-character lowercase alphanumeric match id.
pub fn generate_match_id() -> MatchId {
    use rand::RngExt;
    let mut rng = rand::rng();
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let id: String = (0..8)
        .map(|_| {
            let idx = rng.random_range(0..CHARS.len());
            CHARS[idx] as char
        })
        .collect();
    MatchId(id)
}
