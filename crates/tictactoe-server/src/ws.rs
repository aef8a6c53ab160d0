use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use tictactoe_core::{ClientMessage, ErrorKind, MatchId, MatchMode, ServerMessage};

use crate::coordinator::{MatchCoordinator, MatchEvent, Seat};
use crate::match_task::spawn_match;
use crate::state::{AppState, ConnectionHandle, QueueEntry, generate_match_id};

/// Top-level WebSocket handler -- spawned per connection.
///
/// The caller has already reserved a connection slot; it is released here.
pub async fn handle_socket(
    state: Arc<AppState>,
    mut socket: WebSocket,
    user_id: String,
    display_name: String,
) {
    let connection_id = state.next_connection_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // A newer socket for the same user replaces the old handle.
    let replaced = state.connections.insert(
        user_id.clone(),
        ConnectionHandle {
            connection_id,
            user_id: user_id.clone(),
            display_name: display_name.clone(),
            tx: tx.clone(),
            match_id: None,
        },
    );
    info!(player = %user_id, connection_id, replaced = replaced.is_some(), "client connected");
    rebind_live_matches(&state, &user_id);

    let limit = state.config.rate_limit;
    let mut window_start = Instant::now();
    let mut window_count = 0u32;

    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                if let Ok(json) = serde_json::to_string(&msg) {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        let now = Instant::now();
                        if now.duration_since(window_start) > Duration::from_secs(1) {
                            window_start = now;
                            window_count = 0;
                        }
                        window_count += 1;
                        if window_count > limit {
                            let _ = tx.send(ServerMessage::error(ErrorKind::RateLimited, "too many messages"));
                            continue;
                        }

                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                debug!(player = %user_id, error = %e, "malformed message");
                                let _ = tx.send(ServerMessage::error(
                                    ErrorKind::MalformedMessage,
                                    format!("invalid message: {e}"),
                                ));
                                continue;
                            }
                        };

                        handle_message(&state, &user_id, &display_name, &tx, client_msg);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(player = %user_id, error = %e, "socket error");
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }

    // Only the current socket for this user may tear down its state.
    if let Some((_, handle)) = state
        .connections
        .remove_if(&user_id, |_, c| c.connection_id == connection_id)
    {
        state.remove_from_queues(&user_id);
        // Not only the bound match: an older one may still be running.
        let seated = state.matches_for(&user_id);
        for match_id in &seated {
            forward(
                &state,
                &user_id,
                match_id,
                MatchEvent::Disconnected {
                    player_id: user_id.clone(),
                },
            );
        }
        debug!(player = %user_id, bound = ?handle.match_id, matches = seated.len(), "left matches");
    }
    state.release_connection();
    info!(player = %user_id, connection_id, "client disconnected");
}

/// Reattach a (re)connecting user to every match they are seated in and
/// bind the connection to the newest one.
fn rebind_live_matches(state: &AppState, user_id: &str) {
    let seated = state.matches_for(user_id);
    let Some(newest) = seated.last() else {
        return;
    };
    state.bind_match(user_id, Some(newest.clone()));
    for match_id in &seated {
        forward(
            state,
            user_id,
            match_id,
            MatchEvent::Connected {
                player_id: user_id.to_string(),
            },
        );
    }
}

/// Dispatch a single client message.
fn handle_message(
    state: &Arc<AppState>,
    user_id: &str,
    display_name: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::FindMatch { mode } => find_match(state, user_id, display_name, tx, mode),

        ClientMessage::Move {
            match_id,
            position,
            move_seq,
        } => {
            let event = MatchEvent::Move {
                player_id: user_id.to_string(),
                position,
                move_seq,
            };
            if !forward(state, user_id, &match_id, event) {
                reject_unknown(tx, &match_id);
            }
        }

        ClientMessage::RequestRematch { match_id } => {
            let event = MatchEvent::RequestRematch {
                player_id: user_id.to_string(),
            };
            if !forward(state, user_id, &match_id, event) {
                reject_unknown(tx, &match_id);
            }
        }

        ClientMessage::Sync { match_id } => {
            let event = MatchEvent::Sync {
                player_id: user_id.to_string(),
            };
            if !forward(state, user_id, &match_id, event) {
                reject_unknown(tx, &match_id);
            }
        }

        ClientMessage::Ping => {
            let _ = tx.send(ServerMessage::Pong);
        }
    }
}

/// Queue `event` on the match if `user_id` plays in it.
fn forward(state: &AppState, user_id: &str, match_id: &MatchId, event: MatchEvent) -> bool {
    match state.matches.get(match_id) {
        Some(handle) if handle.has_player(user_id) => handle.send(event),
        _ => false,
    }
}

fn reject_unknown(tx: &mpsc::UnboundedSender<ServerMessage>, match_id: &MatchId) {
    let _ = tx.send(ServerMessage::error(
        ErrorKind::UnknownMatch,
        format!("unknown match {match_id}"),
    ));
}

fn find_match(
    state: &Arc<AppState>,
    user_id: &str,
    display_name: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    mode: MatchMode,
) {
    let me = Seat::new(user_id, display_name);

    if mode == MatchMode::Practice {
        start_match(state, mode, [me, Seat::practice_bot()]);
        return;
    }

    // Leave any other queue, then take the longest waiter or join the line.
    for mut queue in state.matchmaking.iter_mut() {
        if *queue.key() != mode {
            queue.value_mut().retain(|e| e.user_id != user_id);
        }
    }
    let opponent = {
        let mut queue = state.matchmaking.entry(mode).or_default();
        if queue.iter().any(|e| e.user_id == user_id) {
            debug!(player = %user_id, ?mode, "already queued");
            None
        } else if queue.is_empty() {
            queue.push(QueueEntry {
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                joined_at: Instant::now(),
            });
            None
        } else {
            Some(queue.remove(0))
        }
    };

    match opponent {
        Some(waiting) => {
            debug!(
                player = %user_id,
                opponent = %waiting.user_id,
                waited_ms = waiting.joined_at.elapsed().as_millis() as u64,
                "paired"
            );
            let first = Seat::new(waiting.user_id, waiting.display_name);
            start_match(state, mode, [first, me]);
        }
        None => {
            let _ = tx.send(ServerMessage::WaitingForOpponent { mode });
        }
    }
}

fn start_match(state: &Arc<AppState>, mode: MatchMode, seats: [Seat; 2]) {
    let now = Instant::now();
    let mut coordinator =
        MatchCoordinator::new(generate_match_id(), mode, state.config.matches, now);
    let opening = coordinator.bind_players(seats, now);
    spawn_match(state, coordinator, opening);
}
