//! The task that owns one match.
//!
//! Every event for a match (client requests, transport changes, timer
//! firings) is pushed into the match's queue and handled one at a time, so
//! no two events for the same match ever interleave. Different matches run
//! on their own tasks in parallel.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tictactoe_core::{MatchId, MatchMode, ServerMessage};

use crate::coordinator::{Effect, HandleError, MatchCoordinator, MatchEvent, PRACTICE_BOT_ID, TimerKind};
use crate::db;
use crate::error::LifecycleError;
use crate::ledger::{LedgerError, OutcomeReason, RatedResult};
use crate::state::AppState;

/// Registry entry for a live match.
#[derive(Debug, Clone)]
pub struct MatchHandle {
    tx: mpsc::UnboundedSender<MatchEvent>,
    pub mode: MatchMode,
    pub players: [String; 2],
    pub started_at: Instant,
}

impl MatchHandle {
    /// Queue an event. Returns `false` if the match task is gone.
    pub fn send(&self, event: MatchEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn has_player(&self, user_id: &str) -> bool {
        self.players.iter().any(|p| p == user_id)
    }
}

/// Pending timers for one match, aborted as a group on drop.
#[derive(Default)]
struct TimerSet {
    handles: HashMap<TimerKind, AbortHandle>,
}

impl TimerSet {
    fn schedule(
        &mut self,
        tx: &mpsc::UnboundedSender<MatchEvent>,
        timer: TimerKind,
        after: Duration,
        generation: u64,
    ) {
        self.cancel(timer);
        let tx = tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(MatchEvent::TimerFired { timer, generation });
        });
        self.handles.insert(timer, task.abort_handle());
    }

    fn cancel(&mut self, timer: TimerKind) {
        if let Some(handle) = self.handles.remove(&timer) {
            handle.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Register a bound coordinator, point its players' connections at it and
/// start its task. `opening` are the effects produced by binding.
pub fn spawn_match(state: &Arc<AppState>, coordinator: MatchCoordinator, opening: Vec<Effect>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let match_id = coordinator.id().clone();
    let players = [
        coordinator.players()[0].id().to_string(),
        coordinator.players()[1].id().to_string(),
    ];

    state.matches.insert(
        match_id.clone(),
        MatchHandle {
            tx: tx.clone(),
            mode: coordinator.mode(),
            players: players.clone(),
            started_at: coordinator.created_at(),
        },
    );
    for player in &players {
        state.bind_match(player, Some(match_id.clone()));
        // Someone who left before a successor existed starts out disconnected.
        if player != PRACTICE_BOT_ID && !state.is_connected(player) {
            let _ = tx.send(MatchEvent::Disconnected {
                player_id: player.clone(),
            });
        }
    }

    info!(match_id = %match_id, mode = ?coordinator.mode(), players = ?players, "match started");

    let runner = MatchRunner {
        state: state.clone(),
        match_id,
        tx,
        timers: TimerSet::default(),
    };
    tokio::spawn(runner.run(coordinator, rx, opening));
}

struct MatchRunner {
    state: Arc<AppState>,
    match_id: MatchId,
    tx: mpsc::UnboundedSender<MatchEvent>,
    timers: TimerSet,
}

impl MatchRunner {
    async fn run(
        mut self,
        mut coordinator: MatchCoordinator,
        mut rx: mpsc::UnboundedReceiver<MatchEvent>,
        opening: Vec<Effect>,
    ) {
        if self.execute(opening).is_continue() {
            while let Some(event) = rx.recv().await {
                let actor = actor_of(&event).map(str::to_string);
                match coordinator.handle(event, Instant::now()) {
                    Ok(effects) => {
                        if self.execute(effects).is_break() {
                            break;
                        }
                    }
                    Err(HandleError::Validation(err)) => {
                        debug!(match_id = %self.match_id, error = %err, "rejected request");
                        if let Some(actor) = actor {
                            self.state
                                .send_to(&actor, ServerMessage::error(err.kind(), err.to_string()));
                        }
                    }
                    Err(HandleError::Lifecycle(err)) => {
                        debug!(match_id = %self.match_id, error = %err, "absorbed stale event");
                    }
                }
            }
        }
        self.teardown(&coordinator);
    }

    fn execute(&mut self, effects: Vec<Effect>) -> ControlFlow<()> {
        for effect in effects {
            match effect {
                Effect::Send { to, message } => self.state.send_to(&to, message),
                Effect::Schedule {
                    timer,
                    after,
                    generation,
                } => self.timers.schedule(&self.tx, timer, after, generation),
                Effect::Cancel(timer) => self.timers.cancel(timer),
                Effect::CancelAll => self.timers.cancel_all(),
                Effect::RecordOutcome { result, reason } => self.record(result, reason),
                Effect::SpawnSuccessor {
                    coordinator,
                    effects,
                } => {
                    info!(
                        match_id = %self.match_id,
                        successor = %coordinator.id(),
                        "rematch agreed"
                    );
                    spawn_match(&self.state, *coordinator, effects);
                }
                Effect::Dispose => return ControlFlow::Break(()),
            }
        }
        ControlFlow::Continue(())
    }

    fn record(&self, result: RatedResult, reason: OutcomeReason) {
        debug_assert!(
            !self.state.ledger.is_recorded(&self.match_id),
            "outcome for {} recorded twice",
            self.match_id
        );
        let changes = match self.state.ledger.record_outcome(&self.match_id, &result, reason) {
            Ok(changes) => changes,
            Err(LedgerError::AlreadyRecorded(id)) => {
                let err = LifecycleError::DuplicateOutcomeRecording(id);
                error!(match_id = %self.match_id, error = %err, "ledger refused outcome");
                return;
            }
        };

        for change in &changes {
            self.state.send_to(
                &change.user_id,
                ServerMessage::RatingUpdate {
                    rating: change.record.rating,
                    delta: change.delta,
                    wins: change.record.wins,
                    losses: change.record.losses,
                    draws: change.record.draws,
                },
            );
        }

        let pool = self.state.db.clone();
        let match_id = self.match_id.clone();
        tokio::spawn(async move {
            match db::persist_outcome(&pool, &match_id, reason, &result, &changes).await {
                Ok(true) => {}
                Ok(false) => warn!(match_id = %match_id, "outcome already persisted"),
                Err(e) => error!(match_id = %match_id, error = %e, "failed to persist outcome"),
            }
        });
    }

    fn teardown(&mut self, coordinator: &MatchCoordinator) {
        self.timers.cancel_all();
        let removed = self.state.matches.remove(&self.match_id);
        for player in coordinator.players() {
            self.state.unbind_match(player.id(), &self.match_id);
        }
        info!(
            match_id = %self.match_id,
            mode = ?removed.map(|(_, handle)| handle.mode),
            state = ?coordinator.state(),
            idle_ms = coordinator.updated_at().elapsed().as_millis() as u64,
            "match disposed"
        );
    }
}

fn actor_of(event: &MatchEvent) -> Option<&str> {
    match event {
        MatchEvent::Move { player_id, .. }
        | MatchEvent::Connected { player_id }
        | MatchEvent::Disconnected { player_id }
        | MatchEvent::RequestRematch { player_id }
        | MatchEvent::Sync { player_id } => Some(player_id),
        MatchEvent::TimerFired { .. } => None,
    }
}
