//! Authoritative per-match state machine.
//!
//! `MatchCoordinator` never touches sockets, clocks or the ledger directly.
//! Every call consumes one event and returns the [`Effect`]s the owning match
//! task must carry out, in order. Timers are identified by kind plus a
//! generation number so a firing that raced a cancellation is recognised and
//! dropped instead of acting on a newer timer.

use std::collections::HashMap;
use std::time::Duration;

use tictactoe_core::practice;
use tictactoe_core::protocol::{AbandonReason, OutcomeView};
use tictactoe_core::{
    Board, Evaluation, GameSnapshot, Mark, MatchId, MatchMode, MatchState, ServerMessage,
};
use tokio::time::Instant;

use crate::config::MatchConfig;
use crate::error::{LifecycleError, ValidationError};
use crate::ledger::{OutcomeReason, RatedPlayer, RatedResult};
use crate::reconnect::{LivenessEvent, ReconnectMonitor};
use crate::rematch::{RematchNegotiator, Vote};

pub const PRACTICE_BOT_ID: &str = "practice-bot";
const PRACTICE_BOT_NAME: &str = "Practice Bot";

/// Someone taking one of the two places in a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub user_id: String,
    pub display_name: String,
}

impl Seat {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    pub fn practice_bot() -> Self {
        Self::new(PRACTICE_BOT_ID, PRACTICE_BOT_NAME)
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub seat: Seat,
    pub mark: Mark,
    last_move_seq: Option<u64>,
    monitor: ReconnectMonitor,
}

impl Player {
    fn new(seat: Seat, mark: Mark, grace: Duration) -> Self {
        Self {
            seat,
            mark,
            last_move_seq: None,
            monitor: ReconnectMonitor::new(grace),
        }
    }

    pub fn id(&self) -> &str {
        &self.seat.user_id
    }

    pub fn is_bot(&self) -> bool {
        self.seat.user_id == PRACTICE_BOT_ID
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    fn rated(&self) -> RatedPlayer {
        RatedPlayer {
            user_id: self.seat.user_id.clone(),
            display_name: self.seat.display_name.clone(),
        }
    }
}

/// Terminal result, indexed by player slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win { winner: usize, line: [usize; 3] },
    Draw,
    Abandoned { forfeit_by: usize, reason: OutcomeReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Per-move clock for whoever is to move (timed mode only).
    MoveClock,
    /// Reconnect grace for the given player slot.
    Grace(usize),
    /// Lifetime of a finished match waiting for rematch votes.
    RematchWindow,
}

/// Everything that can happen to a match. Processed strictly one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
    Move {
        player_id: String,
        position: usize,
        move_seq: u64,
    },
    Connected {
        player_id: String,
    },
    Disconnected {
        player_id: String,
    },
    RequestRematch {
        player_id: String,
    },
    Sync {
        player_id: String,
    },
    TimerFired {
        timer: TimerKind,
        generation: u64,
    },
}

#[derive(Debug)]
pub enum Effect {
    Send {
        to: String,
        message: ServerMessage,
    },
    Schedule {
        timer: TimerKind,
        after: Duration,
        generation: u64,
    },
    Cancel(TimerKind),
    CancelAll,
    RecordOutcome {
        result: RatedResult,
        reason: OutcomeReason,
    },
    /// A freshly bound successor plus its own opening effects.
    SpawnSuccessor {
        coordinator: Box<MatchCoordinator>,
        effects: Vec<Effect>,
    },
    /// Tear the match down and drop it from the registry.
    Dispose,
}

#[derive(Debug)]
pub struct MatchCoordinator {
    id: MatchId,
    mode: MatchMode,
    config: MatchConfig,
    state: MatchState,
    outcome: Option<Outcome>,
    board: Board,
    players: Vec<Player>,
    turn: usize,
    rematch: RematchNegotiator,
    outcome_recorded: bool,
    armed: HashMap<TimerKind, u64>,
    next_generation: u64,
    created_at: Instant,
    updated_at: Instant,
}

impl MatchCoordinator {
    pub fn new(id: MatchId, mode: MatchMode, config: MatchConfig, now: Instant) -> Self {
        Self {
            id,
            mode,
            config,
            state: MatchState::WaitingForPlayers,
            outcome: None,
            board: Board::new(),
            players: Vec::with_capacity(2),
            turn: 0,
            rematch: RematchNegotiator::new(),
            outcome_recorded: false,
            armed: HashMap::new(),
            next_generation: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &MatchId {
        &self.id
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn turn(&self) -> usize {
        self.turn
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the board or state last changed.
    pub fn updated_at(&self) -> Instant {
        self.updated_at
    }

    pub fn winning_line(&self) -> Option<[usize; 3]> {
        match self.outcome {
            Some(Outcome::Win { line, .. }) => Some(line),
            _ => None,
        }
    }

    pub fn is_timer_armed(&self, timer: TimerKind) -> bool {
        self.armed.contains_key(&timer)
    }

    /// Seat both players: slot 0 plays X and moves first.
    pub fn bind_players(&mut self, seats: [Seat; 2], now: Instant) -> Vec<Effect> {
        debug_assert_eq!(self.state, MatchState::WaitingForPlayers);
        let [x, o] = seats;
        let grace = self.config.grace_period;
        self.players = vec![Player::new(x, Mark::X, grace), Player::new(o, Mark::O, grace)];
        self.state = MatchState::InProgress;
        self.turn = 0;
        self.updated_at = now;

        let mut effects: Vec<Effect> = (0..2)
            .filter(|&i| !self.players[i].is_bot())
            .map(|i| self.send(i, self.joined_message(i)))
            .collect();
        self.play_bot_turns();
        self.after_turn_change(&mut effects);
        self.broadcast_state(&mut effects);
        effects
    }

    pub fn handle(&mut self, event: MatchEvent, now: Instant) -> Result<Vec<Effect>, HandleError> {
        match event {
            MatchEvent::Move {
                player_id,
                position,
                move_seq,
            } => Ok(self.apply_move(&player_id, position, move_seq, now)?),
            MatchEvent::Connected { player_id } => Ok(self.player_connected(&player_id, now)),
            MatchEvent::Disconnected { player_id } => Ok(self.player_disconnected(&player_id, now)),
            MatchEvent::RequestRematch { player_id } => {
                Ok(self.request_rematch(&player_id, now)?)
            }
            MatchEvent::Sync { player_id } => Ok(self.sync(&player_id)?),
            MatchEvent::TimerFired { timer, generation } => {
                Ok(self.timer_fired(timer, generation, now)?)
            }
        }
    }

    pub fn apply_move(
        &mut self,
        player_id: &str,
        position: usize,
        move_seq: u64,
        now: Instant,
    ) -> Result<Vec<Effect>, ValidationError> {
        let idx = self.slot_of(player_id)?;

        // A retried request is answered with the current state, never re-applied.
        if self.players[idx].last_move_seq.is_some_and(|seen| move_seq <= seen) {
            return Ok(vec![self.send(idx, self.state_message())]);
        }
        if self.state != MatchState::InProgress {
            return Err(ValidationError::NotInProgress);
        }
        if self.is_paused() {
            return Err(ValidationError::MatchPaused);
        }
        if self.turn != idx {
            return Err(ValidationError::NotYourTurn);
        }
        self.board = self.board.apply_mark(position, self.players[idx].mark)?;
        self.players[idx].last_move_seq = Some(move_seq);
        self.updated_at = now;

        let mut effects = Vec::new();
        self.settle_after_mark();
        self.play_bot_turns();
        self.after_turn_change(&mut effects);
        self.broadcast_state(&mut effects);
        Ok(effects)
    }

    pub fn player_connected(&mut self, player_id: &str, now: Instant) -> Vec<Effect> {
        let Ok(idx) = self.slot_of(player_id) else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        if let Some(LivenessEvent::Restored { .. }) = self.players[idx].monitor.transport_restored(now) {
            effects.extend(self.disarm(TimerKind::Grace(idx)));
            if let Some(opp) = self.human_opponent(idx) {
                effects.push(self.send(opp, ServerMessage::PlayerReconnected));
            }
            if self.state == MatchState::InProgress && !self.is_paused() {
                self.arm_move_clock(&mut effects);
            }
        }
        effects.push(self.send(idx, self.joined_message(idx)));
        effects.push(self.send(idx, self.state_message()));
        effects
    }

    pub fn player_disconnected(&mut self, player_id: &str, now: Instant) -> Vec<Effect> {
        let Ok(idx) = self.slot_of(player_id) else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        if self.players[idx].monitor.transport_dropped(now) != Some(LivenessEvent::Dropped) {
            return effects;
        }
        if let Some(opp) = self.human_opponent(idx) {
            effects.push(self.send(opp, ServerMessage::OpponentDisconnected));
        }
        if self.state == MatchState::InProgress {
            effects.extend(self.disarm(TimerKind::MoveClock));
            let grace = self.players[idx].monitor.grace();
            effects.push(self.arm(TimerKind::Grace(idx), grace));
        }
        effects
    }

    pub fn request_rematch(
        &mut self,
        player_id: &str,
        now: Instant,
    ) -> Result<Vec<Effect>, ValidationError> {
        let idx = self.slot_of(player_id)?;
        let ids = [self.players[0].id().to_string(), self.players[1].id().to_string()];
        let pair = [ids[0].as_str(), ids[1].as_str()];

        let mut vote = self.rematch.vote(&self.id, self.state, pair, player_id)?;
        if let Some(bot) = self.players.iter().position(|p| p.is_bot()) {
            if vote == Vote::Recorded {
                vote = self.rematch.vote(&self.id, self.state, pair, &ids[bot])?;
            }
        }

        let mut effects = Vec::new();
        match vote {
            Vote::Duplicate => {}
            Vote::Recorded => {
                let msg = ServerMessage::RematchRequest {
                    player_id: self.players[idx].id().to_string(),
                };
                self.broadcast(&mut effects, msg);
            }
            Vote::Ready => {
                let successor_id = crate::state::generate_match_id();
                let mut successor =
                    MatchCoordinator::new(successor_id.clone(), self.mode, self.config, now);
                // Marks swap; slot 0 is always X and moves first.
                let seats = [self.players[1].seat.clone(), self.players[0].seat.clone()];
                let opening = successor.bind_players(seats, now);

                self.rematch.supersede(successor_id.clone());
                effects.push(self.cancel_all());
                self.broadcast(
                    &mut effects,
                    ServerMessage::RematchReady {
                        new_match_id: successor_id,
                    },
                );
                effects.push(Effect::SpawnSuccessor {
                    coordinator: Box::new(successor),
                    effects: opening,
                });
                effects.push(Effect::Dispose);
            }
        }
        Ok(effects)
    }

    pub fn sync(&self, player_id: &str) -> Result<Vec<Effect>, ValidationError> {
        let idx = self.slot_of(player_id)?;
        Ok(vec![self.send(idx, self.state_message())])
    }

    pub fn timer_fired(
        &mut self,
        timer: TimerKind,
        generation: u64,
        now: Instant,
    ) -> Result<Vec<Effect>, LifecycleError> {
        if self.armed.get(&timer) != Some(&generation) {
            return Err(LifecycleError::StaleTimerFired {
                timer: format!("{timer:?}"),
                generation,
            });
        }
        self.armed.remove(&timer);

        let mut effects = Vec::new();
        match timer {
            TimerKind::Grace(idx) => {
                if self.state == MatchState::InProgress
                    && self.players[idx].monitor.grace_expired() == Some(LivenessEvent::Forfeit)
                {
                    self.forfeit(idx, OutcomeReason::OpponentTimeout, now, &mut effects);
                }
            }
            TimerKind::MoveClock => {
                if self.state == MatchState::InProgress {
                    let on_clock = self.turn;
                    self.forfeit(on_clock, OutcomeReason::MoveTimeout, now, &mut effects);
                }
            }
            TimerKind::RematchWindow => {
                effects.push(self.cancel_all());
                effects.push(Effect::Dispose);
            }
        }
        Ok(effects)
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            match_id: self.id.clone(),
            board: self.board.to_wire(),
            turn: self
                .players
                .get(self.turn)
                .map(|p| p.mark)
                .unwrap_or(Mark::X),
            state: self.state,
            outcome: self.outcome.map(|o| self.outcome_view(o)),
        }
    }

    /// Moves wait while any player is disconnected.
    pub fn is_paused(&self) -> bool {
        self.players.iter().any(|p| !p.is_connected())
    }

    fn forfeit(&mut self, idx: usize, reason: OutcomeReason, now: Instant, effects: &mut Vec<Effect>) {
        self.state = MatchState::Finished;
        self.outcome = Some(Outcome::Abandoned {
            forfeit_by: idx,
            reason,
        });
        self.rematch.reset();
        self.updated_at = now;
        self.finish_effects(effects);
        self.broadcast_state(effects);
    }

    /// Evaluate after a mark was written: finish or pass the turn.
    fn settle_after_mark(&mut self) {
        match self.board.evaluate() {
            Evaluation::Win { line, .. } => {
                self.state = MatchState::Finished;
                self.outcome = Some(Outcome::Win {
                    winner: self.turn,
                    line,
                });
            }
            Evaluation::Draw => {
                self.state = MatchState::Finished;
                self.outcome = Some(Outcome::Draw);
            }
            Evaluation::Ongoing => {
                self.turn = 1 - self.turn;
            }
        }
    }

    /// Let the practice responder move for as long as it holds the turn.
    fn play_bot_turns(&mut self) {
        while self.state == MatchState::InProgress && self.players[self.turn].is_bot() {
            let Some(position) = practice::choose_move(&self.board) else {
                return;
            };
            let mark = self.players[self.turn].mark;
            match self.board.apply_mark(position, mark) {
                Ok(next) => self.board = next,
                Err(_) => return,
            }
            self.settle_after_mark();
        }
    }

    fn after_turn_change(&mut self, effects: &mut Vec<Effect>) {
        if self.state == MatchState::InProgress {
            self.arm_move_clock(effects);
        } else if self.state == MatchState::Finished {
            self.finish_effects(effects);
        }
    }

    /// Replenish the clock for whoever is to move. Only in timed mode.
    fn arm_move_clock(&mut self, effects: &mut Vec<Effect>) {
        if self.mode == MatchMode::Timed {
            let budget = self.config.move_budget;
            effects.push(self.arm(TimerKind::MoveClock, budget));
        }
    }

    fn finish_effects(&mut self, effects: &mut Vec<Effect>) {
        effects.push(self.cancel_all());
        if let Some(result) = self.rated_result() {
            debug_assert!(!self.outcome_recorded, "outcome recorded twice for {}", self.id);
            if !self.outcome_recorded {
                self.outcome_recorded = true;
                let reason = match self.outcome {
                    Some(Outcome::Abandoned { reason, .. }) => reason,
                    _ => OutcomeReason::Completed,
                };
                effects.push(Effect::RecordOutcome { result, reason });
            }
        }
        let window = self.config.rematch_window;
        effects.push(self.arm(TimerKind::RematchWindow, window));
    }

    /// Practice matches are never rated.
    fn rated_result(&self) -> Option<RatedResult> {
        if self.players.iter().any(|p| p.is_bot()) {
            return None;
        }
        match self.outcome? {
            Outcome::Win { winner, .. } => Some(RatedResult::Win {
                winner: self.players[winner].rated(),
                loser: self.players[1 - winner].rated(),
            }),
            Outcome::Abandoned { forfeit_by, .. } => Some(RatedResult::Win {
                winner: self.players[1 - forfeit_by].rated(),
                loser: self.players[forfeit_by].rated(),
            }),
            Outcome::Draw => Some(RatedResult::Draw {
                players: [self.players[0].rated(), self.players[1].rated()],
            }),
        }
    }

    fn arm(&mut self, timer: TimerKind, after: Duration) -> Effect {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.armed.insert(timer, generation);
        Effect::Schedule {
            timer,
            after,
            generation,
        }
    }

    fn disarm(&mut self, timer: TimerKind) -> Option<Effect> {
        self.armed.remove(&timer).map(|_| Effect::Cancel(timer))
    }

    fn cancel_all(&mut self) -> Effect {
        self.armed.clear();
        Effect::CancelAll
    }

    fn slot_of(&self, player_id: &str) -> Result<usize, ValidationError> {
        self.players
            .iter()
            .position(|p| p.id() == player_id)
            .ok_or_else(|| ValidationError::UnknownMatch(self.id.clone()))
    }

    fn human_opponent(&self, idx: usize) -> Option<usize> {
        let opp = 1 - idx;
        self.players
            .get(opp)
            .filter(|p| !p.is_bot())
            .map(|_| opp)
    }

    fn send(&self, idx: usize, message: ServerMessage) -> Effect {
        Effect::Send {
            to: self.players[idx].id().to_string(),
            message,
        }
    }

    fn broadcast(&self, effects: &mut Vec<Effect>, message: ServerMessage) {
        for (i, p) in self.players.iter().enumerate() {
            if !p.is_bot() {
                effects.push(self.send(i, message.clone()));
            }
        }
    }

    fn broadcast_state(&self, effects: &mut Vec<Effect>) {
        self.broadcast(effects, self.state_message());
    }

    fn state_message(&self) -> ServerMessage {
        ServerMessage::GameState(self.snapshot())
    }

    fn joined_message(&self, idx: usize) -> ServerMessage {
        ServerMessage::MatchJoined {
            match_id: self.id.clone(),
            your_mark: self.players[idx].mark,
            opponent_name: self.players[1 - idx].seat.display_name.clone(),
            mode: self.mode,
        }
    }

    fn outcome_view(&self, outcome: Outcome) -> OutcomeView {
        match outcome {
            Outcome::Win { winner, line } => OutcomeView::Win {
                winner: self.players[winner].mark,
                line,
            },
            Outcome::Draw => OutcomeView::Draw,
            Outcome::Abandoned { forfeit_by, reason } => OutcomeView::Abandoned {
                forfeit_by: self.players[forfeit_by].mark,
                reason: match reason {
                    OutcomeReason::MoveTimeout => AbandonReason::MoveTimeout,
                    _ => AbandonReason::Disconnected,
                },
            },
        }
    }
}

/// Either kind of failure from [`MatchCoordinator::handle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
