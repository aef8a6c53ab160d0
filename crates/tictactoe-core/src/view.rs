//! Client-side view of one match.
//!
//! The server is the only source of truth. A client may draw its own move
//! immediately, but the drawing is always derived from the last acknowledged
//! `game_state` plus at most one pending move, so a rejection simply drops the
//! pending move instead of undoing anything by hand.

use crate::board::{Board, Mark};
use crate::protocol::{ClientMessage, GameSnapshot, MatchId, MatchState, ServerMessage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PendingMove {
    position: usize,
    move_seq: u64,
}

#[derive(Debug, Clone)]
pub struct MatchView {
    match_id: MatchId,
    my_mark: Mark,
    acknowledged: Option<GameSnapshot>,
    pending: Option<PendingMove>,
    next_seq: u64,
}

impl MatchView {
    pub fn new(match_id: MatchId, my_mark: Mark) -> Self {
        Self {
            match_id,
            my_mark,
            acknowledged: None,
            pending: None,
            next_seq: 1,
        }
    }

    pub fn match_id(&self) -> &MatchId {
        &self.match_id
    }

    pub fn my_mark(&self) -> Mark {
        self.my_mark
    }

    pub fn acknowledged(&self) -> Option<&GameSnapshot> {
        self.acknowledged.as_ref()
    }

    pub fn has_pending_move(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_my_turn(&self) -> bool {
        self.pending.is_none()
            && self
                .acknowledged
                .as_ref()
                .is_some_and(|s| s.state == MatchState::InProgress && s.turn == self.my_mark)
    }

    /// Board to render: acknowledged state with the pending move drawn on top.
    pub fn board(&self) -> Board {
        let base = self
            .acknowledged
            .as_ref()
            .and_then(|s| Board::from_wire(&s.board))
            .unwrap_or_default();
        match self.pending {
            Some(p) => base.apply_mark(p.position, self.my_mark).unwrap_or(base),
            None => base,
        }
    }

    /// Start an optimistic move. Returns the request to send, or `None` if
    /// the move cannot be legal from the acknowledged state.
    pub fn propose_move(&mut self, position: usize) -> Option<ClientMessage> {
        if !self.is_my_turn() {
            return None;
        }
        self.board().apply_mark(position, self.my_mark).ok()?;
        let move_seq = self.next_seq;
        self.next_seq += 1;
        self.pending = Some(PendingMove { position, move_seq });
        Some(self.move_message(position, move_seq))
    }

    /// Same request as the pending one, for resending after a transport hiccup.
    pub fn retry_pending(&self) -> Option<ClientMessage> {
        self.pending
            .map(|p| self.move_message(p.position, p.move_seq))
    }

    /// Fold a server message into the view.
    pub fn apply(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::GameState(snapshot) if snapshot.match_id == self.match_id => {
                self.acknowledged = Some(snapshot.clone());
                self.pending = None;
            }
            ServerMessage::Error { .. } => {
                self.pending = None;
            }
            _ => {}
        }
    }

    fn move_message(&self, position: usize, move_seq: u64) -> ClientMessage {
        ClientMessage::Move {
            match_id: self.match_id.clone(),
            position,
            move_seq,
        }
    }
}
