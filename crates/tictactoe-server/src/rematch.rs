use std::collections::BTreeSet;

use tictactoe_core::{MatchId, MatchState};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// First vote from this player; still waiting on the other one.
    Recorded,
    /// Player had already voted. Nothing changes.
    Duplicate,
    /// Both players have voted; the caller must create the successor now.
    Ready,
}

/// Rematch votes for one finished match.
#[derive(Debug, Clone, Default)]
pub struct RematchNegotiator {
    votes: BTreeSet<String>,
    successor: Option<MatchId>,
}

impl RematchNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn votes(&self) -> &BTreeSet<String> {
        &self.votes
    }

    pub fn successor(&self) -> Option<&MatchId> {
        self.successor.as_ref()
    }

    pub fn vote(
        &mut self,
        match_id: &MatchId,
        state: MatchState,
        players: [&str; 2],
        player_id: &str,
    ) -> Result<Vote, ValidationError> {
        if self.successor.is_some()
            || state != MatchState::Finished
            || !players.contains(&player_id)
        {
            return Err(ValidationError::InvalidRematchTarget(match_id.clone()));
        }
        if !self.votes.insert(player_id.to_string()) {
            return Ok(Vote::Duplicate);
        }
        if players.iter().all(|p| self.votes.contains(*p)) {
            Ok(Vote::Ready)
        } else {
            Ok(Vote::Recorded)
        }
    }

    /// Record the successor. All later votes fail.
    pub fn supersede(&mut self, successor: MatchId) {
        self.votes.clear();
        self.successor = Some(successor);
    }

    pub fn reset(&mut self) {
        self.votes.clear();
    }
}
