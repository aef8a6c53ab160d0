//! Global rating store shared by every match.
//!
//! Different users are updated independently; updates to the same user are
//! serialized by the map's entry lock. Each match id can be recorded once.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tictactoe_core::protocol::LeaderboardEntry;
use tictactoe_core::{MatchId, RatingDeltas, RatingRecord};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatedPlayer {
    pub user_id: String,
    pub display_name: String,
}

/// Result of a finished match from the ledger's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatedResult {
    Win { winner: RatedPlayer, loser: RatedPlayer },
    Draw { players: [RatedPlayer; 2] },
}

/// Why a match finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeReason {
    Completed,
    OpponentTimeout,
    MoveTimeout,
}

impl OutcomeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeReason::Completed => "completed",
            OutcomeReason::OpponentTimeout => "opponent_timeout",
            OutcomeReason::MoveTimeout => "move_timeout",
        }
    }
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's record after an outcome was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingChange {
    pub user_id: String,
    pub delta: i32,
    pub record: RatingRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("outcome for match {0} already recorded")]
    AlreadyRecorded(MatchId),
}

pub struct RatingLedger {
    deltas: RatingDeltas,
    records: DashMap<String, RatingRecord>,
    recorded: DashMap<MatchId, OutcomeReason>,
}

impl RatingLedger {
    pub fn new(deltas: RatingDeltas) -> Self {
        Self {
            deltas,
            records: DashMap::new(),
            recorded: DashMap::new(),
        }
    }

    /// Load a persisted record, replacing whatever is in memory.
    pub fn seed(&self, user_id: &str, record: RatingRecord) {
        self.records.insert(user_id.to_string(), record);
    }

    /// Unseen users report the default rating.
    pub fn lookup(&self, user_id: &str) -> RatingRecord {
        self.records
            .get(user_id)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| RatingRecord::new(user_id))
    }

    pub fn is_recorded(&self, match_id: &MatchId) -> bool {
        self.recorded.contains_key(match_id)
    }

    pub fn record_outcome(
        &self,
        match_id: &MatchId,
        result: &RatedResult,
        reason: OutcomeReason,
    ) -> Result<Vec<RatingChange>, LedgerError> {
        match self.recorded.entry(match_id.clone()) {
            Entry::Occupied(_) => return Err(LedgerError::AlreadyRecorded(match_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(reason);
            }
        }

        let changes = match result {
            RatedResult::Win { winner, loser } => vec![
                self.apply(winner, |r, d| r.apply_win(d)),
                self.apply(loser, |r, d| r.apply_loss(d)),
            ],
            RatedResult::Draw { players } => players
                .iter()
                .map(|p| self.apply(p, |r, d| r.apply_draw(d)))
                .collect(),
        };

        info!(
            match_id = %match_id,
            reason = %reason,
            changes = ?changes.iter().map(|c| (&c.user_id, c.delta)).collect::<Vec<_>>(),
            "recorded match outcome"
        );
        Ok(changes)
    }

    /// Top `limit` users by rating, ties broken by user id.
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut rows: Vec<(String, RatingRecord)> = self
            .records
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        rows.sort_by(|a, b| b.1.rating.cmp(&a.1.rating).then_with(|| a.0.cmp(&b.0)));
        rows.into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (user_id, r))| LeaderboardEntry {
                rank: (i + 1) as u32,
                user_id,
                display_name: r.display_name,
                rating: r.rating,
                wins: r.wins,
                losses: r.losses,
                draws: r.draws,
            })
            .collect()
    }

    fn apply<F>(&self, player: &RatedPlayer, f: F) -> RatingChange
    where
        F: FnOnce(&mut RatingRecord, &RatingDeltas) -> i32,
    {
        let mut record = self
            .records
            .entry(player.user_id.clone())
            .or_insert_with(|| RatingRecord::new(player.display_name.clone()));
        record.display_name = player.display_name.clone();
        let delta = f(&mut *record, &self.deltas);
        RatingChange {
            user_id: player.user_id.clone(),
            delta,
            record: record.clone(),
        }
    }
}
