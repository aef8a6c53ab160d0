use serde::{Deserialize, Serialize};

/// Rating assigned to a user the first time the ledger sees them.
pub const DEFAULT_RATING: i32 = 1000;

/// Fixed rating adjustments applied per finished match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDeltas {
    pub win: i32,
    /// Subtracted from the loser; the result is floored at 0.
    pub loss: i32,
    pub draw: i32,
}

impl Default for RatingDeltas {
    fn default() -> Self {
        Self {
            win: 10,
            loss: 5,
            draw: 2,
        }
    }
}

/// Per-user rating and win/loss/draw counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub display_name: String,
    pub rating: i32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl RatingRecord {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            rating: DEFAULT_RATING,
            wins: 0,
            losses: 0,
            draws: 0,
        }
    }

    /// Apply a win and return the signed rating change.
    pub fn apply_win(&mut self, deltas: &RatingDeltas) -> i32 {
        self.wins += 1;
        self.shift(deltas.win)
    }

    pub fn apply_loss(&mut self, deltas: &RatingDeltas) -> i32 {
        self.losses += 1;
        self.shift(-deltas.loss)
    }

    pub fn apply_draw(&mut self, deltas: &RatingDeltas) -> i32 {
        self.draws += 1;
        self.shift(deltas.draw)
    }

    fn shift(&mut self, delta: i32) -> i32 {
        let before = self.rating;
        self.rating = (self.rating + delta).max(0);
        self.rating - before
    }
}
