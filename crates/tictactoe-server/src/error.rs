use thiserror::Error;
use tictactoe_core::{BoardError, ErrorKind, MatchId};

/// A rejected client request. Match state is left unchanged and the client
/// may retry with corrected input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("cell {0} is already occupied")]
    CellOccupied(usize),
    #[error("position {0} is outside the board")]
    OutOfRange(usize),
    #[error("match is not in progress")]
    NotInProgress,
    #[error("match {0} cannot take rematch votes")]
    InvalidRematchTarget(MatchId),
    #[error("match is paused while a player is disconnected")]
    MatchPaused,
    #[error("unknown match {0}")]
    UnknownMatch(MatchId),
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::NotYourTurn => ErrorKind::NotYourTurn,
            ValidationError::CellOccupied(_) => ErrorKind::CellOccupied,
            ValidationError::OutOfRange(_) => ErrorKind::OutOfRange,
            ValidationError::NotInProgress => ErrorKind::NotInProgress,
            ValidationError::InvalidRematchTarget(_) => ErrorKind::InvalidRematchTarget,
            ValidationError::MatchPaused => ErrorKind::MatchPaused,
            ValidationError::UnknownMatch(_) => ErrorKind::UnknownMatch,
        }
    }
}

impl From<BoardError> for ValidationError {
    fn from(err: BoardError) -> Self {
        match err {
            BoardError::OutOfRange(p) => ValidationError::OutOfRange(p),
            BoardError::CellOccupied(p) => ValidationError::CellOccupied(p),
        }
    }
}

/// Internal bookkeeping violations. Never shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("outcome for match {0} was already recorded")]
    DuplicateOutcomeRecording(MatchId),
    #[error("timer {timer} (generation {generation}) fired after it was cancelled")]
    StaleTimerFired { timer: String, generation: u64 },
}
