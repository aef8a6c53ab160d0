use std::fmt;

use serde::{Deserialize, Serialize};

use crate::board::Mark;

/// Opaque match identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub String);

impl MatchId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MatchId {
    fn from(s: &str) -> Self {
        MatchId(s.to_string())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Untimed two-player game.
    #[default]
    Classic,
    /// Two-player game with a per-move clock.
    Timed,
    /// One human against the random responder; unrated.
    Practice,
}

/// Monotonic lifecycle of one match instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    #[serde(rename = "waiting")]
    WaitingForPlayers,
    InProgress,
    Finished,
}

/// Terminal result as seen by clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeView {
    Win {
        winner: Mark,
        line: [usize; 3],
    },
    Draw,
    Abandoned {
        #[serde(rename = "forfeitBy")]
        forfeit_by: Mark,
        reason: AbandonReason,
    },
}

/// Why the forfeiting player lost an abandoned match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// Stayed disconnected past the grace period.
    Disconnected,
    /// Ran out the per-move clock in timed mode.
    MoveTimeout,
}

/// Full authoritative state of a match, broadcast after every change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub match_id: MatchId,
    /// 9 cells of `""`, `"X"` or `"O"`.
    pub board: Vec<String>,
    pub turn: Mark,
    pub state: MatchState,
    pub outcome: Option<OutcomeView>,
}

/// Wire error codes. Every rejected request gets one of these inline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotYourTurn,
    CellOccupied,
    OutOfRange,
    NotInProgress,
    InvalidRematchTarget,
    MatchPaused,
    UnknownMatch,
    MalformedMessage,
    RateLimited,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    FindMatch {
        #[serde(default)]
        mode: MatchMode,
    },
    Move {
        match_id: MatchId,
        position: usize,
        move_seq: u64,
    },
    RequestRematch {
        match_id: MatchId,
    },
    /// Ask for the current game_state again.
    Sync {
        match_id: MatchId,
    },
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    WaitingForOpponent {
        mode: MatchMode,
    },
    MatchJoined {
        match_id: MatchId,
        your_mark: Mark,
        opponent_name: String,
        mode: MatchMode,
    },
    GameState(GameSnapshot),
    OpponentDisconnected,
    PlayerReconnected,
    RematchRequest {
        player_id: String,
    },
    RematchReady {
        new_match_id: MatchId,
    },
    RatingUpdate {
        rating: i32,
        delta: i32,
        wins: u32,
        losses: u32,
        draws: u32,
    },
    Error {
        code: ErrorKind,
        message: String,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(code: ErrorKind, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// Leaderboard entry returned by REST API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub display_name: String,
    pub rating: i32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

/// Player profile returned by REST API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub user_id: String,
    pub display_name: String,
    pub rating: i32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}
