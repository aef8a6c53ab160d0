pub mod board;
pub mod practice;
pub mod protocol;
pub mod rating;
pub mod view;

pub use board::{Board, BoardError, Cell, Evaluation, Mark};
pub use protocol::{ClientMessage, ErrorKind, GameSnapshot, MatchId, MatchMode, MatchState, ServerMessage};
pub use rating::{DEFAULT_RATING, RatingDeltas, RatingRecord};
