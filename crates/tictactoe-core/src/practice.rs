use rand::RngExt;

use crate::board::Board;

/// Pick a uniformly random empty cell, or `None` on a full board.
pub fn choose_move(board: &Board) -> Option<usize> {
    let empty = board.empty_positions();
    if empty.is_empty() {
        return None;
    }
    let mut rng = rand::rng();
    Some(empty[rng.random_range(0..empty.len())])
}
