use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of cells on the grid.
pub const CELLS: usize = 9;

/// The 8 fixed triples: rows, columns, diagonals.
pub const WIN_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn other(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mark::X => "X",
            Mark::O => "O",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Mark(Mark),
}

impl Cell {
    pub fn mark(&self) -> Option<Mark> {
        match self {
            Cell::Mark(m) => Some(*m),
            Cell::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Wire form: `""`, `"X"` or `"O"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Cell::Empty => "",
            Cell::Mark(m) => m.as_str(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("position {0} is outside the board")]
    OutOfRange(usize),
    #[error("cell {0} is already occupied")]
    CellOccupied(usize),
}

/// Result of scanning a board for a terminal condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Evaluation {
    Ongoing,
    Win { line: [usize; 3], mark: Mark },
    Draw,
}

impl Evaluation {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Evaluation::Ongoing)
    }
}

/// Immutable 3x3 grid snapshot, cells indexed row-major 0..9.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Board {
    cells: [Cell; CELLS],
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cells(cells: [Cell; CELLS]) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Cell; CELLS] {
        &self.cells
    }

    pub fn get(&self, position: usize) -> Option<Cell> {
        self.cells.get(position).copied()
    }

    /// Return a new board with `mark` written at `position`.
    pub fn apply_mark(&self, position: usize, mark: Mark) -> Result<Board, BoardError> {
        let cell = self
            .cells
            .get(position)
            .ok_or(BoardError::OutOfRange(position))?;
        if !cell.is_empty() {
            return Err(BoardError::CellOccupied(position));
        }
        let mut next = *self;
        next.cells[position] = Cell::Mark(mark);
        Ok(next)
    }

    /// Win is checked before draw, so a final move that completes a line
    /// on a full board scores as a win.
    pub fn evaluate(&self) -> Evaluation {
        for line in WIN_LINES {
            let [a, b, c] = line;
            if let Some(mark) = self.cells[a].mark() {
                if self.cells[b].mark() == Some(mark) && self.cells[c].mark() == Some(mark) {
                    return Evaluation::Win { line, mark };
                }
            }
        }
        if self.is_full() {
            Evaluation::Draw
        } else {
            Evaluation::Ongoing
        }
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|c| !c.is_empty())
    }

    pub fn mark_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    pub fn empty_positions(&self) -> Vec<usize> {
        (0..CELLS).filter(|&i| self.cells[i].is_empty()).collect()
    }

    pub fn to_wire(&self) -> Vec<String> {
        self.cells.iter().map(|c| c.as_str().to_string()).collect()
    }

    /// Parse the wire form back into a board. Unknown strings are rejected.
    pub fn from_wire(cells: &[String]) -> Option<Board> {
        if cells.len() != CELLS {
            return None;
        }
        let mut board = Board::new();
        for (i, s) in cells.iter().enumerate() {
            board.cells[i] = match s.as_str() {
                "" => Cell::Empty,
                "X" => Cell::Mark(Mark::X),
                "O" => Cell::Mark(Mark::O),
                _ => return None,
            };
        }
        Some(board)
    }
}
