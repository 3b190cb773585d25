//! Chess rules adapter over `shakmaty`.
//!
//! The rest of the server never touches `shakmaty` directly: moves go in and come
//! out as coordinate (UCI) strings, sides are [`Team`]s and results are
//! [`BoardOutcome`]s. Votes may name a move either in coordinate form (`e2e4`,
//! `a7a8q`) or in standard algebraic notation (`e4`, `Nf3`, `O-O`).

use shakmaty::{
    fen::Fen,
    san::SanPlus,
    uci::UciMove,
    zobrist::{Zobrist64, ZobristHash},
    CastlingMode, Chess, Color, EnPassantMode, File, Move, Position, Rank, Square,
};
use shared::{GameEndReason, Team, Winner};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),

    #[error("illegal move: {0}")]
    IllegalMove(String),
}

/// Terminal result of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardOutcome {
    pub winner: Winner,
    pub reason: GameEndReason,
}

fn team_of(color: Color) -> Team {
    match color {
        Color::White => Team::White,
        Color::Black => Team::Black,
    }
}

#[derive(Debug, Clone)]
pub struct Board {
    position: Chess,
    resigned: Option<Team>,
    repetitions: HashMap<u64, u32>,
}

impl Board {
    pub fn new() -> Self {
        Self::with_position(Chess::default())
    }

    pub fn from_fen(fen: &str) -> Result<Self, BoardError> {
        let fen: Fen = fen
            .parse()
            .map_err(|e| BoardError::InvalidFen(format!("{e}")))?;
        let position: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|e| BoardError::InvalidFen(format!("{e}")))?;
        Ok(Self::with_position(position))
    }

    fn with_position(position: Chess) -> Self {
        let mut board = Self {
            position,
            resigned: None,
            repetitions: HashMap::new(),
        };
        board.record_position();
        board
    }

    pub fn turn(&self) -> Team {
        team_of(self.position.turn())
    }

    /// Legal moves of the side to move, in coordinate notation.
    pub fn legal_moves(&self) -> Vec<String> {
        if self.resigned.is_some() {
            return Vec::new();
        }
        self.position.legal_moves().iter().map(to_uci).collect()
    }

    /// Finds the legal move named by `notation`, trying coordinate form first and
    /// algebraic notation second. A four-character coordinate move that only
    /// matches as a promotion is read as promoting to a queen.
    pub fn resolve(&self, notation: &str) -> Option<Move> {
        let notation = notation.trim();
        if notation.is_empty() || self.resigned.is_some() {
            return None;
        }

        let legals = self.position.legal_moves();
        let coordinate = notation.to_ascii_lowercase();
        let find = |uci: &str| legals.iter().find(|m| to_uci(m) == uci).cloned();

        if let Some(m) = find(&coordinate) {
            return Some(m);
        }
        if coordinate.len() == 4 {
            if let Some(m) = find(&format!("{coordinate}q")) {
                return Some(m);
            }
        }

        let san: SanPlus = notation.parse().ok()?;
        san.san.to_move(&self.position).ok()
    }

    /// Coordinate form of a legal move, or `None` if `notation` names no legal move.
    pub fn normalize(&self, notation: &str) -> Option<String> {
        self.resolve(notation).map(|m| to_uci(&m))
    }

    /// Plays the move and returns it in coordinate notation.
    pub fn apply(&mut self, notation: &str) -> Result<String, BoardError> {
        let m = self
            .resolve(notation)
            .ok_or_else(|| BoardError::IllegalMove(notation.to_string()))?;
        let uci = to_uci(&m);
        self.position.play_unchecked(&m);
        self.record_position();
        Ok(uci)
    }

    pub fn resign(&mut self, team: Team) {
        self.resigned = Some(team);
    }

    pub fn outcome(&self) -> Option<BoardOutcome> {
        if let Some(team) = self.resigned {
            return Some(BoardOutcome {
                winner: team.opposite().into(),
                reason: GameEndReason::Forfeit,
            });
        }

        if self.position.is_checkmate() {
            // Side to move is mated.
            return Some(BoardOutcome {
                winner: self.turn().opposite().into(),
                reason: GameEndReason::Checkmate,
            });
        }

        let reason = if self.position.is_stalemate() {
            GameEndReason::Stalemate
        } else if self.position.is_insufficient_material() {
            GameEndReason::InsufficientMaterial
        } else if self.repetition_count() >= 3 {
            GameEndReason::ThreefoldRepetition
        } else if self.position.halfmoves() >= 100 {
            GameEndReason::FiftyMoveRule
        } else {
            return None;
        };

        Some(BoardOutcome {
            winner: Winner::Draw,
            reason,
        })
    }

    pub fn is_check(&self) -> bool {
        self.position.is_check()
    }

    pub fn is_checkmate(&self) -> bool {
        self.position.is_checkmate()
    }

    /// 8x8 matrix of piece codes, row 0 is rank 8 and column 0 is the a-file.
    /// White pieces are upper case, black lower case, empty squares "".
    pub fn squares(&self) -> Vec<Vec<String>> {
        let board = self.position.board();
        (0..8u32)
            .map(|row| {
                (0..8u32)
                    .map(|col| {
                        let square = Square::from_coords(File::new(col), Rank::new(7 - row));
                        board
                            .piece_at(square)
                            .map(|piece| piece.char().to_string())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }

    fn repetition_count(&self) -> u32 {
        self.repetitions
            .get(&self.position_key())
            .copied()
            .unwrap_or(0)
    }

    fn record_position(&mut self) {
        let key = self.position_key();
        *self.repetitions.entry(key).or_insert(0) += 1;
    }

    fn position_key(&self) -> u64 {
        self.position
            .zobrist_hash::<Zobrist64>(EnPassantMode::Legal)
            .0
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

fn to_uci(m: &Move) -> String {
    UciMove::from_move(m, CastlingMode::Standard).to_string()
}
