//! Interface to the external game oracle.
//!
//! The chess rule engine is not part of this crate. Everything a trainer
//! needs from it is expressed here: the [`Player`] capability set through
//! which the oracle drives an agent, and the [`Game`]/[`GameOracle`] traits
//! through which a trainer runs complete self-play games.

use serde::{Deserialize, Serialize};

use crate::types::Square;

/// Side to move / piece ownership.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct Piece {
    pub color: Color,
    pub kind: PieceKind,
}

/// A requested or taken move. Legality is the oracle's concern.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
}

impl Move {
    pub fn new(from: Square, to: Square) -> Self {
        Move {
            from,
            to,
            promotion: None,
        }
    }
}

/// Why the game ended, as reported by the oracle.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum WinReason {
    KingCapture,
    Timeout,
    Resignation,
}

/// Result of the agent's own move attempt, as reported by the oracle.
#[derive(Clone, Debug)]
pub struct MoveResult {
    pub requested: Option<Move>,
    pub taken: Option<Move>,
    pub captured_opponent: bool,
    pub capture_square: Option<Square>,
}

/// Move record of a finished game. Opaque to the trainer; forwarded to
/// agents at game end.
#[derive(Clone, Debug, Default)]
pub struct GameHistory {
    pub moves: Vec<(Color, Option<Move>)>,
}

/// Terminal report of one complete game.
#[derive(Clone, Debug)]
pub struct GameOutcome {
    pub winner: Option<Color>,
    pub win_reason: Option<WinReason>,
    pub history: GameHistory,
}

/// Error raised by the oracle during play. The trainer treats any such
/// error as fatal for the whole run.
#[derive(Clone, Debug)]
pub struct GameError {
    pub message: String,
}

impl GameError {
    pub fn new(message: impl Into<String>) -> Self {
        GameError {
            message: message.into(),
        }
    }
}

impl std::error::Error for GameError {}

impl std::fmt::Display for GameError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Initial placement of pieces, square-indexed.
pub type BoardSetup = [Option<Piece>; 64];

/// The standard initial placement, known to both players at game start.
pub fn standard_setup() -> BoardSetup {
    use PieceKind::*;
    let back_rank = [Rook, Knight, Bishop, Queen, King, Bishop, Knight, Rook];
    let mut board: BoardSetup = [None; 64];
    for (file, kind) in back_rank.into_iter().enumerate() {
        board[file] = Some(Piece {
            color: Color::White,
            kind,
        });
        board[8 + file] = Some(Piece {
            color: Color::White,
            kind: Pawn,
        });
        board[48 + file] = Some(Piece {
            color: Color::Black,
            kind: Pawn,
        });
        board[56 + file] = Some(Piece {
            color: Color::Black,
            kind,
        });
    }
    board
}

/// Capability set through which the game oracle drives one participant.
///
/// The oracle calls `handle_game_start` once, then alternates through the
/// opponent-result / sense / move cycle until `handle_game_end`.
pub trait Player {
    fn handle_game_start(&mut self, color: Color, board: &BoardSetup, opponent_name: &str);

    fn handle_opponent_move_result(
        &mut self,
        captured_my_piece: bool,
        capture_square: Option<Square>,
    );

    /// Choose where to sense. Returning `None` skips sensing this turn.
    fn choose_sense(
        &mut self,
        sense_actions: &[Square],
        move_actions: &[Move],
        seconds_left: f32,
    ) -> Option<Square>;

    fn handle_sense_result(&mut self, sense_result: &[(Square, Option<Piece>)]);

    /// Choose a move. Returning `None` passes.
    fn choose_move(&mut self, move_actions: &[Move], seconds_left: f32) -> Option<Move>;

    fn handle_move_result(&mut self, result: &MoveResult);

    fn handle_game_end(
        &mut self,
        winner: Option<Color>,
        win_reason: Option<WinReason>,
        history: &GameHistory,
    );
}

/// One playable game instance owned by the oracle.
pub trait Game {
    /// Play the game to completion, driving both players through the
    /// [`Player`] protocol.
    fn play_local_game(
        &mut self,
        white: &mut dyn Player,
        black: &mut dyn Player,
    ) -> Result<GameOutcome, GameError>;

    /// Release game resources. Called by the trainer when aborting after a
    /// play error.
    fn end(&mut self);
}

/// Factory for game instances, one per self-play episode.
pub trait GameOracle {
    fn new_game(&mut self) -> Box<dyn Game>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_setup_piece_counts() {
        let board = standard_setup();
        let white = board
            .iter()
            .flatten()
            .filter(|p| p.color == Color::White)
            .count();
        let black = board
            .iter()
            .flatten()
            .filter(|p| p.color == Color::Black)
            .count();
        assert_eq!(white, 16);
        assert_eq!(black, 16);
        assert_eq!(
            board[4],
            Some(Piece {
                color: Color::White,
                kind: PieceKind::King
            })
        );
        assert_eq!(
            board[60],
            Some(Piece {
                color: Color::Black,
                kind: PieceKind::King
            })
        );
    }

    #[test]
    fn opponent_flips() {
        assert_eq!(Color::White.opponent(), Color::Black);
        assert_eq!(Color::Black.opponent(), Color::White);
    }
}
