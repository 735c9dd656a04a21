//! Partial-observability bookkeeping.
//!
//! Each agent maintains its own [`BoardKnowledge`]: which squares it
//! currently knows the contents of, and what it last saw there. This is
//! bookkeeping over oracle reports, not rule inference; the oracle remains
//! the only authority on legality.

use bitvec::prelude::*;

use crate::game::{BoardSetup, Color, MoveResult, Piece};
use crate::types::{Square, BOARD_SQUARES};

type KnownMask = BitArr!(for 64, in u64, Lsb0);

/// One agent's view of the board.
#[derive(Clone, Debug)]
pub struct BoardKnowledge {
    pub color: Color,
    /// Completed own moves so far.
    pub ply: usize,
    pieces: BoardSetup,
    known: KnownMask,
}

impl BoardKnowledge {
    /// Start-of-game knowledge: the full initial placement is public.
    pub fn new(color: Color, board: &BoardSetup) -> Self {
        let mut known: KnownMask = BitArray::ZERO;
        known[..BOARD_SQUARES].fill(true);
        BoardKnowledge {
            color,
            ply: 0,
            pieces: *board,
            known,
        }
    }

    pub fn is_known(&self, square: Square) -> bool {
        self.known[square as usize]
    }

    /// Last seen piece on the square. Meaningless when the square is not
    /// known.
    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.pieces[square as usize]
    }

    /// Number of squares whose contents are currently known.
    pub fn known_count(&self) -> usize {
        self.known[..BOARD_SQUARES].count_ones()
    }

    /// The opponent moved. Every square we last saw an opponent piece on
    /// becomes stale, and a capture removes our own piece.
    pub fn apply_opponent_move_result(
        &mut self,
        captured_my_piece: bool,
        capture_square: Option<Square>,
    ) {
        let opponent = self.color.opponent();
        for square in 0..BOARD_SQUARES {
            if matches!(self.pieces[square], Some(piece) if piece.color == opponent) {
                self.known.set(square, false);
            }
        }
        if captured_my_piece {
            if let Some(square) = capture_square {
                self.pieces[square as usize] = None;
                self.known.set(square as usize, true);
            }
        }
    }

    /// Fold a sense window back into the view.
    pub fn apply_sense_result(&mut self, sense_result: &[(Square, Option<Piece>)]) {
        for (square, piece) in sense_result {
            self.pieces[*square as usize] = *piece;
            self.known.set(*square as usize, true);
        }
    }

    /// Our own move resolved; update placement and advance the ply count.
    pub fn apply_move_result(&mut self, result: &MoveResult) {
        if let Some(taken) = result.taken {
            let moved = self.pieces[taken.from as usize].take();
            self.known.set(taken.from as usize, true);
            let placed = match (moved, taken.promotion) {
                (Some(piece), Some(kind)) => Some(Piece {
                    color: piece.color,
                    kind,
                }),
                (piece, _) => piece,
            };
            self.pieces[taken.to as usize] = placed;
            self.known.set(taken.to as usize, true);
        }
        self.ply += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{standard_setup, Move, PieceKind};

    fn white_view() -> BoardKnowledge {
        BoardKnowledge::new(Color::White, &standard_setup())
    }

    #[test]
    fn initial_knowledge_is_complete() {
        let view = white_view();
        assert_eq!(view.known_count(), BOARD_SQUARES);
        assert_eq!(view.ply, 0);
    }

    #[test]
    fn opponent_move_stales_opponent_squares() {
        let mut view = white_view();
        view.apply_opponent_move_result(false, None);
        // 16 black pieces become unknown, everything else stays known.
        assert_eq!(view.known_count(), BOARD_SQUARES - 16);
        assert!(!view.is_known(56));
        assert!(view.is_known(0));
    }

    #[test]
    fn sense_restores_knowledge() {
        let mut view = white_view();
        view.apply_opponent_move_result(false, None);
        view.apply_sense_result(&[
            (
                56,
                Some(Piece {
                    color: Color::Black,
                    kind: PieceKind::Rook,
                }),
            ),
            (57, None),
        ]);
        assert!(view.is_known(56));
        assert!(view.is_known(57));
        assert_eq!(view.piece_at(57), None);
        assert_eq!(view.known_count(), BOARD_SQUARES - 14);
    }

    #[test]
    fn own_capture_removes_piece() {
        let mut view = white_view();
        view.apply_opponent_move_result(true, Some(8));
        assert_eq!(view.piece_at(8), None);
        assert!(view.is_known(8));
    }

    #[test]
    fn move_result_updates_placement_and_ply() {
        let mut view = white_view();
        let result = MoveResult {
            requested: Some(Move::new(8, 16)),
            taken: Some(Move::new(8, 16)),
            captured_opponent: false,
            capture_square: None,
        };
        view.apply_move_result(&result);
        assert_eq!(view.piece_at(8), None);
        assert_eq!(
            view.piece_at(16),
            Some(Piece {
                color: Color::White,
                kind: PieceKind::Pawn,
            })
        );
        assert_eq!(view.ply, 1);
    }

    #[test]
    fn promotion_changes_piece_kind() {
        let mut view = white_view();
        let result = MoveResult {
            requested: None,
            taken: Some(Move {
                from: 8,
                to: 16,
                promotion: Some(PieceKind::Queen),
            }),
            captured_opponent: false,
            capture_square: None,
        };
        view.apply_move_result(&result);
        assert_eq!(
            view.piece_at(16).map(|p| p.kind),
            Some(PieceKind::Queen)
        );
    }
}
