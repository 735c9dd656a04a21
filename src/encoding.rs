//! Encoders between board knowledge and the tensor spaces of the models.
//!
//! Encoders are pure and versioned: trainers pin concrete encoder types, and
//! a model checkpoint is only meaningful together with the encoder versions
//! it was trained against.

use crate::game::{Color, Move, PieceKind};
use crate::knowledge::BoardKnowledge;
use crate::types::{ChoiceIndex, Square, BOARD_SQUARES};

/// Number of feature planes per square: 12 piece planes plus an
/// unknown-contents plane.
const SQUARE_PLANES: usize = 13;
/// Ply counts are scaled into [0, 1] against this horizon.
const PLY_SCALE: f32 = 256.0;

/// Maps an agent's board knowledge to a fixed-size feature vector.
pub trait StateEncoder {
    /// Note that Torch requires i64 for Tensor sizes.
    fn dimension(&self) -> i64;
    fn encode(&self, view: &BoardKnowledge) -> Vec<f32>;
}

/// Maps sense choices to indices in the sense model's output space.
pub trait SenseEncoder {
    fn dimension(&self) -> i64;
    fn index(&self, square: Square) -> ChoiceIndex;
    /// Map a model output index back to one of the currently legal sense
    /// squares, if any matches.
    fn decode(&self, index: ChoiceIndex, legal: &[Square]) -> Option<Square>;
}

/// Maps moves to indices in the action model's output space.
pub trait ActionEncoder {
    fn dimension(&self) -> i64;
    fn index(&self, m: &Move) -> ChoiceIndex;
    /// Map a model output index back to one of the currently legal moves,
    /// if any matches.
    fn decode(&self, index: ChoiceIndex, legal: &[Move]) -> Option<Move>;
}

/// Square-wise one-hot state encoder.
///
/// Each square contributes one plane per (color, kind) pair plus an
/// unknown flag; two trailing features carry the agent color and a scaled
/// ply count. Dimension: `64 * 13 + 2`.
pub struct KnownBoardEncoder;

impl KnownBoardEncoder {
    pub fn new() -> Self {
        KnownBoardEncoder
    }

    fn piece_plane(color: Color, kind: PieceKind) -> usize {
        let color_offset = match color {
            Color::White => 0,
            Color::Black => 6,
        };
        let kind_offset = match kind {
            PieceKind::Pawn => 0,
            PieceKind::Knight => 1,
            PieceKind::Bishop => 2,
            PieceKind::Rook => 3,
            PieceKind::Queen => 4,
            PieceKind::King => 5,
        };
        color_offset + kind_offset
    }
}

impl Default for KnownBoardEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateEncoder for KnownBoardEncoder {
    fn dimension(&self) -> i64 {
        (BOARD_SQUARES * SQUARE_PLANES + 2) as i64
    }

    fn encode(&self, view: &BoardKnowledge) -> Vec<f32> {
        let mut out = vec![0.0; self.dimension() as usize];
        for square in 0..BOARD_SQUARES {
            let base = square * SQUARE_PLANES;
            if !view.is_known(square as Square) {
                out[base + SQUARE_PLANES - 1] = 1.0;
            } else if let Some(piece) = view.piece_at(square as Square) {
                out[base + Self::piece_plane(piece.color, piece.kind)] = 1.0;
            }
        }
        let tail = BOARD_SQUARES * SQUARE_PLANES;
        out[tail] = match view.color {
            Color::White => 0.0,
            Color::Black => 1.0,
        };
        out[tail + 1] = (view.ply as f32 / PLY_SCALE).min(1.0);
        out
    }
}

/// Sense space: one choice per board square.
pub struct SquareSenseEncoder;

impl SquareSenseEncoder {
    pub fn new() -> Self {
        SquareSenseEncoder
    }
}

impl Default for SquareSenseEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SenseEncoder for SquareSenseEncoder {
    fn dimension(&self) -> i64 {
        BOARD_SQUARES as i64
    }

    fn index(&self, square: Square) -> ChoiceIndex {
        square as ChoiceIndex
    }

    fn decode(&self, index: ChoiceIndex, legal: &[Square]) -> Option<Square> {
        legal
            .iter()
            .copied()
            .find(|square| self.index(*square) == index)
    }
}

/// Action space: `from * 64 + to`. Promotions fold onto the underlying
/// from/to pair; `decode` resolves to the first matching legal move.
pub struct FromToActionEncoder;

impl FromToActionEncoder {
    pub fn new() -> Self {
        FromToActionEncoder
    }
}

impl Default for FromToActionEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionEncoder for FromToActionEncoder {
    fn dimension(&self) -> i64 {
        (BOARD_SQUARES * BOARD_SQUARES) as i64
    }

    fn index(&self, m: &Move) -> ChoiceIndex {
        m.from as ChoiceIndex * BOARD_SQUARES as ChoiceIndex + m.to as ChoiceIndex
    }

    fn decode(&self, index: ChoiceIndex, legal: &[Move]) -> Option<Move> {
        legal.iter().copied().find(|m| self.index(m) == index)
    }
}

/// Create a filter vector over the sense space for the given legal squares.
pub fn sense_filter(
    encoder: &dyn SenseEncoder,
    legal: &[Square],
    invalid: f32,
    valid: f32,
) -> Vec<f32> {
    let mut out = vec![invalid; encoder.dimension() as usize];
    for square in legal {
        out[encoder.index(*square) as usize] = valid;
    }
    out
}

/// Create a filter vector over the action space for the given legal moves.
pub fn action_filter(
    encoder: &dyn ActionEncoder,
    legal: &[Move],
    invalid: f32,
    valid: f32,
) -> Vec<f32> {
    let mut out = vec![invalid; encoder.dimension() as usize];
    for m in legal {
        out[encoder.index(m) as usize] = valid;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::standard_setup;
    use crate::knowledge::BoardKnowledge;

    #[test]
    fn state_encoding_matches_dimension() {
        let encoder = KnownBoardEncoder::new();
        let view = BoardKnowledge::new(Color::White, &standard_setup());
        let encoded = encoder.encode(&view);
        assert_eq!(encoded.len(), encoder.dimension() as usize);
        // 32 pieces, one plane each; no unknown squares at game start.
        let active: f32 = encoded[..BOARD_SQUARES * SQUARE_PLANES].iter().sum();
        assert_eq!(active, 32.0);
    }

    #[test]
    fn unknown_squares_set_unknown_plane() {
        let encoder = KnownBoardEncoder::new();
        let mut view = BoardKnowledge::new(Color::White, &standard_setup());
        view.apply_opponent_move_result(false, None);
        let encoded = encoder.encode(&view);
        // Square 56 held a black rook, now stale.
        assert_eq!(encoded[56 * SQUARE_PLANES + SQUARE_PLANES - 1], 1.0);
    }

    #[test]
    fn from_to_index_layout() {
        let encoder = FromToActionEncoder::new();
        assert_eq!(encoder.index(&Move::new(8, 16)), 8 * 64 + 16);
        let legal = [Move::new(8, 16), Move::new(8, 24)];
        assert_eq!(encoder.decode(8 * 64 + 24, &legal), Some(Move::new(8, 24)));
        assert_eq!(encoder.decode(0, &legal), None);
    }

    #[test]
    fn sense_index_is_square() {
        let encoder = SquareSenseEncoder::new();
        assert_eq!(encoder.index(42), 42);
        assert_eq!(encoder.decode(42, &[41, 42, 43]), Some(42));
        assert_eq!(encoder.decode(7, &[41, 42, 43]), None);
    }

    #[test]
    fn filters_mark_legal_entries() {
        let encoder = SquareSenseEncoder::new();
        let filter = sense_filter(&encoder, &[3, 5], f32::NEG_INFINITY, 0.0);
        assert_eq!(filter.len(), 64);
        assert_eq!(filter[3], 0.0);
        assert_eq!(filter[5], 0.0);
        assert_eq!(filter[4], f32::NEG_INFINITY);
    }
}
