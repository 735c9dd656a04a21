//! Self-play participants.
//!
//! Agents implement the oracle-facing [`Player`](crate::game::Player)
//! contract. Training agents additionally record transitions into their
//! episode buffers as a side effect of every decision; the trainer consumes
//! the agent at game end to fold those buffers into its collectors.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tch::Tensor;

use crate::game::Move;
use crate::knowledge::BoardKnowledge;
use crate::types::ChoiceIndex;

mod dagger;
mod pretrained;
mod qlearn;

pub use dagger::DaggerAgent;
pub use pretrained::PretrainedAgent;
pub use qlearn::QAgent;

/// Label source for imitation learning. Must return one of the legal
/// moves.
pub trait MoveExpert {
    fn choose_move(&mut self, view: &BoardKnowledge, legal: &[Move]) -> Move;
}

/// Uniform random expert. A placeholder label source for wiring tests and
/// cold bootstrap runs.
pub struct RandomExpert {
    rng: StdRng,
}

impl RandomExpert {
    pub fn new() -> Self {
        RandomExpert {
            rng: crate::create_rng(),
        }
    }
}

impl Default for RandomExpert {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveExpert for RandomExpert {
    fn choose_move(&mut self, _view: &BoardKnowledge, legal: &[Move]) -> Move {
        *legal
            .choose(&mut self.rng)
            .expect("expert asked to move with no legal moves")
    }
}

/// Index of the best-scoring entry after applying an additive legality
/// filter (0 on legal entries, -inf on the rest).
pub(crate) fn masked_argmax(scores: &Tensor, filter: &[f32]) -> ChoiceIndex {
    let filter = Tensor::from_slice(filter).to_device(scores.device());
    (scores + filter).argmax(-1, false).int64_value(&[])
}
