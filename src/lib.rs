//! # Reconnaissance Chess Training Library
//!
//! Self-play training for reconnaissance chess: two cooperating models (a
//! sense policy and an action policy) are trained from experience generated
//! by playing complete games against a copy of themselves through an
//! external game oracle.

use std::cell::RefCell;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

pub mod agent;
pub mod encoding;
pub mod experience;
pub mod exploration;
pub mod game;
pub mod knowledge;
pub mod loss;
pub mod model;
pub mod reporter;
pub mod reward;
pub mod training;
pub mod types;

thread_local! {
    /// Seed for random number generators created by [`create_rng`].
    ///
    /// If `None`, generators are seeded from entropy.
    pub static RANDOM_SEED: RefCell<Option<u64>> = const { RefCell::new(None) };
}

/// Create a random number generator, honoring the thread local
/// [`RANDOM_SEED`] variable if present.
pub fn create_rng() -> StdRng {
    RANDOM_SEED.with_borrow(|seed| {
        if let Some(seed) = seed {
            StdRng::seed_from_u64(*seed)
        } else {
            StdRng::from_entropy()
        }
    })
}

/// Seed libtorch using the [`RANDOM_SEED`] variable if present.
pub fn load_torch_seed() {
    RANDOM_SEED.with_borrow(|seed| {
        if let Some(seed) = seed {
            tch::manual_seed(*seed as i64);
        }
    });
}

/// Represents the reasons why a training run might fail.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(tag = "type", content = "content")]
pub enum TrainFailure {
    /// A self-play game raised an error. Game state cannot be resumed after
    /// a mid-game failure, so the whole run is aborted.
    GamePlay(String),
    /// An error from the torch layer: checkpoint I/O, optimizer
    /// construction, or a tensor operation.
    Torch(String),
}

impl std::error::Error for TrainFailure {}

impl std::fmt::Display for TrainFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TrainFailure::GamePlay(reason) => write!(f, "Game play failed: {}", reason),
            TrainFailure::Torch(reason) => write!(f, "Torch error: {}", reason),
        }
    }
}

impl From<tch::TchError> for TrainFailure {
    fn from(error: tch::TchError) -> Self {
        TrainFailure::Torch(error.to_string())
    }
}
