//! Exploration schedules and strategies.

use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

/// Epsilon-greedy schedule state.
///
/// `epsilon_step` is advanced by the caller (once per learning call);
/// [`epsilon_decay`] then moves `epsilon` along a hyperbolic curve from
/// `epsilon_max` toward `epsilon_min`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EGParams {
    pub epsilon: f64,
    pub epsilon_step: f64,
    pub epsilon_scale: f64,
    pub epsilon_max: f64,
    pub epsilon_min: f64,
}

/// Recompute `epsilon` from the current step counter.
pub fn epsilon_decay(param: &mut EGParams) {
    param.epsilon = f64::min(
        param.epsilon_max,
        1.0 / (param.epsilon_step / param.epsilon_scale + 1.0 / param.epsilon_max)
            + param.epsilon_min,
    );
}

/// Decides, per decision point, whether to take the exploratory branch
/// instead of the model-greedy one.
pub trait ExplorationStrategy {
    fn explore(&mut self, rng: &mut StdRng) -> bool;
}

/// Explore with a fixed probability.
pub struct EpsilonGreedy {
    pub epsilon: f64,
}

impl ExplorationStrategy for EpsilonGreedy {
    fn explore(&mut self, rng: &mut StdRng) -> bool {
        rng.gen::<f64>() <= self.epsilon
    }
}

/// Dagger-style mixing: with probability `mix` the agent defers to the
/// expert (or senses randomly), otherwise it follows its own model.
pub struct ExpertMixing {
    pub mix: f64,
}

impl ExplorationStrategy for ExpertMixing {
    fn explore(&mut self, rng: &mut StdRng) -> bool {
        rng.gen::<f64>() <= self.mix
    }
}
