//! Loss primitives for policy training.

use tch::{Kind, Tensor};

/// Clipped policy-gradient error.
///
/// `selected` holds the policy probability of the taken choice per sample,
/// `rewards` the matching scalar rewards. Probabilities are clamped to
/// `[epsilon, 1 - epsilon]` before the log, bounding the per-sample
/// gradient magnitude by `|reward| / epsilon`. Positive reward pushes the
/// selected probability up, negative reward pushes it down.
pub fn pg_error(selected: &Tensor, rewards: &Tensor, epsilon: f64) -> Tensor {
    let clipped = selected.clamp(epsilon, 1.0 - epsilon);
    -(clipped.log() * rewards).mean(Kind::Float)
}
