//! Reward function contracts.
//!
//! The exact reward formulas are an external concern; trainers and agents
//! only depend on the calling contracts below. The defaults shipped here
//! are simple reference implementations.

use crate::game::{Color, MoveResult};
use crate::knowledge::BoardKnowledge;
use crate::types::{Reward, Square};

/// Reward for one sense decision, computed from the board knowledge
/// immediately before and immediately after the sense result was applied.
pub type SenseRewardFn = fn(&BoardKnowledge, &BoardKnowledge) -> Reward;

/// Events that contribute reward to the pending action transition of a
/// Q-learning agent.
pub enum ActionFeedback<'a> {
    /// Our own move resolved.
    Own(&'a MoveResult),
    /// The opponent captured one of our pieces.
    OpponentCapture { square: Square },
    /// The game ended.
    GameEnd { winner: Option<Color> },
}

/// Reward for action feedback, given the agent's current view.
pub type ActionRewardFn = fn(&BoardKnowledge, &ActionFeedback) -> Reward;

/// Sense window size used to normalize information gain.
const SENSE_WINDOW: f32 = 9.0;

/// Default sense reward: newly revealed squares, normalized by the sense
/// window size.
pub fn information_gain(pre: &BoardKnowledge, post: &BoardKnowledge) -> Reward {
    post.known_count().saturating_sub(pre.known_count()) as Reward / SENSE_WINDOW
}

/// Default action reward: captures in, captures out, and the game result.
pub fn material_outcome(view: &BoardKnowledge, feedback: &ActionFeedback) -> Reward {
    match feedback {
        ActionFeedback::Own(result) => {
            if result.captured_opponent {
                1.0
            } else {
                0.0
            }
        }
        ActionFeedback::OpponentCapture { .. } => -1.0,
        ActionFeedback::GameEnd { winner } => match winner {
            Some(color) if *color == view.color => 10.0,
            Some(_) => -10.0,
            None => 0.0,
        },
    }
}
