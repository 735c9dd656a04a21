//! Epsilon-greedy Q-learning self-play agent.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tch::Tensor;

use super::masked_argmax;
use crate::encoding::{
    action_filter, sense_filter, ActionEncoder, SenseEncoder, StateEncoder,
};
use crate::experience::{QEpisode, QTransition, SenseEpisode};
use crate::exploration::ExplorationStrategy;
use crate::game::{
    BoardSetup, Color, GameHistory, Move, MoveResult, Piece, Player, WinReason,
};
use crate::knowledge::BoardKnowledge;
use crate::model::Model;
use crate::reward::{ActionFeedback, ActionRewardFn, SenseRewardFn};
use crate::types::{ChoiceIndex, Reward, Square};

struct PendingSense {
    state: Vec<f32>,
    choice: ChoiceIndex,
    pre_view: BoardKnowledge,
}

struct PendingAction {
    state: Vec<f32>,
    action: ChoiceIndex,
    reward: Reward,
}

/// Self-play participant for the Q trainer.
///
/// Records one sense step per `choose_sense` and one one-step action
/// transition per move decision; the transition is completed either at the
/// next move decision (its successor state) or at game end (terminal).
pub struct QAgent {
    state_encoder: Box<dyn StateEncoder>,
    sense_encoder: Box<dyn SenseEncoder>,
    action_encoder: Box<dyn ActionEncoder>,
    sense_model: Rc<RefCell<Model>>,
    action_model: Rc<RefCell<Model>>,
    device: tch::Device,
    strategy: Box<dyn ExplorationStrategy>,
    sense_reward: SenseRewardFn,
    action_reward: ActionRewardFn,
    rng: StdRng,

    view: Option<BoardKnowledge>,
    pending_sense: Option<PendingSense>,
    pending_action: Option<PendingAction>,
    sense_episode: SenseEpisode,
    q_episode: QEpisode,
}

impl QAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_encoder: Box<dyn StateEncoder>,
        sense_encoder: Box<dyn SenseEncoder>,
        action_encoder: Box<dyn ActionEncoder>,
        sense_model: Rc<RefCell<Model>>,
        action_model: Rc<RefCell<Model>>,
        device: tch::Device,
        strategy: Box<dyn ExplorationStrategy>,
        sense_reward: SenseRewardFn,
        action_reward: ActionRewardFn,
    ) -> Self {
        let dimension = state_encoder.dimension() as usize;
        QAgent {
            state_encoder,
            sense_encoder,
            action_encoder,
            sense_model,
            action_model,
            device,
            strategy,
            sense_reward,
            action_reward,
            rng: crate::create_rng(),
            view: None,
            pending_sense: None,
            pending_action: None,
            sense_episode: SenseEpisode::new(dimension),
            q_episode: QEpisode::new(dimension),
        }
    }

    /// Consume the agent and hand its episode buffers to the trainer.
    pub fn into_episodes(self) -> (SenseEpisode, QEpisode) {
        (self.sense_episode, self.q_episode)
    }

    fn view(&self) -> &BoardKnowledge {
        self.view
            .as_ref()
            .expect("agent asked to decide before handle_game_start")
    }

    fn forward_state(&self, model: &Model, state: &[f32]) -> Tensor {
        tch::no_grad(|| {
            let input = Tensor::from_slice(state).to_device(self.device);
            model.forward(&input, false)
        })
    }

    /// Complete the previous action transition, if any.
    fn finish_pending_action(&mut self, next_state: &[f32], terminal: bool) {
        if let Some(pending) = self.pending_action.take() {
            self.q_episode.push(QTransition {
                state: pending.state,
                next_state: next_state.to_vec(),
                action: pending.action,
                reward: pending.reward,
                terminal,
            });
        }
    }
}

impl Player for QAgent {
    fn handle_game_start(&mut self, color: Color, board: &BoardSetup, _opponent_name: &str) {
        self.view = Some(BoardKnowledge::new(color, board));
    }

    fn handle_opponent_move_result(
        &mut self,
        captured_my_piece: bool,
        capture_square: Option<Square>,
    ) {
        if let Some(view) = self.view.as_mut() {
            view.apply_opponent_move_result(captured_my_piece, capture_square);
        }
        if captured_my_piece {
            if let (Some(pending), Some(square)) = (self.pending_action.as_mut(), capture_square) {
                let view = self
                    .view
                    .as_ref()
                    .expect("opponent move result before game start");
                pending.reward += (self.action_reward)(view, &ActionFeedback::OpponentCapture {
                    square,
                });
            }
        }
    }

    fn choose_sense(
        &mut self,
        sense_actions: &[Square],
        _move_actions: &[Move],
        _seconds_left: f32,
    ) -> Option<Square> {
        if sense_actions.is_empty() {
            return None;
        }
        let state = self.state_encoder.encode(self.view());

        let square = if self.strategy.explore(&mut self.rng) {
            *sense_actions
                .choose(&mut self.rng)
                .expect("sense action list is non-empty")
        } else {
            let scores = {
                let model = self.sense_model.borrow();
                self.forward_state(&model, &state)
            };
            let filter = sense_filter(
                self.sense_encoder.as_ref(),
                sense_actions,
                f32::NEG_INFINITY,
                0.0,
            );
            let index = masked_argmax(&scores, &filter);
            self.sense_encoder
                .decode(index, sense_actions)
                .unwrap_or(sense_actions[0])
        };

        self.pending_sense = Some(PendingSense {
            choice: self.sense_encoder.index(square),
            pre_view: self.view().clone(),
            state,
        });
        Some(square)
    }

    fn handle_sense_result(&mut self, sense_result: &[(Square, Option<Piece>)]) {
        if let Some(view) = self.view.as_mut() {
            view.apply_sense_result(sense_result);
        }
        if let Some(pending) = self.pending_sense.take() {
            let reward = (self.sense_reward)(&pending.pre_view, self.view());
            self.sense_episode
                .push(&pending.state, pending.choice, reward);
        }
    }

    fn choose_move(&mut self, move_actions: &[Move], _seconds_left: f32) -> Option<Move> {
        if move_actions.is_empty() {
            return None;
        }
        let state = self.state_encoder.encode(self.view());
        self.finish_pending_action(&state, false);

        let chosen = if self.strategy.explore(&mut self.rng) {
            *move_actions
                .choose(&mut self.rng)
                .expect("move action list is non-empty")
        } else {
            let scores = {
                let model = self.action_model.borrow();
                self.forward_state(&model, &state)
            };
            let filter = action_filter(
                self.action_encoder.as_ref(),
                move_actions,
                f32::NEG_INFINITY,
                0.0,
            );
            let index = masked_argmax(&scores, &filter);
            self.action_encoder
                .decode(index, move_actions)
                .unwrap_or(move_actions[0])
        };

        self.pending_action = Some(PendingAction {
            state,
            action: self.action_encoder.index(&chosen),
            reward: 0.0,
        });
        Some(chosen)
    }

    fn handle_move_result(&mut self, result: &MoveResult) {
        if let Some(view) = self.view.as_mut() {
            view.apply_move_result(result);
        }
        if let Some(pending) = self.pending_action.as_mut() {
            let view = self.view.as_ref().expect("move result before game start");
            pending.reward += (self.action_reward)(view, &ActionFeedback::Own(result));
        }
    }

    fn handle_game_end(
        &mut self,
        winner: Option<Color>,
        _win_reason: Option<WinReason>,
        _history: &GameHistory,
    ) {
        if self.pending_action.is_some() {
            let view = self.view.as_ref().expect("game end before game start");
            let terminal_reward = (self.action_reward)(view, &ActionFeedback::GameEnd { winner });
            if let Some(pending) = self.pending_action.as_mut() {
                pending.reward += terminal_reward;
            }
            // The successor of a terminal transition is masked out of the
            // bootstrap; a zero state stands in for it.
            let zero_state = vec![0.0; self.state_encoder.dimension() as usize];
            self.finish_pending_action(&zero_state, true);
        }
    }
}
