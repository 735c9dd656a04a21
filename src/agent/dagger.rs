//! Imitation-learning self-play agent.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tch::{IndexOp, Tensor};

use super::{masked_argmax, MoveExpert};
use crate::encoding::{
    action_filter, sense_filter, ActionEncoder, SenseEncoder, StateEncoder,
};
use crate::experience::{ImitationEpisode, SenseEpisode};
use crate::exploration::ExplorationStrategy;
use crate::game::{
    BoardSetup, Color, GameHistory, Move, MoveResult, Piece, Player, WinReason,
};
use crate::knowledge::BoardKnowledge;
use crate::model::Model;
use crate::reward::SenseRewardFn;
use crate::types::{ChoiceIndex, Square};

struct PendingSense {
    state: Vec<f32>,
    choice: ChoiceIndex,
    pre_view: BoardKnowledge,
}

/// Self-play participant for the Dagger trainer.
///
/// Records one sense transition per `choose_sense` and one expert-labeled
/// action transition per `choose_move`. Moves follow the expert with the
/// mixing probability of the injected strategy, the model otherwise; the
/// recorded label is always the expert's.
pub struct DaggerAgent {
    state_encoder: Box<dyn StateEncoder>,
    sense_encoder: Box<dyn SenseEncoder>,
    action_encoder: Box<dyn ActionEncoder>,
    sense_model: Rc<RefCell<Model>>,
    action_model: Rc<RefCell<Model>>,
    device: tch::Device,
    strategy: Box<dyn ExplorationStrategy>,
    expert: Box<dyn MoveExpert>,
    sense_reward: SenseRewardFn,
    rng: StdRng,

    view: Option<BoardKnowledge>,
    /// Encoded states at sense decisions, flattened back to back.
    sense_context: Vec<f32>,
    /// Encoded states at move decisions, flattened back to back.
    action_context: Vec<f32>,
    pending_sense: Option<PendingSense>,
    sense_episode: SenseEpisode,
    action_episode: ImitationEpisode,
}

impl DaggerAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state_encoder: Box<dyn StateEncoder>,
        sense_encoder: Box<dyn SenseEncoder>,
        action_encoder: Box<dyn ActionEncoder>,
        sense_model: Rc<RefCell<Model>>,
        action_model: Rc<RefCell<Model>>,
        device: tch::Device,
        strategy: Box<dyn ExplorationStrategy>,
        expert: Box<dyn MoveExpert>,
        sense_reward: SenseRewardFn,
    ) -> Self {
        let dimension = state_encoder.dimension() as usize;
        DaggerAgent {
            state_encoder,
            sense_encoder,
            action_encoder,
            sense_model,
            action_model,
            device,
            strategy,
            expert,
            sense_reward,
            rng: crate::create_rng(),
            view: None,
            sense_context: Vec::new(),
            action_context: Vec::new(),
            pending_sense: None,
            sense_episode: SenseEpisode::new(dimension),
            action_episode: ImitationEpisode::new(dimension),
        }
    }

    /// Consume the agent and hand its episode buffers to the trainer.
    pub fn into_episodes(self) -> (SenseEpisode, ImitationEpisode) {
        (self.sense_episode, self.action_episode)
    }

    fn view(&self) -> &BoardKnowledge {
        self.view
            .as_ref()
            .expect("agent asked to decide before handle_game_start")
    }

    /// Last-step output of a recurrent model over the accumulated context.
    fn model_scores(&self, model: &Model, context: &[f32]) -> Tensor {
        let dimension = self.state_encoder.dimension();
        let steps = context.len() as i64 / dimension;
        tch::no_grad(|| {
            let input = Tensor::from_slice(context)
                .reshape([1, steps, dimension])
                .to_device(self.device);
            let hidden = model.init_hidden(1);
            let (out, _) = model.forward_seq(&input, &hidden);
            out.i((0, steps - 1))
        })
    }
}

impl Player for DaggerAgent {
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
        self.sense_context.extend_from_slice(&state);

        let square = if self.strategy.explore(&mut self.rng) {
            *sense_actions
                .choose(&mut self.rng)
                .expect("sense action list is non-empty")
        } else {
            let scores = {
                let model = self.sense_model.borrow();
                self.model_scores(&model, &self.sense_context)
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
            state,
            choice: self.sense_encoder.index(square),
            pre_view: self.view().clone(),
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
        self.action_context.extend_from_slice(&state);

        let expert_move = {
            let view = self
                .view
                .as_ref()
                .expect("agent asked to decide before handle_game_start");
            self.expert.choose_move(view, move_actions)
        };
        self.action_episode
            .push(&state, self.action_encoder.index(&expert_move));

        let chosen = if self.strategy.explore(&mut self.rng) {
            expert_move
        } else {
            let scores = {
                let model = self.action_model.borrow();
                self.model_scores(&model, &self.action_context)
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
                .unwrap_or(expert_move)
        };
        Some(chosen)
    }

    fn handle_move_result(&mut self, result: &MoveResult) {
        if let Some(view) = self.view.as_mut() {
            view.apply_move_result(result);
        }
    }

    fn handle_game_end(
        &mut self,
        _winner: Option<Color>,
        _win_reason: Option<WinReason>,
        _history: &GameHistory,
    ) {
    }
}
