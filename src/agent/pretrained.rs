//! Deployment wrapper around trained checkpoints.

use tch::{IndexOp, Tensor};

use super::masked_argmax;
use crate::encoding::{
    action_filter, sense_filter, ActionEncoder, SenseEncoder, StateEncoder,
};
use crate::game::{
    BoardSetup, Color, GameHistory, Move, MoveResult, Piece, Player, WinReason,
};
use crate::knowledge::BoardKnowledge;
use crate::model::{load_or_init, Model, ModelSettings};

/// Plays greedily from persisted sense/action checkpoints. Records nothing;
/// exploration is disabled.
pub struct PretrainedAgent {
    state_encoder: Box<dyn StateEncoder>,
    sense_encoder: Box<dyn SenseEncoder>,
    action_encoder: Box<dyn ActionEncoder>,
    sense_model: Model,
    action_model: Model,
    device: tch::Device,

    view: Option<BoardKnowledge>,
    sense_context: Vec<f32>,
    action_context: Vec<f32>,
}

impl PretrainedAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn load(
        state_encoder: Box<dyn StateEncoder>,
        sense_encoder: Box<dyn SenseEncoder>,
        action_encoder: Box<dyn ActionEncoder>,
        sense_model_path: &std::path::Path,
        action_model_path: &std::path::Path,
        sense_settings: &ModelSettings,
        action_settings: &ModelSettings,
        device: tch::Device,
    ) -> Result<Self, tch::TchError> {
        let state_dim = state_encoder.dimension();
        let sense_model = load_or_init(
            sense_model_path,
            sense_settings,
            device,
            state_dim,
            sense_encoder.dimension(),
        )?;
        let action_model = load_or_init(
            action_model_path,
            action_settings,
            device,
            state_dim,
            action_encoder.dimension(),
        )?;
        Ok(PretrainedAgent {
            state_encoder,
            sense_encoder,
            action_encoder,
            sense_model,
            action_model,
            device,
            view: None,
            sense_context: Vec::new(),
            action_context: Vec::new(),
        })
    }

    fn view(&self) -> &BoardKnowledge {
        self.view
            .as_ref()
            .expect("agent asked to decide before handle_game_start")
    }

    /// Greedy scores for the current decision, handling both model kinds.
    fn scores(&self, model: &Model, context: &[f32], state: &[f32]) -> Tensor {
        let dimension = self.state_encoder.dimension();
        tch::no_grad(|| {
            if model.is_recurrent() {
                let steps = context.len() as i64 / dimension;
                let input = Tensor::from_slice(context)
                    .reshape([1, steps, dimension])
                    .to_device(self.device);
                let hidden = model.init_hidden(1);
                let (out, _) = model.forward_seq(&input, &hidden);
                out.i((0, steps - 1))
            } else {
                let input = Tensor::from_slice(state).to_device(self.device);
                model.forward(&input, false)
            }
        })
    }
}

impl Player for PretrainedAgent {
    fn handle_game_start(&mut self, color: Color, board: &BoardSetup, _opponent_name: &str) {
        self.view = Some(BoardKnowledge::new(color, board));
    }

    fn handle_opponent_move_result(
        &mut self,
        captured_my_piece: bool,
        capture_square: Option<crate::types::Square>,
    ) {
        if let Some(view) = self.view.as_mut() {
            view.apply_opponent_move_result(captured_my_piece, capture_square);
        }
    }

    fn choose_sense(
        &mut self,
        sense_actions: &[crate::types::Square],
        _move_actions: &[Move],
        _seconds_left: f32,
    ) -> Option<crate::types::Square> {
        if sense_actions.is_empty() {
            return None;
        }
        let state = self.state_encoder.encode(self.view());
        self.sense_context.extend_from_slice(&state);
        let scores = self.scores(&self.sense_model, &self.sense_context, &state);
        let filter = sense_filter(
            self.sense_encoder.as_ref(),
            sense_actions,
            f32::NEG_INFINITY,
            0.0,
        );
        let index = masked_argmax(&scores, &filter);
        Some(
            self.sense_encoder
                .decode(index, sense_actions)
                .unwrap_or(sense_actions[0]),
        )
    }

    fn handle_sense_result(&mut self, sense_result: &[(crate::types::Square, Option<Piece>)]) {
        if let Some(view) = self.view.as_mut() {
            view.apply_sense_result(sense_result);
        }
    }

    fn choose_move(&mut self, move_actions: &[Move], _seconds_left: f32) -> Option<Move> {
        if move_actions.is_empty() {
            return None;
        }
        let state = self.state_encoder.encode(self.view());
        self.action_context.extend_from_slice(&state);
        let scores = self.scores(&self.action_model, &self.action_context, &state);
        let filter = action_filter(
            self.action_encoder.as_ref(),
            move_actions,
            f32::NEG_INFINITY,
            0.0,
        );
        let index = masked_argmax(&scores, &filter);
        Some(
            self.action_encoder
                .decode(index, move_actions)
                .unwrap_or(move_actions[0]),
        )
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
