//! Orchestrator tests against a scripted game oracle.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

use super::*;
use crate::encoding::{KnownBoardEncoder, StateEncoder};
use crate::experience::{QCollector, QEpisode, QTransition, SenseCollector, SenseEpisode};
use crate::exploration::EGParams;
use crate::game::{
    standard_setup, Color, Game, GameError, GameHistory, GameOracle, GameOutcome, Move, MoveResult,
    WinReason,
};
use crate::model::{Model, ModelLayer, ModelSettings};
use crate::reporter::Reporter;
use crate::training::qlearn::bootstrap_targets;
use tch::Tensor;

/// Records which episodes produced learning reports.
struct RecordingReporter {
    events: Rc<RefCell<Vec<(&'static str, usize)>>>,
}

impl Reporter for RecordingReporter {
    fn sense_batch(&mut self, episode: usize, _batch: usize, _dataset_size: usize, _loss: f64) {
        self.events.borrow_mut().push(("sense", episode));
    }

    fn action_batch(&mut self, episode: usize, _batch: usize, _dataset_size: usize, _loss: f64) {
        self.events.borrow_mut().push(("action", episode));
    }
}

/// Deterministic game: each side senses and moves `plies` times, white
/// wins by king capture.
struct ScriptedGame {
    plies: usize,
    fail: bool,
    ended: Rc<Cell<bool>>,
}

impl ScriptedGame {
    fn drive_turn(&self, player: &mut dyn crate::game::Player) {
        player.handle_opponent_move_result(false, None);
        let sense_actions = [16, 17, 18];
        let move_actions = [Move::new(8, 16), Move::new(9, 17)];
        if player.choose_sense(&sense_actions, &move_actions, 900.0).is_some() {
            player.handle_sense_result(&[(16, None), (17, None), (18, None)]);
        }
        let chosen = player.choose_move(&move_actions, 900.0);
        player.handle_move_result(&MoveResult {
            requested: chosen,
            taken: chosen,
            captured_opponent: false,
            capture_square: None,
        });
    }
}

impl Game for ScriptedGame {
    fn play_local_game(
        &mut self,
        white: &mut dyn crate::game::Player,
        black: &mut dyn crate::game::Player,
    ) -> Result<GameOutcome, GameError> {
        let board = standard_setup();
        white.handle_game_start(Color::White, &board, "scripted");
        black.handle_game_start(Color::Black, &board, "scripted");
        if self.fail {
            return Err(GameError::new("scripted failure"));
        }
        for _ in 0..self.plies {
            self.drive_turn(white);
            self.drive_turn(black);
        }
        let history = GameHistory::default();
        white.handle_game_end(Some(Color::White), Some(WinReason::KingCapture), &history);
        black.handle_game_end(Some(Color::White), Some(WinReason::KingCapture), &history);
        Ok(GameOutcome {
            winner: Some(Color::White),
            win_reason: Some(WinReason::KingCapture),
            history,
        })
    }

    fn end(&mut self) {
        self.ended.set(true);
    }
}

struct ScriptedOracle {
    plies: usize,
    fail: bool,
    ended: Rc<Cell<bool>>,
}

impl ScriptedOracle {
    fn new(plies: usize) -> Self {
        ScriptedOracle {
            plies,
            fail: false,
            ended: Rc::new(Cell::new(false)),
        }
    }

    fn failing() -> Self {
        ScriptedOracle {
            plies: 0,
            fail: true,
            ended: Rc::new(Cell::new(false)),
        }
    }
}

impl GameOracle for ScriptedOracle {
    fn new_game(&mut self) -> Box<dyn Game> {
        Box::new(ScriptedGame {
            plies: self.plies,
            fail: self.fail,
            ended: self.ended.clone(),
        })
    }
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rclib_{}_{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn recurrent(softmax: bool) -> ModelSettings {
    ModelSettings::Recurrent {
        hidden_size: 8,
        num_layers: 1,
        softmax_output: softmax,
    }
}

fn feedforward(softmax: bool) -> ModelSettings {
    ModelSettings::Feedforward {
        layers: vec![ModelLayer::Linear(8), ModelLayer::Relu],
        softmax_output: softmax,
    }
}

fn dagger_settings(dir: &std::path::Path, episodes: usize, eb_size: usize) -> DaggerTrainerSettings {
    DaggerTrainerSettings {
        episodes,
        iterations: 1,
        eb_size,
        batchsize: 8,
        learning_rate: 1e-3,
        weight_decay: 0.0,
        pg_epsilon: 0.05,
        expert_mix: 1.0,
        sense_model_filename: dir.join("sense.pt"),
        action_model_filename: dir.join("action.pt"),
        snapshot: None,
        sense_model: recurrent(true),
        action_model: recurrent(false),
    }
}

fn q_settings(dir: &std::path::Path, episodes: usize, eb_size: usize) -> QTrainerSettings {
    QTrainerSettings {
        episodes,
        iterations: 1,
        eb_size,
        batchsize: 2,
        learning_rate: 1e-3,
        weight_decay: 0.0,
        gamma: 0.9,
        pg_epsilon: 0.05,
        tc_steps: 3,
        sense_model_filename: dir.join("sense.pt"),
        action_model_filename: dir.join("action.pt"),
        snapshot: None,
        sense_model: feedforward(true),
        action_model: feedforward(false),
        exploration: EGParams {
            epsilon: 1.0,
            epsilon_step: 0.0,
            epsilon_scale: 1.0,
            epsilon_max: 1.0,
            epsilon_min: 0.0,
        },
    }
}

fn dagger_trainer(settings: DaggerTrainerSettings) -> (DaggerTrainer, Rc<RefCell<Vec<(&'static str, usize)>>>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let trainer = DaggerTrainer::new(
        settings,
        tch::Device::Cpu,
        Box::new(RecordingReporter {
            events: events.clone(),
        }),
        Box::new(|| {
            Box::new(crate::agent::RandomExpert::new()) as Box<dyn crate::agent::MoveExpert>
        }),
    );
    (trainer, events)
}

fn q_trainer(settings: QTrainerSettings) -> (QTrainer, Rc<RefCell<Vec<(&'static str, usize)>>>) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let trainer = QTrainer::new(
        settings,
        tch::Device::Cpu,
        Box::new(RecordingReporter {
            events: events.clone(),
        }),
    );
    (trainer, events)
}

fn state_dimension() -> usize {
    KnownBoardEncoder::new().dimension() as usize
}

fn sense_episode_of(len: usize) -> SenseEpisode {
    let dim = state_dimension();
    let mut episode = SenseEpisode::new(dim);
    for i in 0..len {
        episode.push(&vec![0.0; dim], (i % 64) as i64, 0.1);
    }
    episode
}

fn q_episode_of(len: usize) -> QEpisode {
    let dim = state_dimension();
    let mut episode = QEpisode::new(dim);
    for i in 0..len {
        episode.push(QTransition {
            state: vec![0.0; dim],
            next_state: vec![0.0; dim],
            action: (i % 4096) as i64,
            reward: 0.5,
            terminal: i + 1 == len,
        });
    }
    episode
}

#[test]
fn dagger_should_learn_threshold_and_final_episode() {
    let dir = temp_dir("dagger_trigger");
    let (mut trainer, _) = dagger_trainer(dagger_settings(&dir, 10, 6));
    assert!(!trainer.should_learn(0));
    trainer.sense_ec.append_episode(sense_episode_of(4));
    assert!(!trainer.should_learn(3));
    trainer.sense_ec.append_episode(sense_episode_of(2));
    // max(sense, action) reaches the threshold.
    assert!(trainer.should_learn(3));
    trainer.sense_ec.clear();
    assert!(!trainer.should_learn(8));
    // Final episode always triggers.
    assert!(trainer.should_learn(9));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn q_should_learn_requires_both_signals() {
    let dir = temp_dir("q_trigger");
    let (mut trainer, _) = q_trainer(q_settings(&dir, 10, 4));
    let mut sense_ec = SenseCollector::new();
    sense_ec.append_episode(sense_episode_of(4));
    trainer.sense_ecs.push(sense_ec);
    let mut action_ec = QCollector::new();
    action_ec.append_episode(q_episode_of(2));
    trainer.action_ecs.push(action_ec);
    // Sense is there, action is not.
    assert!(!trainer.should_learn(0));
    let mut action_ec = QCollector::new();
    action_ec.append_episode(q_episode_of(2));
    trainer.action_ecs.push(action_ec);
    assert!(trainer.should_learn(0));
    // Final episode always triggers, regardless of sizes.
    trainer.sense_ecs.clear();
    trainer.action_ecs.clear();
    assert!(trainer.should_learn(9));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn single_episode_run_learns_once_and_persists_models() {
    let dir = temp_dir("q_single_episode");
    let settings = q_settings(&dir, 1, 1_000_000);
    let sense_path = settings.sense_model_filename.clone();
    let action_path = settings.action_model_filename.clone();
    let (mut trainer, events) = q_trainer(settings);
    let mut oracle = ScriptedOracle::new(2);

    trainer.train(&mut oracle).unwrap();

    // Exactly one learning step: all reports carry episode index 0.
    let events = events.borrow();
    assert!(!events.is_empty());
    assert!(events.iter().all(|(_, episode)| *episode == 0));
    // Canonical checkpoints written for both models.
    assert!(sense_path.exists());
    assert!(action_path.exists());
    // Collectors were reset by the learning step.
    assert_eq!(trainer.sense_ecs.len(), 0);
    assert_eq!(trainer.action_ecs.len(), 0);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn epsilon_decays_once_per_learning_call() {
    let dir = temp_dir("q_epsilon");
    let (mut trainer, _) = q_trainer(q_settings(&dir, 1, 1_000_000));
    let mut oracle = ScriptedOracle::new(1);
    assert_eq!(trainer.epsilon(), 1.0);
    trainer.train(&mut oracle).unwrap();
    // step 1, scale 1, max 1, min 0: 1 / (1 + 1) = 0.5
    assert!((trainer.epsilon() - 0.5).abs() < 1e-9);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn dagger_learns_at_threshold_then_at_final_episode() {
    let dir = temp_dir("dagger_schedule");
    // 2 plies x 2 agents = 4 transitions per episode on each signal.
    // eb_size 17 is first reached after episode 4 (20 transitions).
    let (mut trainer, events) = dagger_trainer(dagger_settings(&dir, 10, 17));
    let mut oracle = ScriptedOracle::new(2);

    trainer.train(&mut oracle).unwrap();

    let mut learned: Vec<usize> = events.borrow().iter().map(|(_, e)| *e).collect();
    learned.dedup();
    assert_eq!(learned, vec![4, 9]);
    assert_eq!(trainer.sense_ec.size(), 0);
    assert_eq!(trainer.action_ec.size(), 0);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn game_failure_aborts_without_learning() {
    let dir = temp_dir("abort");
    let (mut trainer, events) = dagger_trainer(dagger_settings(&dir, 5, 1));
    let mut oracle = ScriptedOracle::failing();
    let ended = oracle.ended.clone();

    let result = trainer.train(&mut oracle);

    assert!(matches!(result, Err(crate::TrainFailure::GamePlay(_))));
    assert!(ended.get(), "failed game was not cleaned up");
    assert!(events.borrow().is_empty());
    assert_eq!(trainer.sense_ec.size(), 0);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn target_network_refreshes_after_tc_steps() {
    let dir = temp_dir("q_target");
    // 6 transitions, batchsize 2, one iteration: 3 optimizer steps, and
    // tc_steps = 3 refreshes the target on the last step.
    let (mut trainer, _) = q_trainer(q_settings(&dir, 5, 4));
    let agent = trainer.create_agent().unwrap();
    drop(agent);

    let mut action_ec = QCollector::new();
    action_ec.append_episode(q_episode_of(6));
    trainer.action_ecs.push(action_ec);
    trainer.learn(0).unwrap();

    assert_eq!(trainer.tc_step_count, 0);
    let dim = state_dimension() as i64;
    let input = Tensor::ones([2, dim], (tch::Kind::Float, tch::Device::Cpu));
    let online = trainer
        .action_model
        .as_ref()
        .expect("action model exists")
        .clone();
    let online_out = online.borrow().forward(&input, false);
    let target_out = trainer
        .target_model
        .as_ref()
        .expect("target model exists")
        .forward(&input, false);
    assert!(online_out.allclose(&target_out, 1e-6, 1e-6, false));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn terminal_transitions_bootstrap_to_plain_reward() {
    let settings = ModelSettings::Feedforward {
        layers: vec![ModelLayer::Linear(6), ModelLayer::Relu],
        softmax_output: false,
    };
    let online = Model::new(tch::Device::Cpu, 4, 3, &settings);
    let target = Model::new(tch::Device::Cpu, 4, 3, &settings);

    let next_states = Tensor::ones([2, 4], (tch::Kind::Float, tch::Device::Cpu));
    let rewards = Tensor::from_slice(&[1.5f32, -2.0]);
    let all_terminal = Tensor::from_slice(&[true, true]);

    let targets = bootstrap_targets(&online, &target, &next_states, &rewards, &all_terminal, 0.9);
    assert!(targets.allclose(&rewards, 0.0, 0.0, false));

    // A non-terminal transition picks up a bootstrap term in general.
    let mixed = Tensor::from_slice(&[true, false]);
    let targets = bootstrap_targets(&online, &target, &next_states, &rewards, &mixed, 0.9);
    assert_eq!(targets.double_value(&[0]), 1.5);
}
