//! Q-style trainer: Double-DQN actions with a periodically refreshed
//! target network, policy-gradient sensing with a mean baseline.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tch::nn::{self, OptimizerConfig};
use tch::{Kind, Tensor};

use super::{ensure_model, maybe_snapshot, SelfPlayTrainer, SnapshotSettings};
use crate::agent::QAgent;
use crate::encoding::{
    ActionEncoder, FromToActionEncoder, KnownBoardEncoder, SenseEncoder, SquareSenseEncoder,
    StateEncoder,
};
use crate::experience::{QCollector, SenseCollector};
use crate::exploration::{epsilon_decay, EGParams, EpsilonGreedy};
use crate::loss::pg_error;
use crate::model::{Model, ModelSettings};
use crate::reporter::Reporter;
use crate::reward::{information_gain, material_outcome};
use crate::{create_rng, TrainFailure};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QTrainerSettings {
    pub episodes: usize,
    /// Optimization passes over the dataset per learning step.
    pub iterations: usize,
    /// Both signals must accumulate this many transitions to trigger a
    /// learning step.
    pub eb_size: usize,
    pub batchsize: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Discount factor in the Q function.
    pub gamma: f64,
    /// Clipping epsilon of the policy-gradient loss.
    pub pg_epsilon: f64,
    /// Optimizer steps between target network refreshes.
    pub tc_steps: usize,
    pub sense_model_filename: PathBuf,
    pub action_model_filename: PathBuf,
    pub snapshot: Option<SnapshotSettings>,
    pub sense_model: ModelSettings,
    pub action_model: ModelSettings,
    pub exploration: EGParams,
}

pub struct QTrainer {
    settings: QTrainerSettings,
    device: tch::Device,
    reporter: Box<dyn Reporter>,

    /// One sub-collector per created agent, merged at learning time.
    pub(crate) sense_ecs: Vec<SenseCollector>,
    pub(crate) action_ecs: Vec<QCollector>,
    sense_model: Option<Rc<RefCell<Model>>>,
    pub(crate) action_model: Option<Rc<RefCell<Model>>>,
    /// The target model that will be updated occasionally from the primary
    /// model.
    pub(crate) target_model: Option<Model>,
    /// Optimizer steps since the last target model update.
    pub(crate) tc_step_count: usize,
    snapshot_count: usize,
    rng: StdRng,
}

impl QTrainer {
    pub fn new(settings: QTrainerSettings, device: tch::Device, reporter: Box<dyn Reporter>) -> Self {
        QTrainer {
            settings,
            device,
            reporter,
            sense_ecs: Vec::new(),
            action_ecs: Vec::new(),
            sense_model: None,
            action_model: None,
            target_model: None,
            tc_step_count: 0,
            snapshot_count: 0,
            rng: create_rng(),
        }
    }

    /// Current exploration rate handed to freshly created agents.
    pub fn epsilon(&self) -> f64 {
        self.settings.exploration.epsilon
    }

    fn learn_sense(&mut self, episode: usize) -> Result<(), TrainFailure> {
        let combined = SenseCollector::combine(std::mem::take(&mut self.sense_ecs));
        let dataset = combined.to_step_dataset();
        if dataset.is_empty() {
            return Ok(());
        }
        let model = self
            .sense_model
            .as_ref()
            .expect("learn_sense called before any agent was created")
            .clone();
        let model = model.borrow();
        let mut opt = nn::Adam {
            wd: self.settings.weight_decay,
            ..Default::default()
        }
        .build(&model.vs, self.settings.learning_rate)?;

        for _ in 0..self.settings.iterations {
            for (i, batch) in dataset
                .shuffled_batches(self.settings.batchsize, &mut self.rng)
                .into_iter()
                .enumerate()
            {
                let states = batch.states.to_device(self.device);
                let choices = batch.choices.to_device(self.device);
                let rewards = batch.rewards.to_device(self.device);
                // Mean baseline over the batch for variance reduction.
                let centered = &rewards - rewards.mean(Kind::Float);

                let pi = model.forward(&states, true);
                let selected = pi.index_select(1, &choices).diagonal(0, 0, 1);

                let loss = pg_error(&selected, &centered, self.settings.pg_epsilon);
                opt.backward_step(&loss);
                self.reporter
                    .sense_batch(episode, i, dataset.len(), loss.double_value(&[]));
            }
        }
        Ok(())
    }

    fn learn_action(&mut self, episode: usize) -> Result<(), TrainFailure> {
        let combined = QCollector::combine(std::mem::take(&mut self.action_ecs));
        let dataset = combined.to_dataset();
        if dataset.is_empty() {
            return Ok(());
        }
        let model = self
            .action_model
            .as_ref()
            .expect("learn_action called before any agent was created")
            .clone();
        let model = model.borrow();
        let target_model = self
            .target_model
            .as_mut()
            .expect("target model missing before learn_action");
        let mut opt = nn::Adam {
            wd: self.settings.weight_decay,
            ..Default::default()
        }
        .build(&model.vs, self.settings.learning_rate)?;

        for _ in 0..self.settings.iterations {
            for (i, batch) in dataset
                .shuffled_batches(self.settings.batchsize, &mut self.rng)
                .into_iter()
                .enumerate()
            {
                let states = batch.states.to_device(self.device);
                let next_states = batch.next_states.to_device(self.device);
                let actions = batch.actions.to_device(self.device);
                let rewards = batch.rewards.to_device(self.device);
                let terminals = batch.terminals.to_device(self.device);

                let target = bootstrap_targets(
                    &model,
                    target_model,
                    &next_states,
                    &rewards,
                    &terminals,
                    self.settings.gamma,
                );

                let qvals = model.forward(&states, true);
                let taken = qvals.index_select(1, &actions).diagonal(0, 0, 1);
                let loss = taken.mse_loss(&target, tch::Reduction::Mean);
                opt.backward_step(&loss);
                self.reporter
                    .action_batch(episode, i, dataset.len(), loss.double_value(&[]));

                // Update the target model periodically.
                self.tc_step_count += 1;
                if self.tc_step_count >= self.settings.tc_steps {
                    target_model.copy_from(&model);
                    self.tc_step_count = 0;
                }
            }
        }
        drop(model);

        // The decay progresses once per learning call, affecting the next
        // set of agents.
        self.settings.exploration.epsilon_step += 1.0;
        epsilon_decay(&mut self.settings.exploration);
        Ok(())
    }
}

/// Double-DQN bootstrap: the online model selects the greedy next action,
/// the target model evaluates it. Terminal transitions contribute no
/// future term.
pub(crate) fn bootstrap_targets(
    online: &Model,
    target: &Model,
    next_states: &Tensor,
    rewards: &Tensor,
    terminals: &Tensor,
    gamma: f64,
) -> Tensor {
    tch::no_grad(|| {
        let next_q = target.forward(next_states, false);
        let greedy = online.forward(next_states, false).argmax(1, false);
        let selected = next_q.index_select(1, &greedy).diagonal(0, 0, 1);
        let not_terminal = terminals.logical_not().to_kind(Kind::Float);
        rewards + not_terminal * selected * gamma
    })
}

impl SelfPlayTrainer for QTrainer {
    type Agent = QAgent;

    fn episodes(&self) -> usize {
        self.settings.episodes
    }

    fn create_agent(&mut self) -> Result<QAgent, TrainFailure> {
        let state_encoder = KnownBoardEncoder::new();
        let sense_encoder = SquareSenseEncoder::new();
        let action_encoder = FromToActionEncoder::new();

        let sense_model = ensure_model(
            &mut self.sense_model,
            &self.settings.sense_model_filename,
            &self.settings.sense_model,
            self.device,
            state_encoder.dimension(),
            sense_encoder.dimension(),
        )?;
        let action_model = ensure_model(
            &mut self.action_model,
            &self.settings.action_model_filename,
            &self.settings.action_model,
            self.device,
            state_encoder.dimension(),
            action_encoder.dimension(),
        )?;
        if self.target_model.is_none() {
            let mut target = Model::new(
                self.device,
                state_encoder.dimension(),
                action_encoder.dimension(),
                &self.settings.action_model,
            );
            target.copy_from(&action_model.borrow());
            self.target_model = Some(target);
        }

        Ok(QAgent::new(
            Box::new(state_encoder),
            Box::new(sense_encoder),
            Box::new(action_encoder),
            sense_model,
            action_model,
            self.device,
            Box::new(EpsilonGreedy {
                epsilon: self.settings.exploration.epsilon,
            }),
            information_gain,
            material_outcome,
        ))
    }

    fn fold_episodes(&mut self, white: QAgent, black: QAgent) {
        for agent in [white, black] {
            let (sense, action) = agent.into_episodes();
            let mut sense_ec = SenseCollector::new();
            sense_ec.append_episode(sense);
            self.sense_ecs.push(sense_ec);
            let mut action_ec = QCollector::new();
            action_ec.append_episode(action);
            self.action_ecs.push(action_ec);
        }
    }

    fn should_learn(&self, episode: usize) -> bool {
        if episode + 1 == self.settings.episodes {
            return true;
        }
        let sense_size: usize = self.sense_ecs.iter().map(|ec| ec.size()).sum();
        let action_size: usize = self.action_ecs.iter().map(|ec| ec.size()).sum();
        sense_size >= self.settings.eb_size && action_size >= self.settings.eb_size
    }

    fn learn(&mut self, episode: usize) -> Result<(), TrainFailure> {
        self.learn_sense(episode)?;
        self.learn_action(episode)?;

        let sense_model = self
            .sense_model
            .as_ref()
            .expect("learn called before any agent was created")
            .clone();
        let action_model = self
            .action_model
            .as_ref()
            .expect("learn called before any agent was created")
            .clone();
        maybe_snapshot(
            &self.settings.snapshot,
            &mut self.snapshot_count,
            episode,
            &sense_model.borrow(),
            &action_model.borrow(),
        )?;
        if episode + 1 == self.settings.episodes {
            sense_model
                .borrow()
                .save(&self.settings.sense_model_filename)?;
            action_model
                .borrow()
                .save(&self.settings.action_model_filename)?;
        }
        Ok(())
    }
}
