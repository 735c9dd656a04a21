//! Dagger-style trainer: policy-gradient sensing, imitation-learned
//! actions.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tch::nn::{self, OptimizerConfig};

use super::{ensure_model, maybe_snapshot, SelfPlayTrainer, SnapshotSettings};
use crate::agent::{DaggerAgent, MoveExpert};
use crate::encoding::{
    ActionEncoder, FromToActionEncoder, KnownBoardEncoder, SenseEncoder, SquareSenseEncoder,
    StateEncoder,
};
use crate::experience::{ImitationCollector, SenseCollector, IGNORE_LABEL};
use crate::exploration::ExpertMixing;
use crate::loss::pg_error;
use crate::model::{Model, ModelSettings};
use crate::reporter::Reporter;
use crate::reward::information_gain;
use crate::{create_rng, TrainFailure};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DaggerTrainerSettings {
    pub episodes: usize,
    /// Optimization passes over the dataset per learning step.
    pub iterations: usize,
    /// Accumulated-transition threshold that triggers a learning step.
    pub eb_size: usize,
    pub batchsize: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Clipping epsilon of the policy-gradient loss.
    pub pg_epsilon: f64,
    /// Probability that an agent defers to the expert instead of its own
    /// model.
    pub expert_mix: f64,
    pub sense_model_filename: PathBuf,
    pub action_model_filename: PathBuf,
    pub snapshot: Option<SnapshotSettings>,
    pub sense_model: ModelSettings,
    pub action_model: ModelSettings,
}

/// Builds label sources for freshly created agents.
pub type ExpertBuilder = Box<dyn FnMut() -> Box<dyn MoveExpert>>;

pub struct DaggerTrainer {
    settings: DaggerTrainerSettings,
    device: tch::Device,
    reporter: Box<dyn Reporter>,
    expert_builder: ExpertBuilder,

    pub(crate) sense_ec: SenseCollector,
    pub(crate) action_ec: ImitationCollector,
    sense_model: Option<Rc<RefCell<Model>>>,
    action_model: Option<Rc<RefCell<Model>>>,
    snapshot_count: usize,
    rng: StdRng,
}

impl DaggerTrainer {
    pub fn new(
        settings: DaggerTrainerSettings,
        device: tch::Device,
        reporter: Box<dyn Reporter>,
        expert_builder: ExpertBuilder,
    ) -> Self {
        DaggerTrainer {
            settings,
            device,
            reporter,
            expert_builder,
            sense_ec: SenseCollector::new(),
            action_ec: ImitationCollector::new(),
            sense_model: None,
            action_model: None,
            snapshot_count: 0,
            rng: create_rng(),
        }
    }

    fn learn_sense(&mut self, episode: usize) -> Result<(), TrainFailure> {
        let dataset = self.sense_ec.to_sequence_dataset();
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
                let contexts = batch.contexts.to_device(self.device);
                let choices = batch.choices.to_device(self.device);
                let rewards = batch.rewards.to_device(self.device);

                let batchsize = contexts.size()[0];
                let hidden = model.init_hidden(batchsize);
                let (pi, _) = model.forward_seq(&contexts, &hidden);
                // Flatten steps out of the batch dimension, then select the
                // probability of the taken choice per row.
                let output_size = pi.size()[2];
                let pi = pi.reshape([-1, output_size]);
                let choices = choices.reshape([-1]);
                let rewards = rewards.reshape([-1]);
                let selected = pi.index_select(1, &choices).diagonal(0, 0, 1);

                let loss = pg_error(&selected, &rewards, self.settings.pg_epsilon);
                opt.backward_step(&loss);
                self.reporter
                    .sense_batch(episode, i, dataset.len(), loss.double_value(&[]));
            }
        }
        Ok(())
    }

    fn learn_action(&mut self, episode: usize) -> Result<(), TrainFailure> {
        let dataset = self.action_ec.to_dataset();
        if dataset.is_empty() {
            return Ok(());
        }
        let model = self
            .action_model
            .as_ref()
            .expect("learn_action called before any agent was created")
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
                let contexts = batch.contexts.to_device(self.device);
                let labels = batch.labels.to_device(self.device);

                let batchsize = contexts.size()[0];
                let hidden = model.init_hidden(batchsize);
                let (logits, _) = model.forward_seq(&contexts, &hidden);
                let output_size = logits.size()[2];
                let logits = logits.reshape([-1, output_size]);
                let labels = labels.reshape([-1]);

                let loss = logits.cross_entropy_loss::<tch::Tensor>(
                    &labels,
                    None,
                    tch::Reduction::Mean,
                    IGNORE_LABEL,
                    0.0,
                );
                opt.backward_step(&loss);
                self.reporter
                    .action_batch(episode, i, dataset.len(), loss.double_value(&[]));
            }
        }
        Ok(())
    }
}

impl SelfPlayTrainer for DaggerTrainer {
    type Agent = DaggerAgent;

    fn episodes(&self) -> usize {
        self.settings.episodes
    }

    fn create_agent(&mut self) -> Result<DaggerAgent, TrainFailure> {
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

        Ok(DaggerAgent::new(
            Box::new(state_encoder),
            Box::new(sense_encoder),
            Box::new(action_encoder),
            sense_model,
            action_model,
            self.device,
            Box::new(ExpertMixing {
                mix: self.settings.expert_mix,
            }),
            (self.expert_builder)(),
            information_gain,
        ))
    }

    fn fold_episodes(&mut self, white: DaggerAgent, black: DaggerAgent) {
        for agent in [white, black] {
            let (sense, action) = agent.into_episodes();
            self.sense_ec.append_episode(sense);
            self.action_ec.append_episode(action);
        }
    }

    fn should_learn(&self, episode: usize) -> bool {
        if episode + 1 == self.settings.episodes {
            return true;
        }
        self.sense_ec.size().max(self.action_ec.size()) >= self.settings.eb_size
    }

    fn learn(&mut self, episode: usize) -> Result<(), TrainFailure> {
        self.learn_sense(episode)?;
        self.learn_action(episode)?;
        self.sense_ec.clear();
        self.action_ec.clear();

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
