//! Self-play training orchestration.

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::game::{Game, GameOracle, Player};
use crate::model::{self, Model, ModelSettings};
use crate::TrainFailure;

mod dagger;
mod qlearn;
#[cfg(test)]
mod tests;

pub use dagger::{DaggerTrainer, DaggerTrainerSettings};
pub use qlearn::{QTrainer, QTrainerSettings};

/// Periodic model snapshots, written next to the canonical checkpoints.
/// Absence of this struct means no snapshotting.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SnapshotSettings {
    /// Snapshot every this many episodes.
    pub frequency: NonZeroUsize,
    pub sense_prefix: String,
    pub action_prefix: String,
}

impl SnapshotSettings {
    fn sense_path(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}_{}.pt", self.sense_prefix, index))
    }

    fn action_path(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}_{}.pt", self.action_prefix, index))
    }
}

/// Capability set of a self-play trainer. The provided [`train`] loop is
/// the orchestrator; variants only supply the episode count, agent
/// construction, the learning trigger, and the learning step itself.
///
/// [`train`]: SelfPlayTrainer::train
pub trait SelfPlayTrainer {
    type Agent: Player + 'static;

    /// Number of self-play games in one run.
    fn episodes(&self) -> usize;

    /// Create one self-play participant bound to fresh episode buffers.
    /// The first call loads model checkpoints if present, otherwise
    /// initializes fresh weights.
    fn create_agent(&mut self) -> Result<Self::Agent, TrainFailure>;

    /// Fold both agents' episode buffers into the long-lived collectors.
    fn fold_episodes(&mut self, white: Self::Agent, black: Self::Agent);

    /// Whether accumulated experience warrants a learning step after this
    /// episode. Must hold on the final episode index.
    fn should_learn(&self, episode: usize) -> bool;

    /// Run one learning step over the accumulated experience and reset the
    /// collectors.
    fn learn(&mut self, episode: usize) -> Result<(), TrainFailure>;

    /// Run the full self-play training loop. Games are played strictly
    /// sequentially; any error during a game aborts the run after cleaning
    /// the game up. No retries: a mid-game failure means corrupted
    /// observability bookkeeping and must surface.
    fn train(&mut self, oracle: &mut dyn GameOracle) -> Result<(), TrainFailure> {
        for episode in 0..self.episodes() {
            let mut white = self.create_agent()?;
            let mut black = self.create_agent()?;
            let mut game = oracle.new_game();
            match game.play_local_game(&mut white, &mut black) {
                Ok(outcome) => {
                    log::info!(
                        "episode {} winner {:?} win reason {:?}",
                        episode,
                        outcome.winner,
                        outcome.win_reason
                    );
                }
                Err(error) => {
                    log::error!("episode {episode} failed: {error}");
                    game.end();
                    return Err(TrainFailure::GamePlay(error.to_string()));
                }
            }
            self.fold_episodes(white, black);
            if self.should_learn(episode) {
                self.learn(episode)?;
            }
        }
        Ok(())
    }
}

/// Lazily load-or-initialize a model shared between the trainer and its
/// agents.
fn ensure_model(
    slot: &mut Option<Rc<RefCell<Model>>>,
    path: &Path,
    settings: &ModelSettings,
    device: tch::Device,
    input_size: i64,
    output_size: i64,
) -> Result<Rc<RefCell<Model>>, TrainFailure> {
    if let Some(model) = slot {
        return Ok(model.clone());
    }
    let model = model::load_or_init(path, settings, device, input_size, output_size)?;
    let model = Rc::new(RefCell::new(model));
    *slot = Some(model.clone());
    Ok(model)
}

/// Write episode-indexed snapshots of both models when the cadence says so.
fn maybe_snapshot(
    snapshot: &Option<SnapshotSettings>,
    snapshot_count: &mut usize,
    episode: usize,
    sense_model: &Model,
    action_model: &Model,
) -> Result<(), TrainFailure> {
    if let Some(settings) = snapshot {
        if episode / settings.frequency.get() > *snapshot_count {
            sense_model.save(&settings.sense_path(*snapshot_count))?;
            action_model.save(&settings.action_path(*snapshot_count))?;
            *snapshot_count += 1;
        }
    }
    Ok(())
}
