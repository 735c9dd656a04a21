//! Experience types for the sense learning signal.

use itertools::Itertools;
use rand::rngs::StdRng;
use tch::Tensor;

use super::{shuffled_index_batches, Collector, Episode};
use crate::types::{ChoiceIndex, Reward};

/// Sense transitions of one agent in one game, in decision order.
///
/// Kept as one record per episode so the Dagger path can rebuild the full
/// recurrent context, while the Q path flattens the same data into
/// independent steps.
pub struct SenseEpisode {
    dimension: usize,
    /// Encoded decision-point states, flattened back to back.
    states: Vec<f32>,
    choices: Vec<ChoiceIndex>,
    rewards: Vec<Reward>,
}

impl SenseEpisode {
    pub fn new(dimension: usize) -> Self {
        SenseEpisode {
            dimension,
            states: Vec::new(),
            choices: Vec::new(),
            rewards: Vec::new(),
        }
    }

    pub fn push(&mut self, state: &[f32], choice: ChoiceIndex, reward: Reward) {
        debug_assert_eq!(state.len(), self.dimension);
        self.states.extend_from_slice(state);
        self.choices.push(choice);
        self.rewards.push(reward);
    }
}

impl Episode for SenseEpisode {
    fn transitions(&self) -> usize {
        self.choices.len()
    }
}

pub type SenseCollector = Collector<SenseEpisode>;

impl SenseCollector {
    /// Materialize into a padded per-episode sequence dataset for recurrent
    /// training. Padded positions carry zero states and zero rewards, so
    /// they contribute nothing to the policy-gradient loss.
    pub fn to_sequence_dataset(&self) -> SenseSequenceDataset {
        let items = self.episode_count();
        let seq_len = self
            .episodes
            .iter()
            .map(Episode::transitions)
            .max()
            .unwrap_or(0);
        let dimension = self.episodes.first().map_or(0, |e| e.dimension);

        let mut contexts = Vec::with_capacity(items * seq_len * dimension);
        let mut choices = Vec::with_capacity(items * seq_len);
        let mut rewards = Vec::with_capacity(items * seq_len);
        for episode in &self.episodes {
            contexts.extend_from_slice(&episode.states);
            contexts.extend(std::iter::repeat(0.0).take((seq_len - episode.transitions()) * dimension));
            choices.extend(episode.choices.iter().copied().pad_using(seq_len, |_| 0));
            rewards.extend(episode.rewards.iter().copied().pad_using(seq_len, |_| 0.0));
        }

        SenseSequenceDataset {
            contexts: Tensor::from_slice(&contexts).reshape([
                items as i64,
                seq_len as i64,
                dimension as i64,
            ]),
            choices: Tensor::from_slice(&choices).reshape([items as i64, seq_len as i64]),
            rewards: Tensor::from_slice(&rewards).reshape([items as i64, seq_len as i64]),
            items,
        }
    }

    /// Materialize into a flat one-transition-per-item dataset for
    /// single-step training.
    pub fn to_step_dataset(&self) -> SenseStepDataset {
        let items = self.size();
        let dimension = self.episodes.first().map_or(0, |e| e.dimension);

        let mut states = Vec::with_capacity(items * dimension);
        let mut choices = Vec::with_capacity(items);
        let mut rewards = Vec::with_capacity(items);
        for episode in &self.episodes {
            states.extend_from_slice(&episode.states);
            choices.extend_from_slice(&episode.choices);
            rewards.extend_from_slice(&episode.rewards);
        }

        SenseStepDataset {
            states: Tensor::from_slice(&states).reshape([items as i64, dimension as i64]),
            choices: Tensor::from_slice(&choices),
            rewards: Tensor::from_slice(&rewards),
            items,
        }
    }
}

/// Padded `[N, S, F]` sequence dataset over sense episodes.
pub struct SenseSequenceDataset {
    /// `[N, S, F]`: per-episode encoded state sequences.
    pub contexts: Tensor,
    /// `[N, S]`: taken sense index at each step.
    pub choices: Tensor,
    /// `[N, S]`: reward at each step; zero on padding.
    pub rewards: Tensor,
    items: usize,
}

/// One minibatch from a [`SenseSequenceDataset`].
pub struct SenseSequenceBatch {
    pub contexts: Tensor,
    pub choices: Tensor,
    pub rewards: Tensor,
}

impl SenseSequenceDataset {
    /// Number of items (episodes) in the dataset.
    pub fn len(&self) -> usize {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn shuffled_batches(&self, batchsize: usize, rng: &mut StdRng) -> Vec<SenseSequenceBatch> {
        shuffled_index_batches(self.items, batchsize, rng)
            .into_iter()
            .map(|idx| SenseSequenceBatch {
                contexts: self.contexts.index_select(0, &idx),
                choices: self.choices.index_select(0, &idx),
                rewards: self.rewards.index_select(0, &idx),
            })
            .collect()
    }
}

/// Flat `[N, F]` step dataset over sense transitions.
pub struct SenseStepDataset {
    pub states: Tensor,
    pub choices: Tensor,
    pub rewards: Tensor,
    items: usize,
}

/// One minibatch from a [`SenseStepDataset`].
pub struct SenseStepBatch {
    pub states: Tensor,
    pub choices: Tensor,
    pub rewards: Tensor,
}

impl SenseStepDataset {
    /// Number of items (transitions) in the dataset.
    pub fn len(&self) -> usize {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn shuffled_batches(&self, batchsize: usize, rng: &mut StdRng) -> Vec<SenseStepBatch> {
        shuffled_index_batches(self.items, batchsize, rng)
            .into_iter()
            .map(|idx| SenseStepBatch {
                states: self.states.index_select(0, &idx),
                choices: self.choices.index_select(0, &idx),
                rewards: self.rewards.index_select(0, &idx),
            })
            .collect()
    }
}
