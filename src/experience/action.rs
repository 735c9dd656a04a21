//! Experience types for the action learning signal.

use itertools::Itertools;
use rand::rngs::StdRng;
use tch::Tensor;

use super::{shuffled_index_batches, Collector, Episode};
use crate::types::{ChoiceIndex, Reward};

/// Label value for padded sequence positions, skipped by the cross-entropy
/// loss.
pub const IGNORE_LABEL: i64 = -100;

/// Expert-labeled decision states of one agent in one game, in decision
/// order. No reward: the label itself is the learning signal.
pub struct ImitationEpisode {
    dimension: usize,
    states: Vec<f32>,
    labels: Vec<ChoiceIndex>,
}

impl ImitationEpisode {
    pub fn new(dimension: usize) -> Self {
        ImitationEpisode {
            dimension,
            states: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn push(&mut self, state: &[f32], label: ChoiceIndex) {
        debug_assert_eq!(state.len(), self.dimension);
        self.states.extend_from_slice(state);
        self.labels.push(label);
    }
}

impl Episode for ImitationEpisode {
    fn transitions(&self) -> usize {
        self.labels.len()
    }
}

pub type ImitationCollector = Collector<ImitationEpisode>;

impl ImitationCollector {
    /// Materialize into a padded per-episode sequence dataset. Padded
    /// labels are [`IGNORE_LABEL`].
    pub fn to_dataset(&self) -> ImitationDataset {
        let items = self.episode_count();
        let seq_len = self
            .episodes
            .iter()
            .map(Episode::transitions)
            .max()
            .unwrap_or(0);
        let dimension = self.episodes.first().map_or(0, |e| e.dimension);

        let mut contexts = Vec::with_capacity(items * seq_len * dimension);
        let mut labels = Vec::with_capacity(items * seq_len);
        for episode in &self.episodes {
            contexts.extend_from_slice(&episode.states);
            contexts.extend(std::iter::repeat(0.0).take((seq_len - episode.transitions()) * dimension));
            labels.extend(
                episode
                    .labels
                    .iter()
                    .copied()
                    .pad_using(seq_len, |_| IGNORE_LABEL),
            );
        }

        ImitationDataset {
            contexts: Tensor::from_slice(&contexts).reshape([
                items as i64,
                seq_len as i64,
                dimension as i64,
            ]),
            labels: Tensor::from_slice(&labels).reshape([items as i64, seq_len as i64]),
            items,
        }
    }
}

/// Padded `[N, S, F]` dataset of expert-labeled decision sequences.
pub struct ImitationDataset {
    pub contexts: Tensor,
    /// `[N, S]`: expert action index; [`IGNORE_LABEL`] on padding.
    pub labels: Tensor,
    items: usize,
}

/// One minibatch from an [`ImitationDataset`].
pub struct ImitationBatch {
    pub contexts: Tensor,
    pub labels: Tensor,
}

impl ImitationDataset {
    /// Number of items (episodes) in the dataset.
    pub fn len(&self) -> usize {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn shuffled_batches(&self, batchsize: usize, rng: &mut StdRng) -> Vec<ImitationBatch> {
        shuffled_index_batches(self.items, batchsize, rng)
            .into_iter()
            .map(|idx| ImitationBatch {
                contexts: self.contexts.index_select(0, &idx),
                labels: self.labels.index_select(0, &idx),
            })
            .collect()
    }
}

/// One Q-learning transition.
pub struct QTransition {
    pub state: Vec<f32>,
    pub next_state: Vec<f32>,
    pub action: ChoiceIndex,
    pub reward: Reward,
    pub terminal: bool,
}

/// One-step transitions of one agent in one game.
pub struct QEpisode {
    dimension: usize,
    transitions: Vec<QTransition>,
}

impl QEpisode {
    pub fn new(dimension: usize) -> Self {
        QEpisode {
            dimension,
            transitions: Vec::new(),
        }
    }

    pub fn push(&mut self, transition: QTransition) {
        debug_assert_eq!(transition.state.len(), self.dimension);
        debug_assert_eq!(transition.next_state.len(), self.dimension);
        self.transitions.push(transition);
    }
}

impl Episode for QEpisode {
    fn transitions(&self) -> usize {
        self.transitions.len()
    }
}

pub type QCollector = Collector<QEpisode>;

impl QCollector {
    /// Materialize into a flat one-step transition dataset.
    pub fn to_dataset(&self) -> QDataset {
        let items = self.size();
        let dimension = self.episodes.first().map_or(0, |e| e.dimension);

        let mut states = Vec::with_capacity(items * dimension);
        let mut next_states = Vec::with_capacity(items * dimension);
        let mut actions = Vec::with_capacity(items);
        let mut rewards = Vec::with_capacity(items);
        let mut terminals = Vec::with_capacity(items);
        for episode in &self.episodes {
            for transition in &episode.transitions {
                states.extend_from_slice(&transition.state);
                next_states.extend_from_slice(&transition.next_state);
                actions.push(transition.action);
                rewards.push(transition.reward);
                terminals.push(transition.terminal);
            }
        }

        QDataset {
            states: Tensor::from_slice(&states).reshape([items as i64, dimension as i64]),
            next_states: Tensor::from_slice(&next_states).reshape([items as i64, dimension as i64]),
            actions: Tensor::from_slice(&actions),
            rewards: Tensor::from_slice(&rewards),
            terminals: Tensor::from_slice(&terminals),
            items,
        }
    }
}

/// Flat `[N, F]` dataset of one-step Q transitions.
pub struct QDataset {
    pub states: Tensor,
    pub next_states: Tensor,
    /// `[N]`: taken action index. Datatype is i64 unlike other fields.
    pub actions: Tensor,
    pub rewards: Tensor,
    /// `[N]`: bool mask of terminal transitions.
    pub terminals: Tensor,
    items: usize,
}

/// One minibatch from a [`QDataset`].
pub struct QBatch {
    pub states: Tensor,
    pub next_states: Tensor,
    pub actions: Tensor,
    pub rewards: Tensor,
    pub terminals: Tensor,
}

impl QDataset {
    /// Number of items (transitions) in the dataset.
    pub fn len(&self) -> usize {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn shuffled_batches(&self, batchsize: usize, rng: &mut StdRng) -> Vec<QBatch> {
        shuffled_index_batches(self.items, batchsize, rng)
            .into_iter()
            .map(|idx| QBatch {
                states: self.states.index_select(0, &idx),
                next_states: self.next_states.index_select(0, &idx),
                actions: self.actions.index_select(0, &idx),
                rewards: self.rewards.index_select(0, &idx),
                terminals: self.terminals.index_select(0, &idx),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_rng;

    #[test]
    fn imitation_dataset_pads_labels_with_ignore_index() {
        let mut collector = ImitationCollector::new();
        let mut short = ImitationEpisode::new(2);
        short.push(&[1.0, 0.0], 7);
        let mut long = ImitationEpisode::new(2);
        long.push(&[0.0, 1.0], 1);
        long.push(&[1.0, 1.0], 2);
        collector.append_episode(short);
        collector.append_episode(long);

        let dataset = collector.to_dataset();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.contexts.size(), vec![2, 2, 2]);
        assert_eq!(dataset.labels.int64_value(&[0, 0]), 7);
        assert_eq!(dataset.labels.int64_value(&[0, 1]), IGNORE_LABEL);
        assert_eq!(dataset.labels.int64_value(&[1, 1]), 2);
    }

    #[test]
    fn q_dataset_flattens_across_episodes() {
        let mut collector = QCollector::new();
        for _ in 0..2 {
            let mut episode = QEpisode::new(2);
            episode.push(QTransition {
                state: vec![0.0, 1.0],
                next_state: vec![1.0, 0.0],
                action: 3,
                reward: 0.5,
                terminal: false,
            });
            episode.push(QTransition {
                state: vec![1.0, 0.0],
                next_state: vec![0.0, 0.0],
                action: 1,
                reward: -1.0,
                terminal: true,
            });
            collector.append_episode(episode);
        }
        assert_eq!(collector.size(), 4);

        let dataset = collector.to_dataset();
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.states.size(), vec![4, 2]);
        assert_eq!(dataset.terminals.size(), vec![4]);

        let mut rng = create_rng();
        let batches = dataset.shuffled_batches(3, &mut rng);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].actions.size()[0], 3);
    }
}
