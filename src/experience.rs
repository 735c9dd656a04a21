//! Experience collection for self-play training.
//!
//! An [`Episode`] is the growable transition record of one agent in one
//! game. A [`Collector`] accumulates finished episodes across games until a
//! learning step materializes them into a tensor dataset and resets the
//! collector.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tch::Tensor;

mod action;
mod sense;

pub use action::{
    ImitationBatch, ImitationCollector, ImitationDataset, ImitationEpisode, QBatch, QCollector,
    QDataset, QEpisode, QTransition, IGNORE_LABEL,
};
pub use sense::{
    SenseCollector, SenseEpisode, SenseSequenceBatch, SenseSequenceDataset, SenseStepBatch,
    SenseStepDataset,
};

/// A finished per-game transition record.
pub trait Episode {
    /// Number of transitions recorded in this episode.
    fn transitions(&self) -> usize;
}

/// Append-only accumulator of episodes for one learning signal.
///
/// Episodes are held in insertion order. The collector never drops a
/// transition between resets.
pub struct Collector<E> {
    pub(crate) episodes: Vec<E>,
}

impl<E: Episode> Collector<E> {
    pub fn new() -> Self {
        Collector {
            episodes: Vec::new(),
        }
    }

    pub fn append_episode(&mut self, episode: E) {
        self.episodes.push(episode);
    }

    /// Total transition count across all held episodes.
    pub fn size(&self) -> usize {
        self.episodes.iter().map(Episode::transitions).sum()
    }

    pub fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Discard all held experience.
    pub fn clear(&mut self) {
        self.episodes.clear();
    }

    /// Merge collectors into one, preserving insertion order.
    pub fn combine<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Collector<E>>,
    {
        let mut out = Collector::new();
        for part in parts {
            out.episodes.extend(part.episodes);
        }
        out
    }
}

impl<E: Episode> Default for Collector<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shuffle item indices and split them into minibatch index tensors.
pub(crate) fn shuffled_index_batches(
    items: usize,
    batchsize: usize,
    rng: &mut StdRng,
) -> Vec<Tensor> {
    let mut indices: Vec<i64> = (0..items as i64).collect();
    indices.shuffle(rng);
    indices
        .chunks(batchsize.max(1))
        .map(Tensor::from_slice)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_rng;

    #[test]
    fn collector_size_is_total_transition_count() {
        let mut collector: SenseCollector = Collector::new();
        for episode_len in [3usize, 5, 2] {
            let mut episode = SenseEpisode::new(4);
            for i in 0..episode_len {
                episode.push(&[0.0; 4], i as i64, 0.5);
            }
            collector.append_episode(episode);
        }
        assert_eq!(collector.size(), 10);
        assert_eq!(collector.episode_count(), 3);
        collector.clear();
        assert_eq!(collector.size(), 0);
        assert!(collector.is_empty());
    }

    #[test]
    fn combine_preserves_total_size() {
        let make = |len: usize| {
            let mut collector: SenseCollector = Collector::new();
            let mut episode = SenseEpisode::new(2);
            for _ in 0..len {
                episode.push(&[1.0, 0.0], 0, 0.0);
            }
            collector.append_episode(episode);
            collector
        };
        let combined = Collector::combine([make(4), make(6)]);
        assert_eq!(combined.size(), 10);
        assert_eq!(combined.episode_count(), 2);
    }

    #[test]
    fn index_batches_cover_all_items() {
        let mut rng = create_rng();
        let batches = shuffled_index_batches(10, 4, &mut rng);
        assert_eq!(batches.len(), 3);
        let mut seen: Vec<i64> = batches
            .iter()
            .flat_map(|t| Vec::<i64>::try_from(t).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}
