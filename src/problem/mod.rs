pub mod reverse_recall;
pub mod toy;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::curriculum::{CurriculumConfig, CurriculumState};
use crate::error::Result;
use crate::math::Matrix;
use crate::stats::{StatisticsAggregator, StatisticsCollector};

pub use reverse_recall::ReverseRecall;
pub use toy::{ToyClassification, ToyKind};

/// One input/target pair produced by a problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f64>,
    pub target: Vec<f64>,
}

/// A collated group of samples: one row per sample.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Matrix,
    pub targets: Matrix,
    /// Dataset indices of the rows, in row order.
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.inputs.rows
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.rows == 0
    }
}

/// Sizes a model needs to fit a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemDefaults {
    pub input_size: usize,
    pub output_size: usize,
}

/// A task the trainer can learn: an indexable sample source with an epoch
/// lifecycle, a curriculum, and its own statistics.
///
/// Sampling takes `&self` so a data loader can share the problem across
/// worker threads; everything that changes the problem (epoch hooks,
/// curriculum updates) takes `&mut self` and happens between epochs.
pub trait Problem: Send + Sync {
    fn name(&self) -> &str;

    fn default_values(&self) -> ProblemDefaults;

    /// Number of samples in one epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produces sample `index`. Generated problems draw from `rng`, which the
    /// data loader derives from the run seed, the epoch and the index.
    fn sample(&self, index: usize, rng: &mut StdRng) -> Result<Sample>;

    fn collate(&self, samples: Vec<(usize, Sample)>) -> Batch {
        collate_samples(samples)
    }

    /// Number of batches in one epoch.
    fn get_epoch_size(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        (self.len() + batch_size - 1) / batch_size
    }

    fn initialize_epoch(&mut self, _epoch: usize) {}

    fn finalize_epoch(&mut self, _epoch: usize) {}

    /// Installs the curriculum from configuration; `None` disables it.
    fn curriculum_learning_initialize(&mut self, config: Option<&CurriculumConfig>) -> Result<()>;

    /// Advances the curriculum to `episode`; returns whether it is finished.
    fn curriculum_learning_update_params(&mut self, episode: usize) -> bool;

    fn curriculum_state(&self) -> CurriculumState;

    fn add_statistics(&self, _collector: &mut StatisticsCollector) {}

    /// Records problem statistics for one episode.
    fn collect_statistics(
        &self,
        _collector: &mut StatisticsCollector,
        _batch: &Batch,
        _predictions: &Matrix,
    ) -> Result<()> {
        Ok(())
    }

    fn add_aggregators(&self, _aggregator: &mut StatisticsAggregator) {}

    /// Hook for problem-specific reductions. Registered keys are already
    /// reduced over the window by the trainer before this is called.
    fn aggregate_statistics(&self, _collector: &StatisticsCollector, _aggregator: &mut StatisticsAggregator) {}
}

/// Stacks samples into a batch, keeping their order.
pub fn collate_samples(samples: Vec<(usize, Sample)>) -> Batch {
    let mut indices = Vec::with_capacity(samples.len());
    let mut inputs = Vec::with_capacity(samples.len());
    let mut targets = Vec::with_capacity(samples.len());
    for (index, sample) in samples {
        indices.push(index);
        inputs.push(sample.input);
        targets.push(sample.target);
    }
    Batch {
        inputs: Matrix::from_rows(&inputs),
        targets: Matrix::from_rows(&targets),
        indices,
    }
}

/// Fraction of rows whose predicted class (argmax) matches the target's.
pub fn argmax_accuracy(predictions: &Matrix, targets: &Matrix) -> f64 {
    if predictions.rows == 0 {
        return 0.0;
    }
    let correct = (0..predictions.rows)
        .filter(|&r| argmax(predictions.row(r)) == argmax(targets.row(r)))
        .count();
    correct as f64 / predictions.rows as f64
}

/// Index of the maximum element in a slice.
fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collate_keeps_sample_order() {
        let batch = collate_samples(vec![
            (7, Sample { input: vec![1.0, 2.0], target: vec![0.0] }),
            (3, Sample { input: vec![3.0, 4.0], target: vec![1.0] }),
        ]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.indices, vec![7, 3]);
        assert_eq!(batch.inputs.row(1), &[3.0, 4.0]);
        assert_eq!(batch.targets.row(0), &[0.0]);
    }

    #[test]
    fn accuracy_compares_argmax() {
        let preds = Matrix::from_rows(&[vec![0.9, 0.1], vec![0.2, 0.8], vec![0.6, 0.4]]);
        let targets = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 1.0]]);
        assert!((argmax_accuracy(&preds, &targets) - 2.0 / 3.0).abs() < 1e-12);
    }
}
