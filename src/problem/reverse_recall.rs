use rand::rngs::StdRng;
use rand::Rng;

use crate::config::ParamTree;
use crate::curriculum::{CurriculumConfig, CurriculumController, CurriculumParams, CurriculumState};
use crate::error::{Result, TrainerError};
use crate::math::Matrix;
use crate::problem::{Batch, Problem, ProblemDefaults, Sample};
use crate::stats::{StatFormat, StatisticsAggregator, StatisticsCollector};

/// Number of control channels in front of the data bits of every step.
pub const CONTROL_BITS: usize = 2;
/// Control channel marking a step to memorize.
pub const ENCODE_BIT: usize = 0;
/// Control channel marking a step to recall.
pub const SOLVE_BIT: usize = 1;

/// Algorithmic memory task: store a random bit sequence, then emit it reversed.
///
/// Every sample is a flattened sequence of `2 * capacity` steps of
/// `CONTROL_BITS + data_bits` values. The first `capacity` steps carry the
/// sequence (encode bit set on the `len` used steps), the last `capacity`
/// steps are recall steps (solve bit set on the first `len`). The target
/// holds the reversed sequence for the recall steps, zero elsewhere.
///
/// Config keys: `data_bits` (4), `min_sequence_length` (1),
/// `max_sequence_length` (4), `capacity` (defaults to
/// `max_sequence_length`), `bias` (probability of a 1 bit, 0.5), `size`
/// (samples per epoch, 256). Curriculum parameter: `max_sequence_length`.
pub struct ReverseRecall {
    data_bits: usize,
    min_len: usize,
    capacity: usize,
    bias: f64,
    size: usize,
    curriculum: CurriculumController,
}

impl ReverseRecall {
    pub fn new(data_bits: usize, min_len: usize, max_len: usize, capacity: usize, size: usize) -> Result<Self> {
        if data_bits == 0 {
            return Err(TrainerError::invalid_config("problem.data_bits", "must be at least 1"));
        }
        if min_len == 0 || min_len > max_len {
            return Err(TrainerError::invalid_config(
                "problem.min_sequence_length",
                format!("must be in 1..={}", max_len),
            ));
        }
        if max_len > capacity {
            return Err(TrainerError::invalid_config(
                "problem.capacity",
                format!("capacity {} is smaller than max_sequence_length {}", capacity, max_len),
            ));
        }
        Ok(ReverseRecall {
            data_bits,
            min_len,
            capacity,
            bias: 0.5,
            size,
            curriculum: CurriculumController::disabled(base_params(max_len)),
        })
    }

    pub fn from_params(section: &ParamTree) -> Result<Self> {
        let data_bits = section.get_usize("data_bits")?.unwrap_or(4);
        let min_len = section.get_usize("min_sequence_length")?.unwrap_or(1);
        let max_len = section.get_usize("max_sequence_length")?.unwrap_or(4);
        let capacity = section.get_usize("capacity")?.unwrap_or(max_len);
        let size = section.get_usize("size")?.unwrap_or(256);
        let mut problem = Self::new(data_bits, min_len, max_len, capacity, size)?;
        if let Some(bias) = section.get_f64("bias")? {
            if !(0.0..=1.0).contains(&bias) {
                return Err(TrainerError::invalid_config("problem.bias", "must be within [0, 1]"));
            }
            problem.bias = bias;
        }
        Ok(problem)
    }

    pub fn step_width(&self) -> usize {
        CONTROL_BITS + self.data_bits
    }

    pub fn max_len(&self) -> usize {
        self.curriculum
            .param("max_sequence_length")
            .map(|v| v as usize)
            .unwrap_or(self.capacity)
            .clamp(self.min_len, self.capacity)
    }

    /// Recall-step mask for one flattened input row: the step indices to score.
    fn solve_steps(&self, input: &[f64]) -> Vec<usize> {
        let width = self.step_width();
        (0..self.capacity)
            .filter(|&k| input[(self.capacity + k) * width + SOLVE_BIT] > 0.5)
            .collect()
    }
}

fn base_params(max_len: usize) -> CurriculumParams {
    CurriculumParams::from([("max_sequence_length".to_string(), max_len as f64)])
}

impl Problem for ReverseRecall {
    fn name(&self) -> &str {
        "reverse_recall"
    }

    fn default_values(&self) -> ProblemDefaults {
        ProblemDefaults {
            input_size: 2 * self.capacity * self.step_width(),
            output_size: self.capacity * self.data_bits,
        }
    }

    fn len(&self) -> usize {
        self.size
    }

    fn sample(&self, _index: usize, rng: &mut StdRng) -> Result<Sample> {
        let width = self.step_width();
        let len = rng.gen_range(self.min_len..=self.max_len());
        let bits: Vec<Vec<f64>> = (0..len)
            .map(|_| (0..self.data_bits).map(|_| if rng.gen_bool(self.bias) { 1.0 } else { 0.0 }).collect())
            .collect();

        let mut input = vec![0.0; 2 * self.capacity * width];
        let mut target = vec![0.0; self.capacity * self.data_bits];
        for (step, item) in bits.iter().enumerate() {
            let base = step * width;
            input[base + ENCODE_BIT] = 1.0;
            input[base + CONTROL_BITS..base + width].copy_from_slice(item);
        }
        for k in 0..len {
            input[(self.capacity + k) * width + SOLVE_BIT] = 1.0;
            target[k * self.data_bits..(k + 1) * self.data_bits].copy_from_slice(&bits[len - 1 - k]);
        }
        Ok(Sample { input, target })
    }

    fn curriculum_learning_initialize(&mut self, config: Option<&CurriculumConfig>) -> Result<()> {
        if let Some(config) = config {
            for phase in &config.phases {
                if let Some(&len) = phase.params.get("max_sequence_length") {
                    if len < self.min_len as f64 || len > self.capacity as f64 {
                        return Err(TrainerError::invalid_config(
                            "training.curriculum_learning.phases",
                            format!("max_sequence_length {} outside {}..={}", len, self.min_len, self.capacity),
                        ));
                    }
                }
            }
        }
        self.curriculum = CurriculumController::initialize(config, base_params(self.max_len()))?;
        Ok(())
    }

    fn curriculum_learning_update_params(&mut self, episode: usize) -> bool {
        self.curriculum.update(episode)
    }

    fn curriculum_state(&self) -> CurriculumState {
        self.curriculum.state()
    }

    fn add_statistics(&self, collector: &mut StatisticsCollector) {
        collector.register("seq_length", StatFormat::Float { precision: 2 });
        collector.register("max_seq_length", StatFormat::Integer { width: 2 });
        collector.register("bit_accuracy", StatFormat::Float { precision: 4 });
    }

    fn collect_statistics(&self, collector: &mut StatisticsCollector, batch: &Batch, predictions: &Matrix) -> Result<()> {
        let mut lengths = 0usize;
        let mut scored = 0usize;
        let mut correct = 0usize;
        for row in 0..batch.len() {
            let steps = self.solve_steps(batch.inputs.row(row));
            lengths += steps.len();
            for k in steps {
                for bit in 0..self.data_bits {
                    let col = k * self.data_bits + bit;
                    let predicted = predictions.get(row, col) > 0.5;
                    let expected = batch.targets.get(row, col) > 0.5;
                    scored += 1;
                    correct += usize::from(predicted == expected);
                }
            }
        }
        let rows = batch.len().max(1) as f64;
        collector.set("seq_length", lengths as f64 / rows)?;
        collector.set("max_seq_length", self.max_len() as f64)?;
        let accuracy = if scored == 0 { 0.0 } else { correct as f64 / scored as f64 };
        collector.set("bit_accuracy", accuracy)
    }

    fn add_aggregators(&self, aggregator: &mut StatisticsAggregator) {
        aggregator.register_reduced("seq_length", StatFormat::Float { precision: 2 });
        aggregator.register_reduced("bit_accuracy", StatFormat::Float { precision: 4 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::collate_samples;
    use rand::SeedableRng;

    fn problem() -> ReverseRecall {
        ReverseRecall::new(3, 1, 2, 4, 16).unwrap()
    }

    #[test]
    fn sizes_follow_capacity() {
        let p = problem();
        assert_eq!(p.default_values(), ProblemDefaults { input_size: 2 * 4 * 5, output_size: 12 });
        assert_eq!(p.max_len(), 2);
    }

    #[test]
    fn target_is_reversed_sequence() {
        let p = problem();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let s = p.sample(0, &mut rng).unwrap();
            let width = p.step_width();
            let len = (0..4).filter(|&k| s.input[k * width + ENCODE_BIT] == 1.0).count();
            assert!((1..=2).contains(&len));
            for k in 0..len {
                let stored = &s.input[(len - 1 - k) * width + CONTROL_BITS..(len - k) * width];
                assert_eq!(&s.target[k * 3..(k + 1) * 3], stored);
            }
            assert_eq!(p.solve_steps(&s.input).len(), len);
        }
    }

    #[test]
    fn curriculum_grows_sequences_within_capacity() {
        let mut p = problem();
        let config: CurriculumConfig = serde_yaml::from_str(
            "phases: [ { episode: 0, params: { max_sequence_length: 1 } }, { episode: 10, params: { max_sequence_length: 4 } } ]",
        )
        .unwrap();
        p.curriculum_learning_initialize(Some(&config)).unwrap();
        assert!(!p.curriculum_learning_update_params(0));
        assert_eq!(p.max_len(), 1);
        assert!(p.curriculum_learning_update_params(10));
        assert_eq!(p.max_len(), 4);
    }

    #[test]
    fn curriculum_beyond_capacity_is_rejected() {
        let mut p = problem();
        let config: CurriculumConfig =
            serde_yaml::from_str("phases: [ { episode: 0, params: { max_sequence_length: 9 } } ]").unwrap();
        assert!(p.curriculum_learning_initialize(Some(&config)).is_err());
    }

    #[test]
    fn perfect_predictions_score_full_bit_accuracy() {
        let p = problem();
        let mut rng = StdRng::seed_from_u64(5);
        let samples = (0..4).map(|i| (i, p.sample(i, &mut rng).unwrap())).collect();
        let batch = collate_samples(samples);

        let mut col = StatisticsCollector::new();
        p.add_statistics(&mut col);
        p.collect_statistics(&mut col, &batch, &batch.targets.clone()).unwrap();
        assert_eq!(col.get("bit_accuracy"), Some(1.0));
        assert_eq!(col.get("max_seq_length"), Some(2.0));
    }
}
