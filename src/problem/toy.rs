use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ParamTree;
use crate::curriculum::{CurriculumConfig, CurriculumController, CurriculumParams, CurriculumState};
use crate::error::{Result, TrainerError};
use crate::math::Matrix;
use crate::problem::{argmax_accuracy, Batch, Problem, ProblemDefaults, Sample};
use crate::stats::{StatFormat, StatisticsAggregator, StatisticsCollector};

/// Built-in 2D (or 2-bit) two-class datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToyKind {
    Xor,
    Circles,
    Blobs,
}

/// Small classification problem with one-hot targets of length 2.
///
/// Config keys (under `<section>.problem`): `kind` (default `xor`), `size`
/// (samples per epoch, default 64) and `noise` (jitter added to each point,
/// default 0). `noise` is also the curriculum parameter.
pub struct ToyClassification {
    kind: ToyKind,
    size: usize,
    curriculum: CurriculumController,
}

impl ToyClassification {
    pub fn new(kind: ToyKind, size: usize, noise: f64) -> Self {
        ToyClassification {
            kind,
            size,
            curriculum: CurriculumController::disabled(base_params(noise)),
        }
    }

    pub fn from_params(section: &ParamTree) -> Result<Self> {
        let kind = match section.get("kind") {
            None => ToyKind::Xor,
            Some(v) => serde_yaml::from_value(v.clone())
                .map_err(|e| TrainerError::invalid_config("problem.kind", e.to_string()))?,
        };
        let size = section.get_usize("size")?.unwrap_or(64);
        if size == 0 {
            return Err(TrainerError::invalid_config("problem.size", "must be at least 1"));
        }
        let noise = section.get_f64("noise")?.unwrap_or(0.0);
        Ok(Self::new(kind, size, noise))
    }

    fn noise(&self) -> f64 {
        self.curriculum.param("noise").unwrap_or(0.0)
    }
}

fn base_params(noise: f64) -> CurriculumParams {
    CurriculumParams::from([("noise".to_string(), noise)])
}

fn one_hot(class: usize) -> Vec<f64> {
    let mut oh = vec![0.0, 0.0];
    oh[class] = 1.0;
    oh
}

impl Problem for ToyClassification {
    fn name(&self) -> &str {
        "toy_classification"
    }

    fn default_values(&self) -> ProblemDefaults {
        ProblemDefaults { input_size: 2, output_size: 2 }
    }

    fn len(&self) -> usize {
        self.size
    }

    fn sample(&self, index: usize, rng: &mut StdRng) -> Result<Sample> {
        let (point, class) = match self.kind {
            ToyKind::Xor => {
                let a = (index & 1) as f64;
                let b = ((index >> 1) & 1) as f64;
                ([a, b], usize::from(a != b))
            }
            ToyKind::Circles => {
                let class = index % 2;
                let angle = (index as f64 / self.size as f64) * 2.0 * PI * 10.0;
                let radius = if class == 0 { 0.3 } else { 0.8 };
                let x = radius * angle.cos();
                let y = radius * angle.sin();
                ([(x + 1.0) / 2.0, (y + 1.0) / 2.0], class)
            }
            ToyKind::Blobs => {
                let class = index % 2;
                let (cx, cy) = [(0.3, 0.3), (0.7, 0.7)][class];
                let angle = index as f64 * 2.399;
                let r = 0.12 * (index as f64 * 0.31).sin().abs();
                ([cx + r * angle.cos(), cy + r * angle.sin()], class)
            }
        };

        let noise = self.noise();
        let input = point
            .iter()
            .map(|&v| {
                let jitter = if noise > 0.0 { rng.gen_range(-noise..=noise) } else { 0.0 };
                (v + jitter).clamp(0.0, 1.0)
            })
            .collect();
        Ok(Sample { input, target: one_hot(class) })
    }

    fn curriculum_learning_initialize(&mut self, config: Option<&CurriculumConfig>) -> Result<()> {
        let base = base_params(self.noise());
        self.curriculum = CurriculumController::initialize(config, base)?;
        Ok(())
    }

    fn curriculum_learning_update_params(&mut self, episode: usize) -> bool {
        self.curriculum.update(episode)
    }

    fn curriculum_state(&self) -> CurriculumState {
        self.curriculum.state()
    }

    fn add_statistics(&self, collector: &mut StatisticsCollector) {
        collector.register("accuracy", StatFormat::Float { precision: 4 });
    }

    fn collect_statistics(&self, collector: &mut StatisticsCollector, batch: &Batch, predictions: &Matrix) -> Result<()> {
        collector.set("accuracy", argmax_accuracy(predictions, &batch.targets))
    }

    fn add_aggregators(&self, aggregator: &mut StatisticsAggregator) {
        aggregator.register_reduced("accuracy", StatFormat::Float { precision: 4 });
    }
}
