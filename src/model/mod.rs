pub mod checkpoint;

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::error::{Result, TrainerError};
use crate::math::Matrix;
use crate::nn::Parameter;
use crate::problem::Batch;
use crate::stats::{StatisticsAggregator, StatisticsCollector};

pub use checkpoint::{Checkpoint, BEST_FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Result of one forward pass.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    pub predictions: Matrix,
    pub loss: f64,
}

/// A trainable model, selected by name from configuration.
///
/// `forward` in `Mode::Train` caches whatever `backward` needs; in
/// `Mode::Eval` nothing is cached and `backward` fails.
pub trait Model {
    fn name(&self) -> &str;

    fn forward(&mut self, batch: &Batch) -> Result<ForwardOutput>;

    /// Accumulates parameter gradients from the last training forward pass.
    fn backward(&mut self) -> Result<()>;

    fn set_mode(&mut self, mode: Mode);

    fn mode(&self) -> Mode;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }

    fn export_parameters(&self) -> Result<serde_json::Value>;

    fn import_parameters(&mut self, parameters: serde_json::Value) -> Result<()>;

    fn add_statistics(&self, _collector: &mut StatisticsCollector) {}

    fn aggregate_statistics(&self, _collector: &StatisticsCollector, _aggregator: &mut StatisticsAggregator) {}

    /// Writes `model_epoch_<NNNN>.json` into `dir` and returns the
    /// checkpoint that was written.
    fn save(
        &self,
        dir: &Path,
        loss: f64,
        aggregated: &BTreeMap<String, f64>,
        epoch: usize,
        episode: usize,
    ) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::new(self.name(), epoch, episode, loss, aggregated, self.export_parameters()?);
        checkpoint.write(&dir.join(checkpoint::epoch_file(epoch)))?;
        Ok(checkpoint)
    }

    /// Restores parameters from a checkpoint file written by `save`.
    fn load(&mut self, path: &Path) -> Result<Checkpoint> {
        let checkpoint = Checkpoint::read(path)?;
        if checkpoint.model != self.name() {
            return Err(TrainerError::CheckpointLoad {
                path: path.to_path_buf(),
                reason: format!("checkpoint belongs to model '{}', not '{}'", checkpoint.model, self.name()),
            });
        }
        self.import_parameters(checkpoint.parameters.clone()).map_err(|e| TrainerError::CheckpointLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(checkpoint)
    }
}

/// Holds a model in `Mode::Eval` for its lifetime and restores the previous
/// mode when dropped, including on early return through `?`.
pub struct InferenceGuard<'a> {
    model: &'a mut dyn Model,
    previous: Mode,
}

impl<'a> InferenceGuard<'a> {
    pub fn new(model: &'a mut dyn Model) -> InferenceGuard<'a> {
        let previous = model.mode();
        model.set_mode(Mode::Eval);
        InferenceGuard { model, previous }
    }
}

impl<'a> Deref for InferenceGuard<'a> {
    type Target = dyn Model + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.model
    }
}

impl<'a> DerefMut for InferenceGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.model
    }
}

impl Drop for InferenceGuard<'_> {
    fn drop(&mut self) {
        self.model.set_mode(self.previous);
    }
}
