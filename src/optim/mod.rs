pub mod adam;
pub mod clip;
pub mod sgd;

use crate::config::OptimizerSettings;
use crate::error::{Result, TrainerError};
use crate::nn::Parameter;

pub use adam::Adam;
pub use clip::clip_grad_value;
pub use sgd::Sgd;

/// Updates parameters in place from their accumulated gradients.
///
/// Stateful optimizers index their state by parameter position, so the
/// same parameter list (same order) must be passed on every step.
pub trait Optimizer {
    fn name(&self) -> &str;

    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<()>;
}

/// Resolves `training.optimizer.name`.
pub fn build_optimizer(settings: &OptimizerSettings) -> Result<Box<dyn Optimizer>> {
    if !(settings.lr > 0.0) {
        return Err(TrainerError::invalid_config("training.optimizer.lr", "must be positive"));
    }
    match settings.name.to_ascii_lowercase().as_str() {
        "sgd" => Ok(Box::new(Sgd::new(settings.lr, settings.momentum))),
        "adam" => Ok(Box::new(Adam::new(settings.lr, settings.beta1, settings.beta2, settings.eps))),
        other => Err(TrainerError::invalid_config(
            "training.optimizer.name",
            format!("unknown optimizer '{}' (expected sgd or adam)", other),
        )),
    }
}
