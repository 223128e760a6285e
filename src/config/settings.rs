use serde::{Deserialize, Serialize};

use crate::config::params::ParamTree;
use crate::curriculum::CurriculumConfig;
use crate::error::{Result, TrainerError};

/// Keys without which a run cannot even be laid out on disk.
pub const TRAINING_PROBLEM_NAME: &str = "training.problem.name";
pub const VALIDATION_PROBLEM_NAME: &str = "validation.problem.name";
pub const MODEL_NAME: &str = "model.name";
pub const MAX_EPOCHS: &str = "training.terminal_condition.max_epochs";

/// `training.dataloader` / `validation.dataloader`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLoaderSettings {
    /// Falls back to `<section>.problem.batch_size`, then 1.
    pub batch_size: Option<usize>,
    pub shuffle: bool,
    pub num_workers: usize,
    pub drop_last: bool,
    /// Batches buffered per worker when `num_workers > 0`.
    pub prefetch: usize,
}

impl Default for DataLoaderSettings {
    fn default() -> Self {
        DataLoaderSettings { batch_size: None, shuffle: true, num_workers: 0, drop_last: false, prefetch: 2 }
    }
}

/// `training.optimizer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub name: String,
    pub lr: f64,
    pub momentum: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            name: String::new(),
            lr: 0.01,
            momentum: 0.0,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// `training.terminal_condition.early_stop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopSettings {
    pub patience: usize,
    #[serde(default)]
    pub min_delta: f64,
}

/// Everything the trainer reads from the configuration, resolved once.
#[derive(Debug, Clone)]
pub struct TrainingSettings {
    pub problem_name: String,
    pub validation_problem_name: String,
    pub model_name: String,
    pub max_epochs: usize,
    pub loss_stop: Option<f64>,
    pub early_stop: Option<EarlyStopSettings>,
    pub gradient_clipping: Option<f64>,
    pub partial_validation_interval: Option<usize>,
    pub seed: u64,
    pub curriculum: Option<CurriculumConfig>,
    pub optimizer: OptimizerSettings,
    pub training_loader: DataLoaderSettings,
    pub validation_loader: DataLoaderSettings,
}

impl TrainingSettings {
    pub fn from_params(params: &ParamTree) -> Result<TrainingSettings> {
        let problem_name = params.require_str(TRAINING_PROBLEM_NAME)?.to_string();
        let validation_problem_name = params.require_str(VALIDATION_PROBLEM_NAME)?.to_string();
        let model_name = params.require_str(MODEL_NAME)?.to_string();
        let max_epochs = params.require_usize(MAX_EPOCHS)?;
        if max_epochs == 0 {
            return Err(TrainerError::invalid_config(MAX_EPOCHS, "must be at least 1"));
        }

        let gradient_clipping = params.get_f64("training.gradient_clipping")?;
        if let Some(clip) = gradient_clipping {
            if !(clip > 0.0) {
                return Err(TrainerError::invalid_config("training.gradient_clipping", "must be positive"));
            }
        }

        let early_stop = if params.contains("training.terminal_condition.early_stop") {
            Some(params.deserialize_section::<EarlyStopSettings>("training.terminal_condition.early_stop")?)
        } else {
            None
        };

        let partial_validation_interval = params.get_usize("training.partial_validation_interval")?;
        if partial_validation_interval == Some(0) {
            return Err(TrainerError::invalid_config(
                "training.partial_validation_interval",
                "must be a positive number of episodes",
            ));
        }

        let curriculum = if params.contains("training.curriculum_learning") {
            Some(params.deserialize_section::<CurriculumConfig>("training.curriculum_learning")?)
        } else {
            None
        };

        let optimizer: OptimizerSettings = params.deserialize_section("training.optimizer")?;
        if optimizer.name.is_empty() {
            return Err(TrainerError::MissingConfigKey("training.optimizer.name".to_string()));
        }

        Ok(TrainingSettings {
            problem_name,
            validation_problem_name,
            model_name,
            max_epochs,
            loss_stop: params.get_f64("training.terminal_condition.loss_stop")?,
            early_stop,
            gradient_clipping,
            partial_validation_interval,
            seed: params.get_usize("training.seed")?.unwrap_or(0) as u64,
            curriculum,
            optimizer,
            training_loader: loader_settings(params, "training")?,
            validation_loader: loader_settings(params, "validation")?,
        })
    }
}

fn loader_settings(params: &ParamTree, section: &str) -> Result<DataLoaderSettings> {
    let mut settings: DataLoaderSettings = params.deserialize_section(&format!("{}.dataloader", section))?;
    if settings.batch_size.is_none() {
        settings.batch_size = params.get_usize(&format!("{}.problem.batch_size", section))?;
    }
    if settings.batch_size == Some(0) {
        return Err(TrainerError::invalid_config(format!("{}.dataloader.batch_size", section), "must be at least 1"));
    }
    Ok(settings)
}
