use crate::error::{Result, TrainerError};

/// Which phases show batches through the visualizer (`--visualize`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualizationMode {
    #[default]
    Off,
    /// Level 0: training episodes only.
    Training,
    /// Level 1: training episodes and one batch per validation pass.
    TrainingAndValidation,
    /// Level 2: one batch per validation pass.
    Validation,
    /// Level 3: one batch of the final validation pass.
    FinalValidation,
}

impl VisualizationMode {
    pub fn from_level(level: Option<u8>) -> Result<VisualizationMode> {
        match level {
            None => Ok(VisualizationMode::Off),
            Some(0) => Ok(VisualizationMode::Training),
            Some(1) => Ok(VisualizationMode::TrainingAndValidation),
            Some(2) => Ok(VisualizationMode::Validation),
            Some(3) => Ok(VisualizationMode::FinalValidation),
            Some(other) => Err(TrainerError::invalid_config("visualize", format!("level {} is not in 0..=3", other))),
        }
    }

    pub fn training(&self) -> bool {
        matches!(self, VisualizationMode::Training | VisualizationMode::TrainingAndValidation)
    }

    pub fn validation(&self) -> bool {
        matches!(self, VisualizationMode::TrainingAndValidation | VisualizationMode::Validation)
    }

    pub fn final_validation(&self) -> bool {
        matches!(self, VisualizationMode::FinalValidation)
    }
}

/// What goes to TensorBoard (`--tensorboard`). Each level includes the
/// ones below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TensorboardLevel {
    /// Level 0: collected and aggregated statistics.
    Statistics,
    /// Level 1: plus histograms of the model parameters.
    Parameters,
    /// Level 2: plus histograms of their gradients.
    Gradients,
}

impl TensorboardLevel {
    pub fn from_level(level: Option<u8>) -> Result<Option<TensorboardLevel>> {
        match level {
            None => Ok(None),
            Some(0) => Ok(Some(TensorboardLevel::Statistics)),
            Some(1) => Ok(Some(TensorboardLevel::Parameters)),
            Some(2) => Ok(Some(TensorboardLevel::Gradients)),
            Some(other) => Err(TrainerError::invalid_config("tensorboard", format!("level {} is not in 0..=2", other))),
        }
    }
}

/// Run-wide settings fixed at start-up and shared read-only with every
/// component of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub seed: u64,
    pub visualization: VisualizationMode,
    /// The collector is written to the log every this many episodes.
    pub logging_interval: usize,
    /// TensorBoard export; `None` writes no event files.
    pub tensorboard: Option<TensorboardLevel>,
}

impl Default for RunContext {
    fn default() -> Self {
        RunContext { seed: 0, visualization: VisualizationMode::Off, logging_interval: 100, tensorboard: None }
    }
}

impl RunContext {
    pub fn should_log(&self, episode: usize) -> bool {
        self.logging_interval > 0 && episode % self.logging_interval == 0
    }
}
