//! When to stop training.
//!
//! `evaluate` is a pure function of the epoch counters, the validation loss
//! and the curriculum state. Early stopping needs history, so it lives in
//! `EarlyStopping` and only its verdict enters `TerminalCondition::evaluate`.

use std::fmt;

use serde::Serialize;

use crate::config::{EarlyStopSettings, TrainingSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalDecision {
    Continue,
    ConvergedBelowThreshold,
    MaxEpochsReached,
    EarlyStopped,
}

impl TerminalDecision {
    pub fn is_terminal(&self) -> bool {
        *self != TerminalDecision::Continue
    }

    /// Only a loss below the threshold counts as convergence.
    pub fn converged(&self) -> bool {
        *self == TerminalDecision::ConvergedBelowThreshold
    }
}

impl fmt::Display for TerminalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TerminalDecision::Continue => "Continue.",
            TerminalDecision::ConvergedBelowThreshold => "Loss < Threshold.",
            TerminalDecision::MaxEpochsReached => "Maximum number of epochs reached.",
            TerminalDecision::EarlyStopped => "Early stopping: validation loss stopped improving.",
        };
        f.write_str(text)
    }
}

/// `current_epoch` is the number of completed epochs.
///
/// The epoch limit wins over everything. A loss below `loss_stop_threshold`
/// only counts once the curriculum is finished, unless finishing it is not
/// required. Without a threshold the run never converges.
pub fn evaluate(
    current_epoch: usize,
    max_epochs: usize,
    validation_loss_mean: f64,
    loss_stop_threshold: Option<f64>,
    curriculum_finished: bool,
    must_finish_curriculum: bool,
) -> TerminalDecision {
    if current_epoch >= max_epochs {
        return TerminalDecision::MaxEpochsReached;
    }
    if curriculum_finished || !must_finish_curriculum {
        if let Some(threshold) = loss_stop_threshold {
            if validation_loss_mean < threshold {
                return TerminalDecision::ConvergedBelowThreshold;
            }
        }
    }
    TerminalDecision::Continue
}

/// Patience-based stop on a loss that no longer improves by `min_delta`.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best_loss: f64,
    epochs_without_improvement: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        EarlyStopping { patience, min_delta, best_loss: f64::INFINITY, epochs_without_improvement: 0 }
    }

    /// Records one epoch's loss; returns whether it improved on the best.
    pub fn observe(&mut self, loss: f64) -> bool {
        if loss < self.best_loss - self.min_delta {
            self.best_loss = loss;
            self.epochs_without_improvement = 0;
            true
        } else {
            self.epochs_without_improvement += 1;
            false
        }
    }

    pub fn should_stop(&self) -> bool {
        self.patience > 0 && self.epochs_without_improvement >= self.patience
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }
}

impl From<EarlyStopSettings> for EarlyStopping {
    fn from(settings: EarlyStopSettings) -> Self {
        EarlyStopping::new(settings.patience, settings.min_delta)
    }
}

/// The terminal rules of one run.
#[derive(Debug, Clone)]
pub struct TerminalCondition {
    pub max_epochs: usize,
    pub loss_stop: Option<f64>,
    pub must_finish_curriculum: bool,
    early_stopping: Option<EarlyStopping>,
}

impl TerminalCondition {
    pub fn new(max_epochs: usize, loss_stop: Option<f64>, must_finish_curriculum: bool) -> Self {
        TerminalCondition { max_epochs, loss_stop, must_finish_curriculum, early_stopping: None }
    }

    pub fn with_early_stopping(mut self, early_stopping: EarlyStopping) -> Self {
        self.early_stopping = Some(early_stopping);
        self
    }

    pub fn from_settings(settings: &TrainingSettings) -> Self {
        let must_finish = settings.curriculum.as_ref().map_or(false, |c| c.must_finish);
        let condition = TerminalCondition::new(settings.max_epochs, settings.loss_stop, must_finish);
        match settings.early_stop {
            Some(es) => condition.with_early_stopping(es.into()),
            None => condition,
        }
    }

    /// Feeds this epoch's validation loss to early stopping, then decides.
    pub fn evaluate(&mut self, current_epoch: usize, validation_loss_mean: f64, curriculum_finished: bool) -> TerminalDecision {
        let early_stop = match self.early_stopping.as_mut() {
            Some(es) => {
                es.observe(validation_loss_mean);
                es.should_stop()
            }
            None => false,
        };
        match evaluate(
            current_epoch,
            self.max_epochs,
            validation_loss_mean,
            self.loss_stop,
            curriculum_finished,
            self.must_finish_curriculum,
        ) {
            TerminalDecision::Continue if early_stop => TerminalDecision::EarlyStopped,
            decision => decision,
        }
    }
}
