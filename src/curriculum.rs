//! Curriculum learning: problem difficulty as a function of training progress.
//!
//! A curriculum is a list of phases ordered by the global episode at which
//! they start. Each phase overrides some of the problem's difficulty
//! parameters (for instance `max_sequence_length`). The controller is owned
//! by the problem; the trainer only advances it once per epoch and reads
//! back a snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};

/// Difficulty parameters of a problem, by name.
pub type CurriculumParams = BTreeMap<String, f64>;

/// One curriculum phase: from `episode` on, apply `params`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumPhase {
    pub episode: usize,
    #[serde(default)]
    pub params: CurriculumParams,
}

/// `training.curriculum_learning`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumConfig {
    #[serde(default)]
    pub phases: Vec<CurriculumPhase>,
    /// Convergence is only accepted once the last phase has been reached.
    #[serde(default = "default_must_finish")]
    pub must_finish: bool,
}

fn default_must_finish() -> bool {
    true
}

/// Read-only view of a problem's curriculum, handed to the trainer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurriculumState {
    pub params: CurriculumParams,
    pub finished: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CurriculumController {
    phases: Vec<CurriculumPhase>,
    base: CurriculumParams,
    params: CurriculumParams,
    finished: bool,
}

impl CurriculumController {
    /// A controller with no phases; `update` always reports finished.
    pub fn disabled(base: CurriculumParams) -> Self {
        CurriculumController { phases: Vec::new(), params: base.clone(), base, finished: true }
    }

    /// Builds a controller over the problem's initial parameters.
    ///
    /// Phases must be strictly ascending by episode.
    pub fn initialize(config: Option<&CurriculumConfig>, base: CurriculumParams) -> Result<Self> {
        let config = match config {
            Some(c) if !c.phases.is_empty() => c,
            _ => return Ok(Self::disabled(base)),
        };

        if let Some(pair) = config.phases.windows(2).find(|w| w[0].episode >= w[1].episode) {
            return Err(TrainerError::invalid_config(
                "training.curriculum_learning.phases",
                format!(
                    "phases must be strictly ascending by episode ({} is followed by {})",
                    pair[0].episode, pair[1].episode
                ),
            ));
        }

        Ok(CurriculumController {
            phases: config.phases.clone(),
            params: base.clone(),
            base,
            finished: false,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.phases.is_empty()
    }

    /// Applies every phase whose threshold is `<= episode`, the highest last.
    ///
    /// Returns `true` once the final phase has been applied; the flag never
    /// goes back to `false`.
    pub fn update(&mut self, episode: usize) -> bool {
        if self.phases.is_empty() {
            return true;
        }

        let reached = self.phases.iter().take_while(|p| p.episode <= episode).count();
        let mut params = self.base.clone();
        for phase in &self.phases[..reached] {
            params.extend(phase.params.iter().map(|(k, v)| (k.clone(), *v)));
        }
        // Once finished, an earlier episode must not roll the parameters back.
        if !self.finished {
            self.params = params;
        }

        if reached == self.phases.len() {
            self.finished = true;
        }
        self.finished
    }

    pub fn params(&self) -> &CurriculumParams {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<f64> {
        self.params.get(key).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn state(&self) -> CurriculumState {
        CurriculumState { params: self.params.clone(), finished: self.finished }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, f64)]) -> CurriculumParams {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn two_phase() -> CurriculumConfig {
        CurriculumConfig {
            phases: vec![
                CurriculumPhase { episode: 0, params: params(&[("len", 1.0)]) },
                CurriculumPhase { episode: 1000, params: params(&[("len", 5.0)]) },
            ],
            must_finish: true,
        }
    }

    #[test]
    fn applies_highest_reached_phase() {
        let mut ctl = CurriculumController::initialize(Some(&two_phase()), params(&[("len", 3.0)])).unwrap();

        assert!(!ctl.update(500));
        assert_eq!(ctl.params(), &params(&[("len", 1.0)]));

        assert!(ctl.update(1000));
        assert_eq!(ctl.params(), &params(&[("len", 5.0)]));
    }

    #[test]
    fn finished_is_a_latch() {
        let mut ctl = CurriculumController::initialize(Some(&two_phase()), CurriculumParams::new()).unwrap();
        assert!(ctl.update(1200));
        assert!(ctl.update(10));
        assert_eq!(ctl.param("len"), Some(5.0));
    }

    #[test]
    fn before_first_phase_keeps_base_params() {
        let config = CurriculumConfig {
            phases: vec![CurriculumPhase { episode: 100, params: params(&[("len", 4.0)]) }],
            must_finish: false,
        };
        let mut ctl = CurriculumController::initialize(Some(&config), params(&[("len", 2.0), ("bias", 0.5)])).unwrap();
        assert!(!ctl.update(99));
        assert_eq!(ctl.param("len"), Some(2.0));
        assert!(ctl.update(100));
        assert_eq!(ctl.params(), &params(&[("bias", 0.5), ("len", 4.0)]));
    }

    #[test]
    fn no_curriculum_is_trivially_finished() {
        let mut ctl = CurriculumController::initialize(None, params(&[("len", 2.0)])).unwrap();
        assert!(!ctl.is_enabled());
        assert!(ctl.update(0));
        assert_eq!(ctl.param("len"), Some(2.0));
    }

    #[test]
    fn rejects_unordered_phases() {
        let mut config = two_phase();
        config.phases.reverse();
        assert!(matches!(
            CurriculumController::initialize(Some(&config), CurriculumParams::new()),
            Err(TrainerError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn config_parses_from_yaml() {
        let config: CurriculumConfig = serde_yaml::from_str(
            "phases:\n  - { episode: 0, params: { max_sequence_length: 2 } }\n  - { episode: 50, params: { max_sequence_length: 6 } }\n",
        )
        .unwrap();
        assert!(config.must_finish);
        assert_eq!(config.phases[1].episode, 50);
        assert_eq!(config.phases[1].params["max_sequence_length"], 6.0);
    }
}
