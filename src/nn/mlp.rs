use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::ParamTree;
use crate::error::{Result, TrainerError};
use crate::math::Matrix;
use crate::model::{ForwardOutput, Mode, Model};
use crate::nn::{Activation, Dense, LossKind, Parameter};
use crate::problem::{Batch, ProblemDefaults};

/// Layout of the control channels inside a flattened sequence input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlChannels {
    /// Values per time step.
    pub step_width: usize,
    #[serde(default)]
    pub encode: usize,
    #[serde(default = "default_solve")]
    pub solve: usize,
}

fn default_solve() -> usize {
    1
}

/// `model` section for `name: mlp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    pub hidden_sizes: Vec<usize>,
    pub activation: Activation,
    pub output_activation: Activation,
    pub loss: LossKind,
    /// Must match the problem when given.
    pub input_size: Option<usize>,
    pub output_size: Option<usize>,
    pub control: Option<ControlChannels>,
}

impl Default for MlpConfig {
    fn default() -> Self {
        MlpConfig {
            hidden_sizes: vec![16],
            activation: Activation::Sigmoid,
            output_activation: Activation::Sigmoid,
            loss: LossKind::Mse,
            input_size: None,
            output_size: None,
            control: None,
        }
    }
}

impl MlpConfig {
    pub fn from_params(section: &ParamTree) -> Result<MlpConfig> {
        serde_yaml::from_value(section.as_value().clone()).map_err(|e| TrainerError::invalid_config("model", e.to_string()))
    }
}

/// Dense multi-layer perceptron over flattened inputs.
pub struct Mlp {
    layers: Vec<Dense>,
    loss: LossKind,
    control: Option<ControlChannels>,
    mode: Mode,
    // predictions and targets of the last training forward pass
    pending: Option<(Matrix, Matrix)>,
}

#[derive(Serialize, Deserialize)]
struct StoredParameter {
    name: String,
    value: Matrix,
}

impl Mlp {
    /// Builds the network for a problem's sizes. Explicit `input_size` /
    /// `output_size` in the config that disagree with the problem are rejected.
    pub fn new(config: &MlpConfig, defaults: ProblemDefaults, seed: u64) -> Result<Mlp> {
        check_size("model.input_size", config.input_size, defaults.input_size)?;
        check_size("model.output_size", config.output_size, defaults.output_size)?;
        if config.hidden_sizes.iter().any(|&h| h == 0) {
            return Err(TrainerError::invalid_config("model.hidden_sizes", "layer sizes must be positive"));
        }
        if config.activation == Activation::Softmax {
            return Err(TrainerError::invalid_config("model.activation", "softmax is only valid on the output layer"));
        }
        let softmax_out = config.output_activation == Activation::Softmax;
        if softmax_out != (config.loss == LossKind::CrossEntropy) {
            return Err(TrainerError::invalid_config(
                "model.loss",
                "cross_entropy and a softmax output activation must be used together",
            ));
        }
        if let Some(control) = config.control {
            if control.step_width == 0
                || defaults.input_size % control.step_width != 0
                || control.encode >= control.step_width
                || control.solve >= control.step_width
                || control.encode == control.solve
            {
                return Err(TrainerError::invalid_config(
                    "model.control",
                    format!("channels {:?} do not fit inputs of width {}", control, defaults.input_size),
                ));
            }
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut sizes = vec![defaults.input_size];
        sizes.extend(&config.hidden_sizes);
        sizes.push(defaults.output_size);

        let last = sizes.len() - 2;
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let activation = if i == last { config.output_activation } else { config.activation };
                Dense::new(i, w[0], w[1], activation, &mut rng)
            })
            .collect();

        Ok(Mlp { layers, loss: config.loss, control: config.control, mode: Mode::Train, pending: None })
    }

    /// Rejects any time step that sets both the encode and the solve bit.
    fn check_control(&self, inputs: &Matrix) -> Result<()> {
        let control = match self.control {
            Some(c) => c,
            None => return Ok(()),
        };
        for r in 0..inputs.rows {
            for (step, values) in inputs.row(r).chunks(control.step_width).enumerate() {
                if values[control.encode] > 0.5 && values[control.solve] > 0.5 {
                    return Err(TrainerError::PolicyViolation(format!(
                        "both encoding and solving control bits are set (sample {}, step {})",
                        r, step
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_size(key: &str, configured: Option<usize>, expected: usize) -> Result<()> {
    match configured {
        Some(n) if n != expected => Err(TrainerError::invalid_config(
            key,
            format!("model expects {} but the problem provides {}", n, expected),
        )),
        _ => Ok(()),
    }
}

impl Model for Mlp {
    fn name(&self) -> &str {
        "mlp"
    }

    fn forward(&mut self, batch: &Batch) -> Result<ForwardOutput> {
        let expected = self.layers[0].input_size();
        if batch.inputs.cols != expected {
            return Err(TrainerError::Computation(format!(
                "input width {} does not match the model's {}",
                batch.inputs.cols, expected
            )));
        }
        self.check_control(&batch.inputs)?;

        let keep = self.mode == Mode::Train;
        let mut current = batch.inputs.clone();
        for layer in &mut self.layers {
            current = layer.forward(&current, keep);
        }

        let loss = self.loss.loss(&current, &batch.targets);
        if !loss.is_finite() {
            return Err(TrainerError::Computation(format!("loss is not finite ({})", loss)));
        }
        self.pending = if keep { Some((current.clone(), batch.targets.clone())) } else { None };
        Ok(ForwardOutput { predictions: current, loss })
    }

    fn backward(&mut self) -> Result<()> {
        if self.mode == Mode::Eval {
            return Err(TrainerError::Computation("backward called in evaluation mode".to_string()));
        }
        let (predictions, targets) = self
            .pending
            .take()
            .ok_or_else(|| TrainerError::Computation("backward without a forward pass".to_string()))?;

        // Gradients are averaged over the batch.
        let inv_batch = 1.0 / predictions.rows.max(1) as f64;
        let mut delta = self.loss.delta(&predictions, &targets).map(|x| x * inv_batch);
        for layer in self.layers.iter_mut().rev() {
            delta = layer.backward(&delta)?;
        }
        Ok(())
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Eval {
            self.pending = None;
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layers.iter_mut().flat_map(|l| l.parameters_mut()).collect()
    }

    fn export_parameters(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.parameters())?)
    }

    fn import_parameters(&mut self, parameters: serde_json::Value) -> Result<()> {
        let stored: Vec<StoredParameter> = serde_json::from_value(parameters)?;
        let mut params = self.parameters_mut();
        if stored.len() != params.len() {
            return Err(TrainerError::Computation(format!(
                "expected {} parameters, found {}",
                params.len(),
                stored.len()
            )));
        }
        for (p, s) in params.iter().zip(&stored) {
            if p.name != s.name || p.shape() != (s.value.rows, s.value.cols) {
                return Err(TrainerError::Computation(format!(
                    "parameter {} {:?} does not match stored {} {}x{}",
                    p.name,
                    p.shape(),
                    s.name,
                    s.value.rows,
                    s.value.cols
                )));
            }
        }
        for (p, s) in params.iter_mut().zip(stored) {
            p.value = s.value;
            p.zero_grad();
        }
        Ok(())
    }
}
