use crate::error::{Result, TrainerError};
use crate::math::Matrix;
use crate::nn::Parameter;
use crate::optim::Optimizer;

/// Stochastic gradient descent with optional classical momentum.
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    velocities: Vec<Matrix>,
}

impl Sgd {
    pub fn new(learning_rate: f64, momentum: f64) -> Sgd {
        Sgd { learning_rate, momentum, velocities: Vec::new() }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &str {
        "sgd"
    }

    /// Applies one update to every parameter from its accumulated gradient.
    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<()> {
        if self.momentum == 0.0 {
            for p in params.iter_mut() {
                let grad = p.grad.clone();
                p.value.add_scaled(&grad, -self.learning_rate);
            }
            return Ok(());
        }

        if self.velocities.is_empty() {
            self.velocities = params.iter().map(|p| Matrix::zeros(p.value.rows, p.value.cols)).collect();
        }
        if self.velocities.len() != params.len() {
            return Err(TrainerError::Computation(format!(
                "sgd was set up for {} parameters, got {}",
                self.velocities.len(),
                params.len()
            )));
        }

        let (lr, momentum) = (self.learning_rate, self.momentum);
        // v = momentum * v + g;  w -= lr * v
        for (p, v) in params.iter_mut().zip(self.velocities.iter_mut()) {
            *v = v.zip_map(&p.grad, |vel, g| momentum * vel + g);
            p.value.add_scaled(v, -lr);
        }
        Ok(())
    }
}
