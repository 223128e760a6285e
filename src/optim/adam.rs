use crate::error::{Result, TrainerError};
use crate::math::Matrix;
use crate::nn::Parameter;
use crate::optim::Optimizer;

/// Adam optimizer (Adaptive Moment Estimation)
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: Vec<Matrix>, // First moment
    v: Vec<Matrix>, // Second moment
}

impl Adam {
    pub fn new(lr: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self { lr, beta1, beta2, epsilon, t: 0, m: Vec::new(), v: Vec::new() }
    }

    /// Initialize moments if needed
    fn ensure_moments(&mut self, params: &[&mut Parameter]) -> Result<()> {
        if self.m.is_empty() {
            self.m = params.iter().map(|p| Matrix::zeros(p.value.rows, p.value.cols)).collect();
            self.v = self.m.clone();
        }
        if self.m.len() != params.len() {
            return Err(TrainerError::Computation(format!(
                "adam was set up for {} parameters, got {}",
                self.m.len(),
                params.len()
            )));
        }
        Ok(())
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &str {
        "adam"
    }

    fn step(&mut self, params: &mut [&mut Parameter]) -> Result<()> {
        self.ensure_moments(params)?;
        self.t += 1;

        // Bias correction folded into the step size
        let lr_t = self.lr * (1.0 - self.beta2.powi(self.t)).sqrt() / (1.0 - self.beta1.powi(self.t));

        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);
        for ((p, m), v) in params.iter_mut().zip(self.m.iter_mut()).zip(self.v.iter_mut()) {
            // m_t = b1 * m + (1 - b1) * g;  v_t = b2 * v + (1 - b2) * g^2
            *m = m.zip_map(&p.grad, |m, g| beta1 * m + (1.0 - beta1) * g);
            *v = v.zip_map(&p.grad, |v, g| beta2 * v + (1.0 - beta2) * g * g);
            let update = m.zip_map(v, |m, v| m / (v.sqrt() + eps));
            p.value.add_scaled(&update, -lr_t);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adam_converges_on_quadratic() {
        // f(x) = x^2, grad = 2x
        let mut p = Parameter::new("x", Matrix::from_rows(&[vec![5.0, -3.0, 2.0]]));
        let mut adam = Adam::new(0.1, 0.9, 0.999, 1e-8);
        for _ in 0..500 {
            p.grad = p.value.map(|x| 2.0 * x);
            adam.step(&mut [&mut p]).unwrap();
        }
        assert!(p.value.as_slice().iter().all(|x| x.abs() < 0.5));
    }

    #[test]
    fn first_step_has_magnitude_lr() {
        let mut p = Parameter::new("x", Matrix::from_rows(&[vec![1.0]]));
        p.grad = Matrix::from_rows(&[vec![3.0]]);
        Adam::new(0.01, 0.9, 0.999, 1e-8).step(&mut [&mut p]).unwrap();
        assert!((p.value.get(0, 0) - 0.99).abs() < 1e-6);
    }
}
