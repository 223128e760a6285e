use serde::{Deserialize, Serialize};
use std::f64::consts::E;

use crate::math::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    Relu,
    Tanh,
    Identity,
    /// Row-wise softmax. Only valid on the output layer, paired with the
    /// cross-entropy loss.
    Softmax,
}

impl Activation {
    /// Applies the activation to a batch of pre-activations (one row per sample).
    pub fn apply(&self, z: &Matrix) -> Matrix {
        match self {
            Activation::Softmax => softmax_rows(z),
            _ => z.map(|x| self.function(x)),
        }
    }

    fn function(&self, x: f64) -> f64 {
        match self {
            Activation::Sigmoid => 1.0 / (1.0 + E.powf(-x)),
            Activation::Relu => if x > 0.0 { x } else { 0.0 },
            Activation::Tanh => x.tanh(),
            Activation::Identity | Activation::Softmax => x,
        }
    }

    /// Element-wise derivative at the pre-activation `x`.
    ///
    /// Softmax returns `1.0`: the cross-entropy delta is already taken with
    /// respect to the logits, so the Jacobian must not be applied twice.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            Activation::Sigmoid => {
                let fx = self.function(x);
                fx * (1.0 - fx)
            }
            Activation::Relu => if x > 0.0 { 1.0 } else { 0.0 },
            Activation::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Activation::Identity | Activation::Softmax => 1.0,
        }
    }
}

fn softmax_rows(z: &Matrix) -> Matrix {
    let mut out = Matrix::zeros(z.rows, z.cols);
    for r in 0..z.rows {
        let row = z.row(r);
        // Shift by the max for numerical stability.
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = row.iter().map(|&x| (x - max).exp()).collect();
        let sum: f64 = exps.iter().sum();
        for (c, e) in exps.into_iter().enumerate() {
            out.set(r, c, e / sum);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_rows_sum_to_one() {
        let z = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![1000.0, 1000.0, 1000.0]]);
        let a = Activation::Softmax.apply(&z);
        for r in 0..2 {
            assert!((a.row(r).iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        assert!((a.get(1, 0) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn sigmoid_derivative_peaks_at_zero() {
        assert_eq!(Activation::Sigmoid.derivative(0.0), 0.25);
        assert_eq!(Activation::Relu.derivative(-1.0), 0.0);
    }

    #[test]
    fn names_parse_from_config() {
        let a: Activation = serde_yaml::from_str("relu").unwrap();
        assert_eq!(a, Activation::Relu);
    }
}
