use serde::{Deserialize, Serialize};

use crate::math::Matrix;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

/// Selects the loss the model reports and differentiates.
///
/// - `Mse`          - mean-squared error; pair with identity or sigmoid output.
/// - `Bce`          - binary cross-entropy; pair with sigmoid output.
/// - `CrossEntropy` - categorical cross-entropy; requires a softmax output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    Mse,
    Bce,
    CrossEntropy,
}

impl LossKind {
    /// Mean per-sample loss over the batch.
    pub fn loss(&self, predicted: &Matrix, expected: &Matrix) -> f64 {
        if predicted.rows == 0 {
            return 0.0;
        }
        let total: f64 = (0..predicted.rows)
            .map(|r| self.sample_loss(predicted.row(r), expected.row(r)))
            .sum();
        total / predicted.rows as f64
    }

    fn sample_loss(&self, predicted: &[f64], expected: &[f64]) -> f64 {
        let n = predicted.len().max(1) as f64;
        match self {
            LossKind::Mse => predicted.iter().zip(expected).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / n,
            LossKind::Bce => {
                predicted
                    .iter()
                    .zip(expected)
                    .map(|(p, y)| -(y * (p + EPS).ln() + (1.0 - y) * (1.0 - p + EPS).ln()))
                    .sum::<f64>()
                    / n
            }
            LossKind::CrossEntropy => predicted.iter().zip(expected).map(|(p, e)| -e * (p + EPS).ln()).sum(),
        }
    }

    /// Per-output gradient of the per-sample loss, one row per sample.
    ///
    /// For `CrossEntropy` this is the combined softmax + cross-entropy
    /// gradient with respect to the logits: `predicted - expected`.
    pub fn delta(&self, predicted: &Matrix, expected: &Matrix) -> Matrix {
        match self {
            LossKind::Mse | LossKind::CrossEntropy => predicted.zip_map(expected, |p, e| p - e),
            LossKind::Bce => predicted.zip_map(expected, |p, y| (p - y) / ((p + EPS) * (1.0 - p + EPS))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mse_averages_over_outputs_and_rows() {
        let p = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 0.0]]);
        let e = Matrix::from_rows(&[vec![0.0, 0.0], vec![0.0, 0.0]]);
        assert_eq!(LossKind::Mse.loss(&p, &e), 0.25);
    }

    #[test]
    fn cross_entropy_of_perfect_prediction_is_near_zero() {
        let p = Matrix::from_rows(&[vec![1.0, 0.0]]);
        assert!(LossKind::CrossEntropy.loss(&p, &p) < 1e-9);
        assert_eq!(LossKind::CrossEntropy.delta(&p, &p).as_slice(), &[0.0, 0.0]);
    }
}
