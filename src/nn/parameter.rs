use serde::{Deserialize, Serialize};

use crate::math::Matrix;

/// A trainable tensor and its accumulated gradient.
///
/// Only `name` and `value` are persisted; gradients start at zero after a load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Matrix,
    #[serde(skip)]
    pub grad: Matrix,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Matrix) -> Parameter {
        let grad = Matrix::zeros(value.rows, value.cols);
        Parameter { name: name.into(), value, grad }
    }

    pub fn zero_grad(&mut self) {
        if self.grad.rows != self.value.rows || self.grad.cols != self.value.cols {
            self.grad = Matrix::zeros(self.value.rows, self.value.cols);
        } else {
            self.grad.fill(0.0);
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.value.rows, self.value.cols)
    }
}
