use rand::Rng;

use crate::error::{Result, TrainerError};
use crate::math::Matrix;
use crate::nn::activation::Activation;
use crate::nn::parameter::Parameter;

/// Values from the last training forward pass, needed by `backward`.
#[derive(Debug, Clone)]
struct ForwardCache {
    input: Matrix,
    // pre-activation values (z = xW + b) needed for the correct derivative
    pre_activation: Matrix,
}

#[derive(Debug, Clone)]
pub struct Dense {
    pub weights: Parameter,
    pub biases: Parameter,
    pub activation: Activation,
    cache: Option<ForwardCache>,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(index: usize, input_size: usize, size: usize, activation: Activation, rng: &mut R) -> Dense {
        Dense {
            weights: Parameter::new(format!("layer{}.weights", index), Matrix::xavier(input_size, size, rng)),
            biases: Parameter::new(format!("layer{}.biases", index), Matrix::zeros(1, size)),
            activation,
            cache: None,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.value.rows
    }

    pub fn size(&self) -> usize {
        self.weights.value.cols
    }

    /// Forward pass over a batch. With `keep` set, the inputs and
    /// pre-activations are stored for the next `backward`.
    pub fn forward(&mut self, input: &Matrix, keep: bool) -> Matrix {
        let z = input.matmul(&self.weights.value).add_row(&self.biases.value);
        let a = self.activation.apply(&z);
        self.cache = if keep { Some(ForwardCache { input: input.clone(), pre_activation: z }) } else { None };
        a
    }

    /// Accumulates gradients from `delta` (dL/da for this layer's output)
    /// and returns dL/da for the layer below.
    pub fn backward(&mut self, delta: &Matrix) -> Result<Matrix> {
        let cache = self
            .cache
            .take()
            .ok_or_else(|| TrainerError::Computation(format!("{}: backward without a cached forward pass", self.weights.name)))?;

        let act_derivative = cache.pre_activation.map(|x| self.activation.derivative(x));
        // Hadamard product: delta = error * f'(z)
        let layer_delta = delta.zip_map(&act_derivative, |e, d| e * d);

        self.weights.grad.add_scaled(&cache.input.transpose().matmul(&layer_delta), 1.0);
        self.biases.grad.add_scaled(&layer_delta.sum_rows(), 1.0);

        Ok(layer_delta.matmul(&self.weights.value.transpose()))
    }

    pub fn parameters(&self) -> [&Parameter; 2] {
        [&self.weights, &self.biases]
    }

    pub fn parameters_mut(&mut self) -> [&mut Parameter; 2] {
        [&mut self.weights, &mut self.biases]
    }
}
