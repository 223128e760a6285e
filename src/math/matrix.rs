use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Dense row-major matrix of `f64`.
///
/// Rows are batch samples and columns are features everywhere in the crate,
/// so a batch of `n` inputs of width `d` is an `n x d` matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Builds a matrix from equally sized rows. An empty slice gives a 0x0 matrix.
    ///
    /// # Panics
    /// Panics if the rows do not all have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Matrix {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            assert_eq!(row.len(), cols, "all rows must have the same length");
            data.extend_from_slice(row);
        }
        Matrix { rows: rows.len(), cols, data }
    }

    /// Xavier (Glorot) initialization: samples from N(0, sqrt(1 / rows)).
    ///
    /// `rows` is the fan-in: weight matrices are stored `input x output`.
    pub fn xavier<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        let std_dev = (1.0 / rows.max(1) as f64).sqrt();
        let data = (0..rows * cols)
            .map(|_| sample_standard_normal(rng) * std_dev)
            .collect();
        Matrix { rows, cols, data }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.rows).map(|r| self.row(r).to_vec()).collect()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                res.set(j, i, self.get(i, j));
            }
        }
        res
    }

    /// Matrix product `self * rhs`.
    ///
    /// # Panics
    /// Panics if the inner dimensions differ.
    pub fn matmul(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.cols, rhs.rows, "matmul: {}x{} * {}x{}", self.rows, self.cols, rhs.rows, rhs.cols);
        let mut res = Matrix::zeros(self.rows, rhs.cols);
        for i in 0..self.rows {
            for k in 0..self.cols {
                let a = self.get(i, k);
                if a == 0.0 {
                    continue;
                }
                let rhs_row = rhs.row(k);
                let out = &mut res.data[i * rhs.cols..(i + 1) * rhs.cols];
                for (o, b) in out.iter_mut().zip(rhs_row) {
                    *o += a * b;
                }
            }
        }
        res
    }

    /// Adds a `1 x cols` row vector to every row.
    pub fn add_row(&self, bias: &Matrix) -> Matrix {
        assert_eq!(bias.rows, 1);
        assert_eq!(bias.cols, self.cols);
        let mut res = self.clone();
        for r in 0..res.rows {
            for (x, b) in res.data[r * self.cols..(r + 1) * self.cols].iter_mut().zip(bias.as_slice()) {
                *x += b;
            }
        }
        res
    }

    /// Column sums as a `1 x cols` matrix.
    pub fn sum_rows(&self) -> Matrix {
        let mut res = Matrix::zeros(1, self.cols);
        for r in 0..self.rows {
            for (acc, x) in res.data.iter_mut().zip(self.row(r)) {
                *acc += x;
            }
        }
        res
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Element-wise combination of two same-shape matrices.
    pub fn zip_map<F>(&self, other: &Matrix, functor: F) -> Matrix
    where
        F: Fn(f64, f64) -> f64,
    {
        assert_eq!((self.rows, self.cols), (other.rows, other.cols), "shape mismatch");
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&other.data).map(|(&a, &b)| functor(a, b)).collect(),
        }
    }

    /// In-place `self += other * scale`.
    pub fn add_scaled(&mut self, other: &Matrix, scale: f64) {
        assert_eq!((self.rows, self.cols), (other.rows, other.cols), "shape mismatch");
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b * scale;
        }
    }

    /// Clamps every element into `[min, max]`.
    pub fn clamp_in_place(&mut self, min: f64, max: f64) {
        for x in &mut self.data {
            *x = x.clamp(min, max);
        }
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}

/// Samples a single value from N(0, 1) using the Box-Muller transform.
fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // Both uniforms in (0, 1] to avoid log(0).
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = 1.0 - rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
