//! TensorBoard event files for collected and aggregated statistics.
//!
//! One writer per event directory; the trainer keeps a training and a
//! validation writer side by side so both curves share the same tags.

use std::fs;
use std::path::{Path, PathBuf};

use tensorboard_rs::summary_writer::SummaryWriter;

use crate::error::Result;
use crate::nn::Parameter;
use crate::stats::{StatisticsAggregator, StatisticsCollector};

/// The step is passed separately, so it is not exported as a scalar.
const STEP_KEY: &str = "episode";

pub struct TensorboardWriter {
    writer: SummaryWriter,
    dir: PathBuf,
}

impl TensorboardWriter {
    /// Creates `dir` if needed and opens a new event file inside it.
    pub fn create(dir: impl AsRef<Path>) -> Result<TensorboardWriter> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let writer = SummaryWriter::new(&dir);
        Ok(TensorboardWriter { writer, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current collector values as scalars at `step`.
    pub fn export_collector(&mut self, collector: &StatisticsCollector, step: usize) {
        for key in collector.keys() {
            if key == STEP_KEY {
                continue;
            }
            if let Some(value) = collector.get(key).filter(|v| v.is_finite()) {
                self.writer.add_scalar(key, value as f32, step);
            }
        }
    }

    /// Every aggregated column as a scalar at `step`. NaN reductions of an
    /// empty window are skipped.
    pub fn export_aggregator(&mut self, aggregator: &StatisticsAggregator, step: usize) {
        for (column, value) in aggregator.values() {
            if column == STEP_KEY || !value.is_finite() {
                continue;
            }
            self.writer.add_scalar(&column, value as f32, step);
        }
    }

    /// Histograms of parameter values, and of their gradients under
    /// `<name>/grad` when `gradients` is set.
    pub fn export_parameters(&mut self, parameters: &[&Parameter], gradients: bool, step: usize) {
        for param in parameters {
            self.add_histogram(&param.name, param.value.as_slice(), step);
            if gradients {
                self.add_histogram(&format!("{}/grad", param.name), param.grad.as_slice(), step);
            }
        }
    }

    pub fn add_histogram(&mut self, tag: &str, values: &[f64], step: usize) {
        if let Some(h) = Histogram::doane(values) {
            self.writer.add_histogram_raw(
                tag,
                h.min,
                h.max,
                h.num,
                h.sum,
                h.sum_squares,
                &h.bucket_limits,
                &h.bucket_counts,
                step,
            );
        }
    }

    pub fn flush(&mut self) {
        self.writer.flush();
    }
}

/// Summary of a set of values in the shape TensorBoard's histogram expects.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Histogram {
    pub min: f64,
    pub max: f64,
    pub num: f64,
    pub sum: f64,
    pub sum_squares: f64,
    /// Right edge of every bucket, ascending; the last one is `max`.
    pub bucket_limits: Vec<f64>,
    pub bucket_counts: Vec<f64>,
}

impl Histogram {
    /// Bins the finite values with Doane's rule. `None` when there are none.
    pub fn doane(values: &[f64]) -> Option<Histogram> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let n = finite.len() as f64;
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = finite.iter().sum();
        let sum_squares: f64 = finite.iter().map(|v| v * v).sum();

        let bins = if finite.len() < 3 || max == min { 1 } else { doane_bins(&finite) };
        let width = (max - min) / bins as f64;
        let mut bucket_limits: Vec<f64> = (1..=bins).map(|i| min + width * i as f64).collect();
        if let Some(last) = bucket_limits.last_mut() {
            *last = max;
        }
        let mut bucket_counts = vec![0.0; bins];
        for v in &finite {
            let index = if width > 0.0 { ((v - min) / width) as usize } else { 0 };
            bucket_counts[index.min(bins - 1)] += 1.0;
        }

        Some(Histogram { min, max, num: n, sum, sum_squares, bucket_limits, bucket_counts })
    }
}

/// 1 + log2(n) + log2(1 + |g1| / sigma_g1), g1 being the sample skewness.
fn doane_bins(values: &[f64]) -> usize {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
    let g1 = if m2 > 0.0 { m3 / m2.powf(1.5) } else { 0.0 };
    let sigma_g1 = (6.0 * (n - 2.0) / ((n + 1.0) * (n + 3.0))).sqrt();
    let k = 1.0 + n.log2() + (1.0 + g1.abs() / sigma_g1).log2();
    (k.ceil() as usize).max(1)
}
