use std::collections::{BTreeMap, HashMap};

use crate::error::{Result, TrainerError};
use crate::stats::collector::EpisodeSnapshot;
use crate::stats::csv_sink::CsvSink;
use crate::stats::format::StatFormat;

/// Suffixes produced for every reduced statistic, in column order.
pub const REDUCTIONS: [&str; 4] = ["mean", "min", "max", "std"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Reduced over a collector window into `<key>_mean`, `_min`, `_max`, `_std`.
    Reduced,
    /// Set directly (episode, epoch, ...).
    Scalar,
}

/// Epoch/run level summaries of per-episode statistics.
///
/// An empty window (an epoch without episodes) is not an error: every
/// reduced column is set to NaN and the CSV row is still written, so the
/// number of rows always equals the number of aggregation points.
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    entries: Vec<(String, Kind)>,
    formats: HashMap<String, StatFormat>,
    values: HashMap<String, f64>,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `key` as reduced from the collector window.
    pub fn register_reduced(&mut self, key: &str, format: StatFormat) {
        self.register(key, Kind::Reduced, format);
    }

    /// Declares `key` as a value set directly with `set`.
    pub fn register_scalar(&mut self, key: &str, format: StatFormat) {
        self.register(key, Kind::Scalar, format);
    }

    fn register(&mut self, key: &str, kind: Kind, format: StatFormat) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = kind,
            None => self.entries.push((key.to_string(), kind)),
        }
        self.formats.insert(key.to_string(), format);
    }

    /// Sets a scalar statistic.
    pub fn set(&mut self, key: &str, value: f64) -> Result<()> {
        match self.entries.iter().find(|(k, _)| k == key) {
            Some((_, Kind::Scalar)) => {
                self.values.insert(key.to_string(), value);
                Ok(())
            }
            _ => Err(TrainerError::UnknownMetric(key.to_string())),
        }
    }

    /// Value of a column, e.g. `get("loss_mean")` or `get("epoch")`.
    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied()
    }

    /// Recomputes every reduced statistic over `window`.
    ///
    /// Episodes that never set a key are skipped for that key only.
    pub fn aggregate_from(&mut self, window: &[EpisodeSnapshot]) {
        let reduced: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, kind)| *kind == Kind::Reduced)
            .map(|(key, _)| key.clone())
            .collect();

        for key in reduced {
            let summary = Summary::of(window.iter().filter_map(|s| s.get(&key).copied()));
            self.values.insert(format!("{}_mean", key), summary.mean);
            self.values.insert(format!("{}_min", key), summary.min);
            self.values.insert(format!("{}_max", key), summary.max);
            self.values.insert(format!("{}_std", key), summary.std);
        }
    }

    /// All columns in registration order, reduced keys expanded.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for (key, kind) in &self.entries {
            match kind {
                Kind::Scalar => columns.push(key.clone()),
                Kind::Reduced => columns.extend(REDUCTIONS.iter().map(|r| format!("{}_{}", key, r))),
            }
        }
        columns
    }

    /// Format of a column; reduced columns use the base key's format.
    fn column_format(&self, column: &str) -> StatFormat {
        if let Some(fmt) = self.formats.get(column) {
            return *fmt;
        }
        column
            .rsplit_once('_')
            .and_then(|(base, _)| self.formats.get(base))
            .copied()
            .unwrap_or_default()
    }

    /// Snapshot of every value that has been computed or set.
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.values.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    pub fn export_to_string(&self, prefix: &str) -> String {
        let body = self
            .columns()
            .into_iter()
            .filter_map(|col| {
                let value = self.values.get(&col)?;
                Some(format!("{} {}", col, self.column_format(&col).render(*value)))
            })
            .collect::<Vec<_>>()
            .join("; ");
        if prefix.is_empty() {
            body
        } else {
            format!("{} {}", prefix, body)
        }
    }

    pub fn export_to_csv(&self, sink: &mut CsvSink) -> Result<()> {
        let columns = self.columns();
        let row: Vec<String> = columns
            .iter()
            .map(|col| {
                self.values
                    .get(col)
                    .map(|v| self.column_format(col).render(*v))
                    .unwrap_or_default()
            })
            .collect();
        sink.append(&columns, row)
    }
}

/// Single-pass reduction of one statistic.
struct Summary {
    mean: f64,
    min: f64,
    max: f64,
    std: f64,
}

impl Summary {
    /// Welford's update keeps the mean exact under constant input.
    fn of(values: impl Iterator<Item = f64>) -> Summary {
        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for x in values {
            count += 1;
            let delta = x - mean;
            mean += delta / count as f64;
            m2 += delta * (x - mean);
            min = min.min(x);
            max = max.max(x);
        }

        match count {
            0 => Summary { mean: f64::NAN, min: f64::NAN, max: f64::NAN, std: f64::NAN },
            1 => Summary { mean, min, max, std: 0.0 },
            n => Summary { mean, min, max, std: (m2 / (n - 1) as f64).sqrt() },
        }
    }
}
