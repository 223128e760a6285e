use std::collections::HashMap;

use crate::error::{Result, TrainerError};
use crate::stats::csv_sink::CsvSink;
use crate::stats::format::StatFormat;

/// Values recorded for one episode, keyed by statistic name.
pub type EpisodeSnapshot = HashMap<String, f64>;

/// Per-episode statistics.
///
/// Statistics are declared once with `register` (by the trainer, the model
/// and the problem) and then overwritten every episode with `set`.
/// `commit_episode` copies the current values into the window that the
/// aggregators reduce at the end of an epoch; `empty` clears both the
/// current values and the window but keeps the registrations.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    keys: Vec<String>,
    formats: HashMap<String, StatFormat>,
    current: EpisodeSnapshot,
    window: Vec<EpisodeSnapshot>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a statistic. Registering an existing key only updates its format.
    pub fn register(&mut self, key: &str, format: StatFormat) {
        if !self.formats.contains_key(key) {
            self.keys.push(key.to_string());
        }
        self.formats.insert(key.to_string(), format);
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.formats.contains_key(key)
    }

    /// Overwrites the current episode's value for `key`.
    pub fn set(&mut self, key: &str, value: f64) -> Result<()> {
        if !self.formats.contains_key(key) {
            return Err(TrainerError::UnknownMetric(key.to_string()));
        }
        self.current.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.current.get(key).copied()
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn format_of(&self, key: &str) -> Option<StatFormat> {
        self.formats.get(key).copied()
    }

    /// Snapshots the current values into the aggregation window.
    pub fn commit_episode(&mut self) {
        self.window.push(self.current.clone());
    }

    /// Episodes committed since the last `empty`.
    pub fn window(&self) -> &[EpisodeSnapshot] {
        &self.window
    }

    pub fn empty(&mut self) {
        self.current.clear();
        self.window.clear();
    }

    /// `prefix key value; key value; ...` over the keys set since the last `empty`.
    pub fn export_to_string(&self, prefix: &str) -> String {
        let body = self
            .keys
            .iter()
            .filter_map(|key| {
                let value = self.current.get(key)?;
                Some(format!("{} {}", key, self.formats[key].render(*value)))
            })
            .collect::<Vec<_>>()
            .join("; ");
        if prefix.is_empty() {
            body
        } else {
            format!("{} {}", prefix, body)
        }
    }

    /// Appends the current values as one CSV row. Unset keys are empty cells.
    pub fn export_to_csv(&self, sink: &mut CsvSink) -> Result<()> {
        let row: Vec<String> = self
            .keys
            .iter()
            .map(|key| {
                self.current
                    .get(key)
                    .map(|v| self.formats[key].render(*v))
                    .unwrap_or_default()
            })
            .collect();
        sink.append(&self.keys, row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> StatisticsCollector {
        let mut col = StatisticsCollector::new();
        col.register("episode", StatFormat::EPISODE);
        col.register("loss", StatFormat::Float { precision: 4 });
        col
    }

    #[test]
    fn set_requires_registration() {
        let mut col = collector();
        assert!(col.set("loss", 0.5).is_ok());
        match col.set("accuracy", 1.0) {
            Err(TrainerError::UnknownMetric(key)) => assert_eq!(key, "accuracy"),
            other => panic!("expected UnknownMetric, got {:?}", other),
        }
    }

    #[test]
    fn register_is_idempotent() {
        let mut col = collector();
        col.register("loss", StatFormat::Float { precision: 2 });
        assert_eq!(col.keys(), &["episode".to_string(), "loss".to_string()]);
        assert_eq!(col.format_of("loss"), Some(StatFormat::Float { precision: 2 }));
    }

    #[test]
    fn export_to_string_uses_formats() {
        let mut col = collector();
        col.set("episode", 3.0).unwrap();
        col.set("loss", 0.25).unwrap();
        assert_eq!(col.export_to_string("[Train]"), "[Train] episode 000003; loss 0.2500");
    }

    #[test]
    fn empty_drops_values_but_keeps_keys() {
        let mut col = collector();
        col.set("episode", 1.0).unwrap();
        col.set("loss", 0.1).unwrap();
        col.commit_episode();
        col.empty();

        assert!(col.window().is_empty());
        assert_eq!(col.export_to_string(""), "");

        col.set("loss", 0.2).unwrap();
        assert_eq!(col.export_to_string(""), "loss 0.2000");
        assert!(col.is_registered("episode"));
    }

    #[test]
    fn commit_snapshots_the_current_episode() {
        let mut col = collector();
        for (ep, loss) in [(0.0, 0.9), (1.0, 0.7)] {
            col.set("episode", ep).unwrap();
            col.set("loss", loss).unwrap();
            col.commit_episode();
        }
        let losses: Vec<f64> = col.window().iter().map(|s| s["loss"]).collect();
        assert_eq!(losses, vec![0.9, 0.7]);
    }

    #[test]
    fn csv_rows_leave_unset_cells_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::open(dir.path().join("training_statistics.csv")).unwrap();
        let mut col = collector();
        col.set("episode", 0.0).unwrap();
        col.set("loss", 1.5).unwrap();
        col.export_to_csv(&mut sink).unwrap();
        col.empty();
        col.set("episode", 1.0).unwrap();
        col.export_to_csv(&mut sink).unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text, "episode,loss\n000000,1.5000\n000001,\n");
    }
}
