use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};

pub const BEST_FILE: &str = "model_best.json";

/// File name of the checkpoint written at the end of `epoch`.
pub fn epoch_file(epoch: usize) -> String {
    format!("model_epoch_{:04}.json", epoch)
}

/// A model snapshot plus the validation results it was saved with.
///
/// Non-finite statistics (an empty validation window) are stored as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub model: String,
    pub epoch: usize,
    pub episode: usize,
    pub validation_loss: Option<f64>,
    pub statistics: BTreeMap<String, Option<f64>>,
    pub created_at: DateTime<Local>,
    pub parameters: serde_json::Value,
}

impl Checkpoint {
    pub fn new(
        model: &str,
        epoch: usize,
        episode: usize,
        validation_loss: f64,
        statistics: &BTreeMap<String, f64>,
        parameters: serde_json::Value,
    ) -> Checkpoint {
        Checkpoint {
            model: model.to_string(),
            epoch,
            episode,
            validation_loss: finite(validation_loss),
            statistics: statistics.iter().map(|(k, v)| (k.clone(), finite(*v))).collect(),
            created_at: Local::now(),
            parameters,
        }
    }

    /// Serializes the checkpoint to a pretty-printed JSON file and syncs it
    /// to disk. A short write is an error, not a truncated file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Writes to a sibling temp file, then renames it over `path`, so readers
    /// never observe a half-written checkpoint.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        self.write(&tmp)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Reads a checkpoint; every failure is reported as `CheckpointLoad`.
    pub fn read(path: &Path) -> Result<Checkpoint> {
        let load_err = |reason: String| TrainerError::CheckpointLoad { path: path.to_path_buf(), reason };
        let file = File::open(path).map_err(|e| load_err(e.to_string()))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| load_err(e.to_string()))
    }
}

fn finite(v: f64) -> Option<f64> {
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

/// Paths of the checkpoints present in a models directory, sorted by name.
pub fn list_checkpoints(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();
    Ok(paths)
}
