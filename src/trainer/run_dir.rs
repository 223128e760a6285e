use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::config::ParamTree;
use crate::error::{Result, TrainerError};

pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `outdir/<problem>/<model>/<timestamp[_tag]>/` and the files inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    /// Creates a fresh run directory, never reusing an existing one.
    pub fn create(outdir: &Path, problem: &str, model: &str, tag: Option<&str>) -> Result<RunDirectory> {
        Self::create_with_clock(outdir, problem, model, tag, Local::now, RETRY_DELAY)
    }

    /// As `create`, with the time source and retry delay supplied.
    ///
    /// The leaf is created with `create_dir`, which fails if it exists; on a
    /// collision the timestamp is taken again after `delay`.
    pub fn create_with_clock<C>(
        outdir: &Path,
        problem: &str,
        model: &str,
        tag: Option<&str>,
        clock: C,
        delay: Duration,
    ) -> Result<RunDirectory>
    where
        C: Fn() -> DateTime<Local>,
    {
        let parent = outdir.join(problem).join(model);
        fs::create_dir_all(&parent)?;

        let root = loop {
            let mut name = clock().format(TIMESTAMP_FORMAT).to_string();
            if let Some(tag) = tag.filter(|t| !t.is_empty()) {
                name.push('_');
                name.push_str(tag);
            }
            let candidate = parent.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!("{}, retrying in {:?}", TrainerError::DirectoryCollision(candidate), delay);
                    thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let dir = RunDirectory { root };
        fs::create_dir(dir.models_dir())?;
        info!("Run directory: {}", dir.root.display());
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("trainer.log")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn training_statistics(&self) -> PathBuf {
        self.root.join("training_statistics.csv")
    }

    pub fn training_aggregated_statistics(&self) -> PathBuf {
        self.root.join("training_aggregated_statistics.csv")
    }

    pub fn validation_statistics(&self) -> PathBuf {
        self.root.join("validation_statistics.csv")
    }

    pub fn validation_aggregated_statistics(&self) -> PathBuf {
        self.root.join("validation_aggregated_statistics.csv")
    }

    /// TensorBoard event directory of the training writer.
    pub fn training_events_dir(&self) -> PathBuf {
        self.root.join("training")
    }

    pub fn validation_events_dir(&self) -> PathBuf {
        self.root.join("validation")
    }

    pub fn configuration_file(&self) -> PathBuf {
        self.root.join("training_configuration.yaml")
    }

    /// Dumps the merged configuration used for this run.
    pub fn write_configuration(&self, params: &ParamTree) -> Result<()> {
        fs::write(self.configuration_file(), params.to_yaml_string()?)?;
        Ok(())
    }
}
