pub mod config;
pub mod curriculum;
pub mod data;
pub mod error;
pub mod logging;
pub mod math;
pub mod model;
pub mod nn;
pub mod optim;
pub mod problem;
pub mod registry;
pub mod stats;
pub mod trainer;

// Convenience re-exports
pub use config::{ParamTree, TrainingSettings};
pub use curriculum::{CurriculumConfig, CurriculumController};
pub use error::{Result, TrainerError};
pub use math::Matrix;
pub use model::{Checkpoint, Mode, Model};
pub use problem::{Batch, Problem, ProblemDefaults};
pub use registry::Registry;
pub use stats::{StatisticsAggregator, StatisticsCollector};
pub use trainer::{RunContext, RunDirectory, TerminalDecision, Trainer, TrainerOptions, TrainingReport, ValidationRunner};
