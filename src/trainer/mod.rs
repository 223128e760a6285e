pub mod context;
pub mod run_dir;
pub mod terminal;
#[allow(clippy::module_inception)]
pub mod trainer;
pub mod validation;
pub mod visual;

pub use context::{RunContext, TensorboardLevel, VisualizationMode};
pub use run_dir::RunDirectory;
pub use terminal::{EarlyStopping, TerminalCondition, TerminalDecision};
pub use trainer::{EpochSummary, Trainer, TrainerOptions, TrainerState, TrainingReport};
pub use validation::{ValidationOutcome, ValidationRunner};
pub use visual::{ConsoleVisualizer, NoopVisualizer, Visualizer};
