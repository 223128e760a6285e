pub mod params;
pub mod settings;

pub use params::ParamTree;
pub use settings::{DataLoaderSettings, EarlyStopSettings, OptimizerSettings, TrainingSettings};
