pub mod aggregator;
pub mod collector;
pub mod csv_sink;
pub mod format;
pub mod tensorboard;

pub use aggregator::StatisticsAggregator;
pub use collector::{EpisodeSnapshot, StatisticsCollector};
pub use csv_sink::CsvSink;
pub use format::StatFormat;
pub use tensorboard::TensorboardWriter;
