use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::data::DataLoader;
use crate::error::Result;
use crate::model::{ForwardOutput, InferenceGuard, Model};
use crate::problem::{Batch, Problem};
use crate::stats::{CsvSink, StatisticsAggregator, StatisticsCollector};
use crate::trainer::visual::Visualizer;

/// Records one episode (training or validation) into `collector` and
/// commits it to the aggregation window.
pub(crate) fn record_episode(
    collector: &mut StatisticsCollector,
    problem: &dyn Problem,
    batch: &Batch,
    output: &ForwardOutput,
    episode: usize,
    epoch: usize,
) -> Result<()> {
    collector.set("episode", episode as f64)?;
    collector.set("epoch", epoch as f64)?;
    collector.set("loss", output.loss)?;
    problem.collect_statistics(collector, batch, &output.predictions)?;
    collector.commit_episode();
    Ok(())
}

/// Reduces the collector window into the aggregator and stamps it.
pub(crate) fn aggregate(
    collector: &StatisticsCollector,
    aggregator: &mut StatisticsAggregator,
    model: &dyn Model,
    problem: &dyn Problem,
    episode: usize,
    epoch: usize,
) -> Result<()> {
    aggregator.aggregate_from(collector.window());
    model.aggregate_statistics(collector, aggregator);
    problem.aggregate_statistics(collector, aggregator);
    aggregator.set("episode", episode as f64)?;
    aggregator.set("epoch", epoch as f64)
}

/// What one full validation pass produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationOutcome {
    /// `loss_mean` of the pass; NaN for an empty validation set.
    pub mean_loss: f64,
    /// The user asked the visualizer to stop.
    pub user_requested_stop: bool,
}

/// Runs a model over a whole validation set without touching its parameters.
pub struct ValidationRunner {
    loader: DataLoader,
    aggregated_csv: CsvSink,
    rng: StdRng,
}

impl ValidationRunner {
    pub fn new(loader: DataLoader, aggregated_csv: CsvSink, seed: u64) -> Self {
        ValidationRunner { loader, aggregated_csv, rng: StdRng::seed_from_u64(seed) }
    }

    /// One pass over the entire validation set.
    ///
    /// The model is held in evaluation mode for the whole pass and put back
    /// in its previous mode afterwards, also when a batch fails. Errors from
    /// the model are returned as is.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        model: &mut dyn Model,
        problem: &dyn Problem,
        collector: &mut StatisticsCollector,
        aggregator: &mut StatisticsAggregator,
        visualizer: Option<&mut dyn Visualizer>,
        episode: usize,
        epoch: usize,
    ) -> Result<ValidationOutcome> {
        info!("Validating over the entire validation set ({} samples)", problem.len());

        let num_batches = self.loader.num_batches(problem);
        let vis_index = if num_batches > 0 { Some(self.rng.gen_range(0..num_batches)) } else { None };

        collector.empty();
        let mut user_requested_stop = false;
        let mut visualizer = visualizer;
        {
            let mut guard = InferenceGuard::new(model);
            let mut index = 0;
            // Validation samples are always drawn as epoch 0: the set is fixed.
            self.loader.for_each_batch(problem, 0, |batch| {
                let output = guard.forward(&batch)?;
                record_episode(collector, problem, &batch, &output, index, epoch)?;
                if Some(index) == vis_index {
                    if let Some(vis) = visualizer.as_deref_mut() {
                        user_requested_stop = vis.show(&format!("Validation {}", epoch), &batch, &output);
                    }
                }
                index += 1;
                Ok(())
            })?;
        }

        aggregate(collector, aggregator, model, problem, episode, epoch)?;
        info!("{}", aggregator.export_to_string(&format!("[Validation {}]", epoch)));
        aggregator.export_to_csv(&mut self.aggregated_csv)?;

        Ok(ValidationOutcome {
            mean_loss: aggregator.get("loss_mean").unwrap_or(f64::NAN),
            user_requested_stop,
        })
    }
}
