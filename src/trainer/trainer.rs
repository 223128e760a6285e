use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ParamTree, TrainingSettings};
use crate::curriculum::CurriculumState;
use crate::data::DataLoader;
use crate::error::{Result, TrainerError};
use crate::model::{InferenceGuard, Mode, Model, BEST_FILE};
use crate::optim::{build_optimizer, clip_grad_value, Optimizer};
use crate::problem::{Batch, Problem};
use crate::registry::Registry;
use crate::stats::{CsvSink, StatFormat, StatisticsAggregator, StatisticsCollector, TensorboardWriter};
use crate::trainer::context::{RunContext, TensorboardLevel};
use crate::trainer::run_dir::RunDirectory;
use crate::trainer::terminal::{TerminalCondition, TerminalDecision};
use crate::trainer::validation::{aggregate, record_episode, ValidationRunner};
use crate::trainer::visual::{NoopVisualizer, Visualizer};

/// Where the loop is. `Converged`, `MaxEpochsStopped` and `EarlyStopped`
/// are only entered from `EvaluatingTermination`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainerState {
    Running,
    ValidatingEpoch,
    Checkpointing,
    EvaluatingTermination,
    Converged,
    MaxEpochsStopped,
    EarlyStopped,
}

/// Sent on the progress channel at the end of every completed epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochSummary {
    /// 0-based epoch index.
    pub epoch: usize,
    /// Global episode counter after this epoch.
    pub episode: usize,
    pub training_loss: f64,
    pub validation_loss: f64,
    /// Curriculum as the next epoch will see it.
    pub curriculum: CurriculumState,
    pub decision: TerminalDecision,
    /// Wall-clock duration of this epoch in milliseconds.
    pub elapsed_ms: u64,
}

/// Outcome of `Trainer::run`.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub decision: TerminalDecision,
    pub converged: bool,
    pub epochs: usize,
    pub episodes: usize,
    pub best_validation_loss: f64,
    pub final_validation_loss: f64,
    pub run_dir: PathBuf,
}

/// Optional collaborators of a run.
#[derive(Default)]
pub struct TrainerOptions {
    pub context: RunContext,
    /// Checkpoint to warm-start from. A load failure is logged, not fatal.
    pub checkpoint: Option<PathBuf>,
    pub progress_tx: Option<mpsc::Sender<EpochSummary>>,
    /// Used only at the phases `context.visualization` selects.
    pub visualizer: Option<Box<dyn Visualizer>>,
}

/// A collector/aggregator pair and the files they feed.
struct Statistics {
    collector: StatisticsCollector,
    aggregator: StatisticsAggregator,
    episodes_csv: CsvSink,
    events: Option<TensorboardWriter>,
}

impl Statistics {
    fn new(
        model: &dyn Model,
        problem: &dyn Problem,
        episodes_csv: CsvSink,
        events: Option<TensorboardWriter>,
    ) -> Statistics {
        let mut collector = StatisticsCollector::new();
        collector.register("episode", StatFormat::EPISODE);
        collector.register("epoch", StatFormat::Integer { width: 2 });
        collector.register("loss", StatFormat::DEFAULT_FLOAT);
        model.add_statistics(&mut collector);
        problem.add_statistics(&mut collector);

        let mut aggregator = StatisticsAggregator::new();
        aggregator.register_scalar("episode", StatFormat::EPISODE);
        aggregator.register_scalar("epoch", StatFormat::Integer { width: 2 });
        aggregator.register_reduced("loss", StatFormat::DEFAULT_FLOAT);
        problem.add_aggregators(&mut aggregator);

        Statistics { collector, aggregator, episodes_csv, events }
    }
}

/// Epoch-based training and validation loop.
pub struct Trainer {
    settings: TrainingSettings,
    context: RunContext,
    run_dir: RunDirectory,
    model: Box<dyn Model>,
    problem: Box<dyn Problem>,
    validation_problem: Box<dyn Problem>,
    optimizer: Box<dyn Optimizer>,
    loader: DataLoader,
    validation: ValidationRunner,
    training_stats: Statistics,
    training_aggregated_csv: CsvSink,
    validation_stats: Statistics,
    terminal: TerminalCondition,
    visualizer: Box<dyn Visualizer>,
    progress_tx: Option<mpsc::Sender<EpochSummary>>,
    partial_batch: Option<Batch>,
    curriculum: CurriculumState,
    state: TrainerState,
    episode: usize,
    best_loss: f64,
}

impl Trainer {
    /// Resolves the configuration, builds problems, model and optimizer, and
    /// opens the statistics files inside `run_dir`.
    pub fn build(params: &ParamTree, run_dir: RunDirectory, options: TrainerOptions, registry: &Registry) -> Result<Trainer> {
        let settings = TrainingSettings::from_params(params)?;
        // The configured seed wins over whatever the caller put in the context.
        let context = RunContext { seed: settings.seed, ..options.context };

        run_dir.write_configuration(params)?;
        info!("Training configuration:\n{}", params.to_yaml_string()?);

        let mut problem = registry.build_problem(&settings.problem_name, &params.section("training.problem"), &context)?;
        let validation_problem =
            registry.build_problem(&settings.validation_problem_name, &params.section("validation.problem"), &context)?;
        let defaults = problem.default_values();
        if validation_problem.default_values() != defaults {
            return Err(TrainerError::invalid_config(
                "validation.problem",
                format!(
                    "validation problem sizes {:?} differ from the training problem's {:?}",
                    validation_problem.default_values(),
                    defaults
                ),
            ));
        }
        problem.curriculum_learning_initialize(settings.curriculum.as_ref())?;
        // Phases starting at episode 0 already apply to the first epoch.
        problem.curriculum_learning_update_params(0);
        let curriculum = problem.curriculum_state();
        info!("Curriculum at episode 0: {:?} (finished: {})", curriculum.params, curriculum.finished);

        let mut model = registry.build_model(&settings.model_name, &params.section("model"), defaults, &context)?;
        if let Some(path) = &options.checkpoint {
            match model.load(path) {
                Ok(checkpoint) => info!(
                    "Imported {} parameters from checkpoint {} (epoch {}, validation loss {:?})",
                    model.name(),
                    path.display(),
                    checkpoint.epoch,
                    checkpoint.validation_loss
                ),
                Err(e) => error!("{}; training starts from the initial parameters", e),
            }
        }
        model.set_mode(Mode::Train);

        let optimizer = build_optimizer(&settings.optimizer)?;
        let loader = DataLoader::new(&settings.training_loader, settings.seed);
        let validation_loader = DataLoader::new(&settings.validation_loader, settings.seed);
        info!(
            "Training problem '{}': {} samples, {} episodes per epoch (batch size {})",
            problem.name(),
            problem.len(),
            problem.get_epoch_size(loader.batch_size()),
            loader.batch_size()
        );
        info!(
            "Validation problem '{}': {} samples, {} batches (batch size {})",
            validation_problem.name(),
            validation_problem.len(),
            validation_problem.get_epoch_size(validation_loader.batch_size()),
            validation_loader.batch_size()
        );

        let partial_batch = match settings.partial_validation_interval {
            Some(_) => validation_loader.first_batch(validation_problem.as_ref(), 0)?,
            None => None,
        };

        let (training_events, validation_events) = match context.tensorboard {
            Some(level) => {
                info!("Exporting to TensorBoard at level {:?} under {}", level, run_dir.path().display());
                (
                    Some(TensorboardWriter::create(run_dir.training_events_dir())?),
                    Some(TensorboardWriter::create(run_dir.validation_events_dir())?),
                )
            }
            None => (None, None),
        };
        let training_stats = Statistics::new(
            model.as_ref(),
            problem.as_ref(),
            CsvSink::open(run_dir.training_statistics())?,
            training_events,
        );
        let validation_stats = Statistics::new(
            model.as_ref(),
            validation_problem.as_ref(),
            CsvSink::open(run_dir.validation_statistics())?,
            validation_events,
        );
        let training_aggregated_csv = CsvSink::open(run_dir.training_aggregated_statistics())?;
        let validation = ValidationRunner::new(
            validation_loader,
            CsvSink::open(run_dir.validation_aggregated_statistics())?,
            settings.seed,
        );

        Ok(Trainer {
            terminal: TerminalCondition::from_settings(&settings),
            settings,
            context,
            run_dir,
            model,
            problem,
            validation_problem,
            optimizer,
            loader,
            validation,
            training_stats,
            training_aggregated_csv,
            validation_stats,
            visualizer: options.visualizer.unwrap_or_else(|| Box::new(NoopVisualizer)),
            progress_tx: options.progress_tx,
            partial_batch,
            curriculum,
            state: TrainerState::Running,
            episode: 0,
            best_loss: f64::INFINITY,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Global episode counter; never reset within a run.
    pub fn episode(&self) -> usize {
        self.episode
    }

    pub fn run_dir(&self) -> &RunDirectory {
        &self.run_dir
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    /// Curriculum snapshot taken at the last epoch boundary.
    pub fn curriculum(&self) -> &CurriculumState {
        &self.curriculum
    }

    /// Trains until a terminal condition holds, then validates once more.
    pub fn run(&mut self) -> Result<TrainingReport> {
        let mut epoch = 0;
        let decision = loop {
            self.state = TrainerState::Running;
            let started = Instant::now();

            self.training_stats.collector.empty();
            debug!("Emptied StatisticsCollector.");
            info!("Epoch {} started", epoch);
            self.problem.initialize_epoch(epoch);

            self.train_epoch(epoch)?;

            info!("Epoch {} finished", epoch);
            self.problem.finalize_epoch(epoch);

            let stats = &mut self.training_stats;
            aggregate(&stats.collector, &mut stats.aggregator, self.model.as_ref(), self.problem.as_ref(), self.episode, epoch)?;
            info!("{}", stats.aggregator.export_to_string(&format!("[Epoch {}]", epoch)));
            stats.aggregator.export_to_csv(&mut self.training_aggregated_csv)?;
            if let Some(events) = stats.events.as_mut() {
                events.export_aggregator(&stats.aggregator, self.episode);
            }
            let training_loss = stats.aggregator.get("loss_mean").unwrap_or(f64::NAN);
            stats.collector.empty();

            self.state = TrainerState::ValidatingEpoch;
            let validation_loss = self.validate(epoch, self.context.visualization.validation())?;

            self.state = TrainerState::Checkpointing;
            self.checkpoint(epoch, validation_loss)?;

            let curriculum_finished = self.problem.curriculum_learning_update_params(self.episode);
            self.curriculum = self.problem.curriculum_state();
            debug!("Curriculum after episode {}: {:?}", self.episode, self.curriculum.params);

            self.state = TrainerState::EvaluatingTermination;
            let decision = self.terminal.evaluate(epoch + 1, validation_loss, curriculum_finished);

            self.flush_events();
            self.send_progress(EpochSummary {
                epoch,
                episode: self.episode,
                training_loss,
                validation_loss,
                curriculum: self.curriculum.clone(),
                decision,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });

            epoch += 1;
            if decision.is_terminal() {
                break decision;
            }
        };

        self.state = match decision {
            TerminalDecision::ConvergedBelowThreshold => TrainerState::Converged,
            TerminalDecision::EarlyStopped => TrainerState::EarlyStopped,
            _ => TrainerState::MaxEpochsStopped,
        };
        info!("Learning finished: Met the following terminal condition: {}", decision);
        info!("Converged = {}", decision.converged());

        info!("Last validation on the entire validation set:");
        let final_validation_loss = self.validate(epoch, self.context.visualization.final_validation())?;
        self.flush_events();

        Ok(TrainingReport {
            decision,
            converged: decision.converged(),
            epochs: epoch,
            episodes: self.episode,
            best_validation_loss: self.best_loss,
            final_validation_loss,
            run_dir: self.run_dir.path().to_path_buf(),
        })
    }

    /// One pass over the training set; advances the global episode counter
    /// once per batch.
    fn train_epoch(&mut self, epoch: usize) -> Result<()> {
        let Trainer {
            settings,
            context,
            model,
            problem,
            validation_problem,
            optimizer,
            loader,
            training_stats,
            validation_stats,
            visualizer,
            partial_batch,
            episode,
            ..
        } = self;
        let problem: &dyn Problem = &**problem;
        // Set once the user stops visualizing; reset every epoch.
        let mut user_pressed_stop = false;

        loader.for_each_batch(problem, epoch, |batch| {
            model.zero_grad();
            model.set_mode(Mode::Train);

            let output = model.forward(&batch)?;
            record_episode(&mut training_stats.collector, problem, &batch, &output, *episode, epoch)?;

            model.backward()?;
            if let Some(clip) = settings.gradient_clipping {
                clip_grad_value(&mut model.parameters_mut(), clip);
            }
            optimizer.step(&mut model.parameters_mut())?;

            if context.should_log(*episode) {
                info!("{}", training_stats.collector.export_to_string(""));
            }
            training_stats.collector.export_to_csv(&mut training_stats.episodes_csv)?;
            if let (Some(level), Some(events)) = (context.tensorboard, training_stats.events.as_mut()) {
                if context.should_log(*episode) {
                    events.export_collector(&training_stats.collector, *episode);
                    if level >= TensorboardLevel::Parameters {
                        events.export_parameters(&model.parameters(), level >= TensorboardLevel::Gradients, *episode);
                    }
                }
            }

            if context.visualization.training() && !user_pressed_stop {
                user_pressed_stop = visualizer.show(&format!("Training episode {}", *episode), &batch, &output);
            }

            if let (Some(interval), Some(fixed)) = (settings.partial_validation_interval, partial_batch.as_ref()) {
                if *episode % interval == 0 {
                    partial_validation(&mut **model, &**validation_problem, fixed, validation_stats, *episode, epoch)?;
                }
            }

            *episode += 1;
            Ok(())
        })
    }

    fn validate(&mut self, epoch: usize, visualize: bool) -> Result<f64> {
        let visualizer: Option<&mut dyn Visualizer> = if visualize { Some(self.visualizer.as_mut()) } else { None };
        let outcome = self.validation.run(
            self.model.as_mut(),
            self.validation_problem.as_ref(),
            &mut self.validation_stats.collector,
            &mut self.validation_stats.aggregator,
            visualizer,
            self.episode,
            epoch,
        )?;
        if let Some(events) = self.validation_stats.events.as_mut() {
            events.export_aggregator(&self.validation_stats.aggregator, self.episode);
        }
        if outcome.user_requested_stop {
            debug!("Visualization stopped by the user during validation");
        }
        Ok(outcome.mean_loss)
    }

    /// Writes this epoch's checkpoint and replaces the best one on improvement.
    fn checkpoint(&mut self, epoch: usize, validation_loss: f64) -> Result<()> {
        let models = self.run_dir.models_dir();
        let checkpoint = self.model.save(
            &models,
            validation_loss,
            &self.validation_stats.aggregator.values(),
            epoch,
            self.episode,
        )?;
        if validation_loss < self.best_loss {
            self.best_loss = validation_loss;
            checkpoint.write_atomic(&models.join(BEST_FILE))?;
            info!("Model saved as best: validation loss {:.6}", validation_loss);
        } else {
            debug!("Validation loss {:.6} did not improve on {:.6}", validation_loss, self.best_loss);
        }
        Ok(())
    }

    fn flush_events(&mut self) {
        for stats in [&mut self.training_stats, &mut self.validation_stats] {
            if let Some(events) = stats.events.as_mut() {
                events.flush();
            }
        }
    }

    fn send_progress(&mut self, summary: EpochSummary) {
        if let Some(tx) = &self.progress_tx {
            if tx.send(summary).is_err() {
                warn!("Progress receiver dropped; no further epoch summaries will be sent");
                self.progress_tx = None;
            }
        }
    }
}

/// Validates on one fixed batch; the row goes to the log, to
/// `validation_statistics.csv` and to the validation event file.
fn partial_validation(
    model: &mut dyn Model,
    problem: &dyn Problem,
    batch: &Batch,
    stats: &mut Statistics,
    episode: usize,
    epoch: usize,
) -> Result<()> {
    let output = {
        let mut guard = InferenceGuard::new(model);
        guard.forward(batch)?
    };
    stats.collector.empty();
    record_episode(&mut stats.collector, problem, batch, &output, episode, epoch)?;
    info!("{}", stats.collector.export_to_string("[Partial Validation]"));
    stats.collector.export_to_csv(&mut stats.episodes_csv)?;
    if let Some(events) = stats.events.as_mut() {
        events.export_collector(&stats.collector, episode);
    }
    Ok(())
}
