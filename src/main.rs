//! `memtrain` - trains a model on a problem as described by YAML configuration files.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use memtrain::config::settings::{MODEL_NAME, TRAINING_PROBLEM_NAME};
use memtrain::logging::{console_subscriber, init_logging};
use memtrain::trainer::{ConsoleVisualizer, TensorboardLevel, VisualizationMode, Visualizer};
use memtrain::{
    ParamTree, Registry, Result, RunContext, RunDirectory, Trainer, TrainerError, TrainerOptions, TrainingReport,
};

#[derive(Parser, Debug)]
#[command(name = "memtrain", version, about = "Epoch-based trainer for memory-augmented models")]
struct Args {
    /// Configuration files, comma separated; the first one listed wins on conflicts
    #[arg(short, long, value_delimiter = ',', required = true)]
    config: Vec<PathBuf>,

    /// Root of the experiment directories
    #[arg(short, long, default_value = "./experiments")]
    outdir: PathBuf,

    /// Checkpoint to warm-start the model from
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Appended to the run directory name
    #[arg(short, long)]
    savetag: Option<String>,

    /// Log the training statistics every this many episodes
    #[arg(long, default_value_t = 100)]
    logging_interval: usize,

    /// 0: training episodes, 1: training and validation, 2: validation, 3: final validation only
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=3))]
    visualize: Option<u8>,

    /// 0: statistics, 1: plus parameter histograms, 2: plus gradient histograms
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2))]
    tensorboard: Option<u8>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let setup = tracing::subscriber::with_default(console_subscriber(), || prepare(&args));
    let (params, run_dir, options) = match setup {
        Ok(setup) => setup,
        Err(e) => return tracing::subscriber::with_default(console_subscriber(), || failure(&e)),
    };

    let _guard = init_logging(Some(&run_dir.log_file()));
    info!("Loaded configuration from {:?}", args.config);

    match train(&params, run_dir, options) {
        Ok(report) => {
            info!(
                "Finished after {} epochs and {} episodes (best validation loss {:.6})",
                report.epochs, report.episodes, report.best_validation_loss
            );
            ExitCode::SUCCESS
        }
        Err(e) => failure(&e),
    }
}

/// Exit status for a failed run: 2 for configuration and policy errors,
/// 1 for anything that went wrong while training.
fn exit_status(e: &TrainerError) -> u8 {
    if e.is_fatal() {
        2
    } else {
        1
    }
}

fn failure(e: &TrainerError) -> ExitCode {
    if e.is_fatal() {
        error!("Aborting: {}", e);
    } else {
        error!("Training failed: {}", e);
    }
    ExitCode::from(exit_status(e))
}

/// Everything that happens before the run directory, and so the log file, exists.
fn prepare(args: &Args) -> Result<(ParamTree, RunDirectory, TrainerOptions)> {
    let params = ParamTree::from_yaml_files(&args.config[..])?;
    let problem = params.require_str(TRAINING_PROBLEM_NAME)?;
    let model = params.require_str(MODEL_NAME)?;

    let visualization = VisualizationMode::from_level(args.visualize)?;
    let tensorboard = TensorboardLevel::from_level(args.tensorboard)?;
    let visualizer: Option<Box<dyn Visualizer>> = match visualization {
        VisualizationMode::Off => None,
        _ => Some(Box::new(ConsoleVisualizer::new(true))),
    };

    let run_dir = RunDirectory::create(&args.outdir, problem, model, args.savetag.as_deref())?;
    let options = TrainerOptions {
        context: RunContext {
            visualization,
            logging_interval: args.logging_interval,
            tensorboard,
            ..RunContext::default()
        },
        checkpoint: args.model.clone(),
        progress_tx: None,
        visualizer,
    };
    Ok((params, run_dir, options))
}

fn train(params: &ParamTree, run_dir: RunDirectory, options: TrainerOptions) -> Result<TrainingReport> {
    let registry = Registry::with_builtins();
    let mut trainer = Trainer::build(params, run_dir, options, &registry)?;
    trainer.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_exit_with_two() {
        assert_eq!(exit_status(&TrainerError::MissingConfigKey("model.name".into())), 2);
        assert_eq!(exit_status(&TrainerError::PolicyViolation("both control bits".into())), 2);
        assert_eq!(exit_status(&TrainerError::Computation("nan loss".into())), 1);
    }

    #[test]
    fn cli_accepts_comma_separated_configs() {
        let args = Args::try_parse_from(["memtrain", "--config", "a.yaml,b.yaml", "--tensorboard", "1"]).unwrap();
        assert_eq!(args.config, vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")]);
        assert_eq!(args.tensorboard, Some(1));
        assert!(Args::try_parse_from(["memtrain", "--config", "a.yaml", "--tensorboard", "3"]).is_err());
    }
}
