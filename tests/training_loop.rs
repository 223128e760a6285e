use std::fs;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use rand::rngs::StdRng;

use memtrain::curriculum::{CurriculumConfig, CurriculumController, CurriculumParams, CurriculumState};
use memtrain::model::checkpoint::list_checkpoints;
use memtrain::model::BEST_FILE;
use memtrain::problem::Sample;
use memtrain::trainer::{TensorboardLevel, TrainerState};
use memtrain::{
    Checkpoint, Model, ParamTree, Problem, ProblemDefaults, Registry, Result, RunContext, RunDirectory, TerminalDecision,
    Trainer, TrainerError, TrainerOptions, TrainingReport,
};

const XOR: &str = r#"
training:
  problem: { name: toy_classification, kind: xor, size: 8 }
  dataloader: { batch_size: 4 }
  optimizer: { name: sgd, lr: 0.5 }
  terminal_condition: { max_epochs: 3 }
  seed: 7
validation:
  problem: { name: toy_classification, kind: xor, size: 4 }
  dataloader: { batch_size: 2, shuffle: false }
model: { name: mlp, hidden_sizes: [4] }
"#;

/// XOR run configuration with `overrides` taking precedence.
fn params(overrides: &str) -> ParamTree {
    let mut params = ParamTree::from_yaml_str(overrides).unwrap();
    params.add_defaults(&ParamTree::from_yaml_str(XOR).unwrap());
    params
}

fn build(outdir: &Path, params: &ParamTree, options: TrainerOptions) -> Result<Trainer> {
    let run_dir = RunDirectory::create(outdir, "toy_classification", "mlp", None)?;
    Trainer::build(params, run_dir, options, &Registry::with_builtins())
}

fn run(outdir: &Path, params: &ParamTree) -> TrainingReport {
    build(outdir, params, TrainerOptions::default()).unwrap().run().unwrap()
}

fn lines(path: &Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn runs_until_max_epochs_and_writes_every_artifact() {
    let outdir = tempfile::tempdir().unwrap();
    let mut trainer = build(outdir.path(), &params("{}"), TrainerOptions::default()).unwrap();
    let report = trainer.run().unwrap();

    assert_eq!(report.decision, TerminalDecision::MaxEpochsReached);
    assert!(!report.converged);
    assert_eq!(trainer.state(), TrainerState::MaxEpochsStopped);
    assert_eq!(report.epochs, 3);
    // 8 samples in batches of 4, three epochs.
    assert_eq!(report.episodes, 6);
    assert_eq!(trainer.episode(), 6);
    assert!(report.final_validation_loss.is_finite());

    let dir = trainer.run_dir();
    assert!(dir.configuration_file().exists());
    assert!(dir.log_file().parent().unwrap().is_dir());
    assert_eq!(lines(&dir.training_statistics()), 1 + 6);
    assert_eq!(lines(&dir.training_aggregated_statistics()), 1 + 3);
    // One row per epoch plus the final validation.
    assert_eq!(lines(&dir.validation_aggregated_statistics()), 1 + 4);

    let header = fs::read_to_string(dir.training_statistics()).unwrap();
    assert!(header.starts_with("episode,epoch,loss,accuracy"));

    let checkpoints = list_checkpoints(&dir.models_dir()).unwrap();
    let names: Vec<String> =
        checkpoints.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
    assert_eq!(names, vec!["model_best.json", "model_epoch_0000.json", "model_epoch_0001.json", "model_epoch_0002.json"]);

    let best = Checkpoint::read(&dir.models_dir().join(BEST_FILE)).unwrap();
    assert_eq!(best.model, "mlp");
    let stored_loss = best.validation_loss.unwrap();
    assert!((stored_loss - report.best_validation_loss).abs() < 1e-12);
}

#[test]
fn converges_once_loss_is_below_threshold() {
    let outdir = tempfile::tempdir().unwrap();
    let report = run(outdir.path(), &params("training: { terminal_condition: { max_epochs: 10, loss_stop: 10.0 } }"));
    assert_eq!(report.decision, TerminalDecision::ConvergedBelowThreshold);
    assert!(report.converged);
    assert_eq!(report.epochs, 1);
}

#[test]
fn mandatory_curriculum_delays_convergence() {
    let curriculum = r#"
training:
  terminal_condition: { max_epochs: 10, loss_stop: 10.0 }
  curriculum_learning:
    phases:
      - { episode: 0, params: { noise: 0.0 } }
      - { episode: 4, params: { noise: 0.05 } }
"#;
    let outdir = tempfile::tempdir().unwrap();
    // Two episodes per epoch: the last phase is reached after the second epoch.
    let report = run(outdir.path(), &params(curriculum));
    assert_eq!(report.decision, TerminalDecision::ConvergedBelowThreshold);
    assert_eq!(report.epochs, 2);

    let optional = format!("{}    must_finish: false\n", curriculum);
    let report = run(outdir.path(), &params(&optional));
    assert_eq!(report.epochs, 1);
}

#[test]
fn max_epochs_wins_over_unfinished_curriculum() {
    let overrides = r#"
training:
  terminal_condition: { max_epochs: 2, loss_stop: 10.0 }
  curriculum_learning:
    phases:
      - { episode: 1000, params: { noise: 0.1 } }
"#;
    let outdir = tempfile::tempdir().unwrap();
    let report = run(outdir.path(), &params(overrides));
    assert_eq!(report.decision, TerminalDecision::MaxEpochsReached);
    assert_eq!(report.epochs, 2);
}

#[test]
fn missing_warm_start_checkpoint_is_not_fatal() {
    let outdir = tempfile::tempdir().unwrap();
    let options = TrainerOptions {
        checkpoint: Some(outdir.path().join("does_not_exist.json")),
        ..TrainerOptions::default()
    };
    let report = build(outdir.path(), &params("{}"), options).unwrap().run().unwrap();
    assert_eq!(report.epochs, 3);
}

#[test]
fn warm_start_from_best_checkpoint() {
    let outdir = tempfile::tempdir().unwrap();
    let first = run(outdir.path(), &params("{}"));
    let best = first.run_dir.join("models").join(BEST_FILE);

    let options = TrainerOptions { checkpoint: Some(best.clone()), ..TrainerOptions::default() };
    let trainer = build(outdir.path(), &params("{}"), options).unwrap();
    let stored = Checkpoint::read(&best).unwrap();
    assert_eq!(trainer.model().export_parameters().unwrap(), stored.parameters);
}

#[test]
fn progress_channel_gets_one_summary_per_epoch() {
    let outdir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel();
    let options = TrainerOptions { progress_tx: Some(tx), ..TrainerOptions::default() };
    let report = build(outdir.path(), &params("{}"), options).unwrap().run().unwrap();

    let summaries: Vec<_> = rx.try_iter().collect();
    assert_eq!(summaries.len(), report.epochs);
    assert_eq!(summaries.iter().map(|s| s.episode).collect::<Vec<_>>(), vec![2, 4, 6]);
    assert_eq!(summaries.last().unwrap().decision, TerminalDecision::MaxEpochsReached);
    assert!(summaries[..2].iter().all(|s| s.decision == TerminalDecision::Continue));
}

#[test]
fn dropped_progress_receiver_does_not_stop_training() {
    let outdir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel();
    drop(rx);
    let options = TrainerOptions { progress_tx: Some(tx), ..TrainerOptions::default() };
    let report = build(outdir.path(), &params("{}"), options).unwrap().run().unwrap();
    assert_eq!(report.epochs, 3);
}

#[test]
fn partial_validation_writes_a_row_per_interval() {
    let outdir = tempfile::tempdir().unwrap();
    let mut trainer =
        build(outdir.path(), &params("training: { partial_validation_interval: 2 }"), TrainerOptions::default()).unwrap();
    trainer.run().unwrap();
    // Episodes 0, 2 and 4.
    assert_eq!(lines(&trainer.run_dir().validation_statistics()), 1 + 3);
}

const REVERSE_RECALL: &str = r#"
training:
  problem: { name: reverse_recall, data_bits: 2, max_sequence_length: 4, size: 8 }
  curriculum_learning:
    phases:
      - { episode: 0, params: { max_sequence_length: 1 } }
      - { episode: 1000, params: { max_sequence_length: 4 } }
  terminal_condition: { max_epochs: 2 }
validation:
  problem: { name: reverse_recall, data_bits: 2, max_sequence_length: 4, size: 4 }
model:
  name: mlp
  hidden_sizes: [8]
  output_activation: sigmoid
  loss: bce
  control: { step_width: 4, encode: 0, solve: 1 }
"#;

/// Values of `column` in a statistics CSV, one per row.
fn column(path: &Path, name: &str) -> Vec<f64> {
    let text = fs::read_to_string(path).unwrap();
    let mut rows = text.lines();
    let index = rows.next().unwrap().split(',').position(|c| c == name).unwrap();
    rows.map(|row| row.split(',').nth(index).unwrap().trim().parse().unwrap()).collect()
}

#[test]
fn first_epoch_trains_at_the_starting_phase() {
    let outdir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel();
    let options = TrainerOptions { progress_tx: Some(tx), ..TrainerOptions::default() };
    let mut trainer = build(outdir.path(), &params(REVERSE_RECALL), options).unwrap();
    assert_eq!(trainer.curriculum().params["max_sequence_length"], 1.0);
    assert!(!trainer.curriculum().finished);
    trainer.run().unwrap();

    let dir = trainer.run_dir();
    let epochs = column(&dir.training_statistics(), "epoch");
    let lengths = column(&dir.training_statistics(), "max_seq_length");
    assert_eq!(epochs, vec![0.0, 0.0, 1.0, 1.0]);
    assert_eq!(lengths, vec![1.0; 4]);

    let summaries: Vec<_> = rx.try_iter().collect();
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.curriculum.params["max_sequence_length"] == 1.0 && !s.curriculum.finished));
}

#[test]
fn tensorboard_writes_training_and_validation_events() {
    let outdir = tempfile::tempdir().unwrap();
    let options = TrainerOptions {
        context: RunContext { tensorboard: Some(TensorboardLevel::Gradients), logging_interval: 1, ..RunContext::default() },
        ..TrainerOptions::default()
    };
    let mut trainer =
        build(outdir.path(), &params("training: { partial_validation_interval: 2 }"), options).unwrap();
    trainer.run().unwrap();

    for dir in [trainer.run_dir().training_events_dir(), trainer.run_dir().validation_events_dir()] {
        let events: Vec<String> =
            fs::read_dir(&dir).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
        assert_eq!(events.len(), 1, "{:?}", events);
        assert!(events[0].starts_with("events.out.tfevents"));
        assert!(fs::metadata(dir.join(&events[0])).unwrap().len() > 0);
    }
}

#[test]
fn no_event_files_without_tensorboard() {
    let outdir = tempfile::tempdir().unwrap();
    let report = run(outdir.path(), &params("{}"));
    assert!(!report.run_dir.join("training").exists());
    assert!(!report.run_dir.join("validation").exists());
}

#[test]
fn worker_loaders_cover_the_same_episodes() {
    let outdir = tempfile::tempdir().unwrap();
    let report = run(
        outdir.path(),
        &params("{ training: { dataloader: { num_workers: 2 } }, validation: { dataloader: { num_workers: 3 } } }"),
    );
    assert_eq!(report.episodes, 6);
}

#[test]
fn early_stopping_ends_a_stalled_run() {
    let outdir = tempfile::tempdir().unwrap();
    let overrides = r#"
training:
  optimizer: { name: sgd, lr: 0.0000001 }
  terminal_condition: { max_epochs: 50, early_stop: { patience: 2, min_delta: 0.1 } }
"#;
    let report = run(outdir.path(), &params(overrides));
    assert_eq!(report.decision, TerminalDecision::EarlyStopped);
    assert!(!report.converged);
    // First epoch sets the best loss; two epochs without improvement follow.
    assert_eq!(report.epochs, 3);
}

#[test]
fn missing_required_key_is_fatal() {
    let outdir = tempfile::tempdir().unwrap();
    let mut params = params("{}");
    params.set("validation.problem", serde_yaml::from_str("{ kind: xor }").unwrap());
    let err = build(outdir.path(), &params, TrainerOptions::default()).err().unwrap();
    assert!(matches!(err, TrainerError::MissingConfigKey(ref k) if k == "validation.problem.name"));
    assert!(err.is_fatal());
}

#[test]
fn mismatched_validation_problem_is_rejected() {
    let outdir = tempfile::tempdir().unwrap();
    let params = params("validation: { problem: { name: reverse_recall } }");
    let err = build(outdir.path(), &params, TrainerOptions::default()).err().unwrap();
    assert!(matches!(err, TrainerError::InvalidConfig { ref key, .. } if key == "validation.problem"));
}

#[test]
fn concurrent_runs_get_distinct_directories() {
    let outdir = tempfile::tempdir().unwrap();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let outdir = outdir.path().to_path_buf();
            thread::spawn(move || RunDirectory::create(&outdir, "p", "m", Some("same")).unwrap())
        })
        .collect();
    let dirs: Vec<RunDirectory> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_ne!(dirs[0].path(), dirs[1].path());
    assert!(dirs.iter().all(|d| d.models_dir().is_dir()));
}

/// Sets both control bits on the first step of every sample.
struct ConflictingControl {
    curriculum: CurriculumController,
}

impl Problem for ConflictingControl {
    fn name(&self) -> &str {
        "conflicting_control"
    }

    fn default_values(&self) -> ProblemDefaults {
        ProblemDefaults { input_size: 4, output_size: 1 }
    }

    fn len(&self) -> usize {
        4
    }

    fn sample(&self, _index: usize, _rng: &mut StdRng) -> Result<Sample> {
        Ok(Sample { input: vec![1.0, 1.0, 0.0, 0.0], target: vec![0.0] })
    }

    fn curriculum_learning_initialize(&mut self, config: Option<&CurriculumConfig>) -> Result<()> {
        self.curriculum = CurriculumController::initialize(config, CurriculumParams::new())?;
        Ok(())
    }

    fn curriculum_learning_update_params(&mut self, episode: usize) -> bool {
        self.curriculum.update(episode)
    }

    fn curriculum_state(&self) -> CurriculumState {
        self.curriculum.state()
    }
}

fn build_conflicting(_section: &ParamTree, _context: &RunContext) -> Result<Box<dyn Problem>> {
    Ok(Box::new(ConflictingControl { curriculum: CurriculumController::disabled(CurriculumParams::new()) }))
}

#[test]
fn invalid_control_encoding_aborts_the_run() {
    let mut registry = Registry::with_builtins();
    registry.register_problem("conflicting_control", build_conflicting);

    let overrides = r#"
training: { problem: { name: conflicting_control } }
validation: { problem: { name: conflicting_control } }
model: { name: mlp, control: { step_width: 2 } }
"#;
    let outdir = tempfile::tempdir().unwrap();
    let run_dir = RunDirectory::create(outdir.path(), "conflicting_control", "mlp", Some("policy")).unwrap();
    let mut trainer = Trainer::build(&params(overrides), run_dir, TrainerOptions::default(), &registry).unwrap();

    let err = trainer.run().unwrap_err();
    assert!(matches!(err, TrainerError::PolicyViolation(_)));
    assert!(err.is_fatal());
    assert_eq!(trainer.episode(), 0);
}

#[test]
fn shipped_configurations_build() {
    let registry = Registry::with_builtins();
    for name in ["xor", "reverse_recall"] {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs").join(format!("{}.yaml", name));
        let params = ParamTree::from_yaml_file(&path).unwrap();
        let outdir = tempfile::tempdir().unwrap();
        let run_dir = RunDirectory::create(outdir.path(), name, "mlp", None).unwrap();
        let trainer = Trainer::build(&params, run_dir, TrainerOptions::default(), &registry).unwrap();
        assert_eq!(trainer.model().name(), "mlp");
    }
}
