//! Console and per-run file logging.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Console-only subscriber for the phase before the run directory exists.
/// Meant for `tracing::subscriber::with_default`.
pub fn console_subscriber() -> impl Subscriber + Send + Sync {
    tracing_subscriber::fmt().with_env_filter(env_filter()).with_target(false).finish()
}

/// Installs the global subscriber: console plus, when `log_file` is given,
/// a plain-text copy of every record in that file.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for the whole run. Returns `None` when file logging is off or the file
/// cannot be opened; a subscriber that is already installed is left alone.
pub fn init_logging(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_file.and_then(file_writer) {
        Some((writer, guard)) => (
            Some(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false).with_target(true)),
            Some(guard),
        ),
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer().with_target(false).with_thread_ids(false);

    let _ = tracing_subscriber::registry().with(env_filter()).with(console_layer).with(file_layer).try_init();
    guard
}

fn file_writer(path: &Path) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path.parent()?;
    let name = path.file_name()?;
    // rolling::never panics when it cannot create the file.
    if let Err(e) = OpenOptions::new().create(true).append(true).open(path) {
        eprintln!("Warning: could not open log file {} ({}), file logging disabled", path.display(), e);
        return None;
    }
    let appender = tracing_appender::rolling::never(dir, name);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritable_log_file_disables_file_logging() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_such_dir").join("training.log");
        assert!(file_writer(&missing).is_none());
    }

    #[test]
    fn file_writer_creates_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.log");
        let writer = file_writer(&path);
        assert!(writer.is_some());
        assert!(path.exists());
    }
}
