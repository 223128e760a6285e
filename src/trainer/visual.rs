use std::io::{self, BufRead, Write};

use crate::model::ForwardOutput;
use crate::problem::Batch;

/// Shows one batch and its predictions. Blocks until the user is done with
/// it; returns `true` when the user asked to stop visualizing.
pub trait Visualizer {
    fn show(&mut self, label: &str, batch: &Batch, output: &ForwardOutput) -> bool;
}

#[derive(Debug, Default)]
pub struct NoopVisualizer;

impl Visualizer for NoopVisualizer {
    fn show(&mut self, _label: &str, _batch: &Batch, _output: &ForwardOutput) -> bool {
        false
    }
}

/// Prints the first sample of the batch to stdout and, when interactive,
/// waits for Enter (`q` + Enter stops visualizing).
#[derive(Debug, Default)]
pub struct ConsoleVisualizer {
    pub interactive: bool,
}

impl ConsoleVisualizer {
    pub fn new(interactive: bool) -> Self {
        ConsoleVisualizer { interactive }
    }
}

fn render_row(values: &[f64]) -> String {
    values.iter().map(|v| format!("{:.2}", v)).collect::<Vec<_>>().join(" ")
}

impl Visualizer for ConsoleVisualizer {
    fn show(&mut self, label: &str, batch: &Batch, output: &ForwardOutput) -> bool {
        if batch.is_empty() {
            return false;
        }
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let _ = writeln!(out, "== {} (sample {}, loss {:.6}) ==", label, batch.indices[0], output.loss);
        let _ = writeln!(out, "input:      {}", render_row(batch.inputs.row(0)));
        let _ = writeln!(out, "target:     {}", render_row(batch.targets.row(0)));
        let _ = writeln!(out, "prediction: {}", render_row(output.predictions.row(0)));
        if !self.interactive {
            return false;
        }
        let _ = write!(out, "[Enter] continue, [q] stop visualizing: ");
        let _ = out.flush();
        drop(out);

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => true,
            Ok(_) => line.trim().eq_ignore_ascii_case("q"),
        }
    }
}
