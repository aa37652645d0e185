//! Operator-facing output for a sync run.
//!
//! Lines go to a caller supplied sink (an IDE output pane, stdout, ...) and to
//! `tracing`. Every step is also kept in a trace so that a fatal error can
//! report how far the run got.

use crate::utils::errors::SyncError;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Callback receiving one line of output at a time.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

pub struct SyncLog {
    sink: Option<LineSink>,
    print_timings: bool,
    started: Instant,
    last_ms: u128,
    steps: Vec<String>,
}

impl SyncLog {
    pub fn new(sink: Option<LineSink>, print_timings: bool) -> Self {
        Self {
            sink,
            print_timings,
            started: Instant::now(),
            last_ms: 0,
            steps: Vec::new(),
        }
    }

    /// Reset the stopwatch and forget previously recorded steps.
    pub fn restart(&mut self) {
        self.started = Instant::now();
        self.last_ms = 0;
        self.steps.clear();
    }

    /// Record a step in the trace and print it.
    pub fn step(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.print(&text);
        self.steps.push(text);
    }

    /// Print a line, prefixed with step and total elapsed time when timings are on.
    pub fn print(&mut self, text: &str) {
        tracing::info!("{}", text);

        let Some(sink) = &self.sink else {
            return;
        };

        if self.print_timings {
            let total_ms = self.started.elapsed().as_millis();
            let line = timed_line(total_ms - self.last_ms, total_ms, text);
            self.last_ms = total_ms;
            sink(&line);
        } else {
            sink(text);
        }
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Wrap a fatal error together with the steps executed so far.
    pub fn abort(&mut self, error: SyncError) -> SyncError {
        let steps = self.steps.clone();
        self.print(&format!("Error: {error}"));
        match error {
            aborted @ SyncError::Aborted { .. } => aborted,
            other => SyncError::Aborted {
                steps,
                source: Box::new(other),
            },
        }
    }
}

impl fmt::Debug for SyncLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncLog")
            .field("print_timings", &self.print_timings)
            .field("steps", &self.steps)
            .finish()
    }
}

fn timed_line(step_ms: u128, total_ms: u128, text: &str) -> String {
    format!("[{step_ms:>7} ms][{total_ms:>7} ms] {text}")
}
