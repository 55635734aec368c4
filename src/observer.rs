// src/observer.rs

//! Run observers
//!
//! The engine and the harness announce each outcome, skip, and
//! verification result as it happens. Implementations:
//! - `SilentObserver`: no-op, for JSON output and library use
//! - `LogObserver`: forwards events to tracing
//! - `LineObserver`: prints one `[PASS]`/`[FAIL]`/`[INFO]` line per event
//! - `CallbackObserver`: hands events to a closure

use crate::engine::{Outcome, RunStatus, Skipped};
use crate::report;
use crate::verify::VerificationResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Something that happened during a run
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A group with at least one selected assertion is starting
    GroupStarted { group: String, selected: usize },
    Outcome(Outcome),
    Skipped(Skipped),
    Verified(VerificationResult),
    /// Convergence finished
    RunFinished { status: RunStatus },
}

/// Receives run events
///
/// Implementations must be thread-safe so a caller can share one observer
/// between the engine and the harness.
pub trait RunObserver: Send + Sync {
    fn notify(&self, event: &RunEvent);
}

/// Ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl RunObserver for SilentObserver {
    fn notify(&self, _event: &RunEvent) {}
}

/// Forwards events to tracing at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl RunObserver for LogObserver {
    fn notify(&self, event: &RunEvent) {
        match event {
            RunEvent::GroupStarted { group, selected } => {
                info!("Group {}: {} assertion(s)", group, selected);
            }
            RunEvent::Outcome(outcome) if outcome.failed => {
                warn!("{} failed: {}", outcome.label(), outcome.message);
            }
            RunEvent::Outcome(outcome) => {
                info!("{} ok (changed={}): {}", outcome.label(), outcome.changed, outcome.message);
            }
            RunEvent::Skipped(skipped) => info!("{} skipped: {}", skipped.label(), skipped.reason),
            RunEvent::Verified(result) => {
                info!("{} {}: {}", result.check_name, result.verdict, result.detail);
            }
            RunEvent::RunFinished { status } => info!("Run finished: {}", status),
        }
    }
}

/// Prints result lines to stdout as they happen
#[derive(Debug, Default)]
pub struct LineObserver {
    check_mode: bool,
    lines: AtomicUsize,
}

impl LineObserver {
    pub fn new(check_mode: bool) -> Self {
        Self {
            check_mode,
            lines: AtomicUsize::new(0),
        }
    }

    /// Number of lines printed so far
    pub fn lines(&self) -> usize {
        self.lines.load(Ordering::Relaxed)
    }

    fn emit(&self, line: String) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        println!("{}", line);
    }
}

impl RunObserver for LineObserver {
    fn notify(&self, event: &RunEvent) {
        match event {
            RunEvent::GroupStarted { .. } | RunEvent::RunFinished { .. } => {}
            RunEvent::Outcome(outcome) => self.emit(report::outcome_line(outcome, self.check_mode)),
            RunEvent::Skipped(skipped) => self.emit(report::skipped_line(skipped)),
            RunEvent::Verified(result) => self.emit(report::verification_line(result)),
        }
    }
}

/// Calls a closure for every event
pub struct CallbackObserver<F>
where
    F: Fn(&RunEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackObserver<F>
where
    F: Fn(&RunEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> RunObserver for CallbackObserver<F>
where
    F: Fn(&RunEvent) + Send + Sync,
{
    fn notify(&self, event: &RunEvent) {
        (self.callback)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callback_observer_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = CallbackObserver::new(move |event: &RunEvent| {
            if let RunEvent::Outcome(outcome) = event {
                sink.lock().unwrap().push(outcome.assertion_identifier.clone());
            }
        });

        observer.notify(&RunEvent::GroupStarted {
            group: "base".to_string(),
            selected: 1,
        });
        observer.notify(&RunEvent::Outcome(Outcome::unchanged("package:git", "ok")));
        assert_eq!(*seen.lock().unwrap(), vec!["package:git"]);
    }

    #[test]
    fn test_line_observer_counts_result_lines() {
        let observer = LineObserver::new(false);
        observer.notify(&RunEvent::GroupStarted {
            group: "base".to_string(),
            selected: 2,
        });
        observer.notify(&RunEvent::Outcome(Outcome::changed("package:git", "installed git")));
        observer.notify(&RunEvent::Verified(VerificationResult::pass(
            "base/package:git",
            "installed",
        )));
        observer.notify(&RunEvent::RunFinished {
            status: RunStatus::Success,
        });
        assert_eq!(observer.lines(), 2);
    }

    #[test]
    fn test_observers_are_object_safe() {
        let observers: Vec<Box<dyn RunObserver>> = vec![
            Box::new(SilentObserver),
            Box::new(LogObserver),
            Box::new(LineObserver::new(true)),
        ];
        for observer in &observers {
            observer.notify(&RunEvent::RunFinished {
                status: RunStatus::Cancelled,
            });
        }
    }
}
