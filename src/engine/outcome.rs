// src/engine/outcome.rs

//! Per-assertion outcomes and the run report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};

/// Result of processing one assertion. Never mutated after the engine
/// records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub assertion_identifier: String,
    /// Group the assertion belongs to; filled in by the engine
    pub group: String,
    pub changed: bool,
    pub failed: bool,
    /// The current state could not be determined; nothing was changed
    pub indeterminate: bool,
    pub message: String,
}

impl Outcome {
    /// Already in the desired state
    pub fn unchanged(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(identifier, false, false, message)
    }

    /// The system was (or in check mode, would be) changed
    pub fn changed(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(identifier, true, false, message)
    }

    /// The assertion could not be enforced
    pub fn failed(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(identifier, false, true, message)
    }

    /// The current state could not be determined, so nothing was done
    pub fn indeterminate(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        let mut outcome = Self::build(identifier, false, false, message);
        outcome.indeterminate = true;
        outcome
    }

    fn build(
        identifier: impl Into<String>,
        changed: bool,
        failed: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            assertion_identifier: identifier.into(),
            group: String::new(),
            changed,
            failed,
            indeterminate: false,
            message: message.into(),
        }
    }

    pub(crate) fn in_group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    /// `group/identifier`
    pub fn label(&self) -> String {
        format!("{}/{}", self.group, self.assertion_identifier)
    }
}

/// An assertion that was selected but never attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub group: String,
    pub assertion_identifier: String,
    pub reason: String,
}

impl Skipped {
    pub fn label(&self) -> String {
        format!("{}/{}", self.group, self.assertion_identifier)
    }
}

/// Overall status of a convergence run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

/// Everything one convergence run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<Outcome>,
    pub skipped: Vec<Skipped>,
    pub overall_status: RunStatus,
    /// Check mode: nothing was applied, `changed` means "would change"
    pub check_mode: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Assemble a report, deriving the overall status
    pub fn new(
        outcomes: Vec<Outcome>,
        skipped: Vec<Skipped>,
        cancelled: bool,
        check_mode: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let overall_status = if cancelled {
            RunStatus::Cancelled
        } else if outcomes.iter().any(|o| o.failed) {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };

        Self {
            outcomes,
            skipped,
            overall_status,
            check_mode,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.overall_status == RunStatus::Success
    }

    pub fn changed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.changed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.failed).count()
    }

    /// Outcomes that neither changed nor failed
    pub fn ok_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.changed && !o.failed).count()
    }

    /// Find the outcome recorded for an assertion
    pub fn outcome_for(&self, group: &str, identifier: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.group == group && o.assertion_identifier == identifier)
    }
}
