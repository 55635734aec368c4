// src/report.rs

//! Report aggregation
//!
//! Folds a run report and verification results into one `Summary` with an
//! overall verdict, a failure list in input order, and the process exit
//! code. Result lines use stable `[PASS]`/`[FAIL]`/`[INFO]` prefixes so
//! logs can be grepped.

use crate::engine::{Outcome, RunReport, RunStatus, Skipped};
use crate::error::Result;
use crate::verify::{Verdict, VerificationResult};
use serde::Serialize;

/// Everything converged and verified
pub const EXIT_OK: i32 = 0;
/// At least one failure, or the run was cancelled
pub const EXIT_FAILURE: i32 = 1;
/// No failures, but some results were indeterminate (strict mode only)
pub const EXIT_INDETERMINATE: i32 = 2;

/// Per-category tallies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub ok: usize,
    pub changed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub passed: usize,
    pub verify_failed: usize,
    pub indeterminate: usize,
}

/// Aggregated view of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub overall_ok: bool,
    /// Human-readable failure descriptions, in input order
    pub failures: Vec<String>,
    pub indeterminate: Vec<String>,
    pub counts: Counts,
    pub cancelled: bool,
    pub check_mode: bool,
}

impl Summary {
    /// Exit code for this summary
    pub fn exit_code(&self, strict: bool) -> i32 {
        if !self.overall_ok {
            EXIT_FAILURE
        } else if strict && !self.indeterminate.is_empty() {
            EXIT_INDETERMINATE
        } else {
            EXIT_OK
        }
    }

    /// One-line recap, e.g. `ok=3 changed=1 failed=0 skipped=0`
    pub fn recap_line(&self) -> String {
        let c = &self.counts;
        format!(
            "ok={} changed={} failed={} skipped={} passed={} verify_failed={} indeterminate={}",
            c.ok, c.changed, c.failed, c.skipped, c.passed, c.verify_failed, c.indeterminate
        )
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Combine convergence and verification into one summary.
///
/// `overall_ok` holds iff no outcome failed, no verification failed, and
/// the run was not cancelled. Indeterminate results never fail the
/// summary on their own.
pub fn aggregate(report: Option<&RunReport>, results: &[VerificationResult]) -> Summary {
    let mut counts = Counts::default();
    let mut failures = Vec::new();
    let mut indeterminate = Vec::new();
    let mut cancelled = false;
    let mut check_mode = false;

    if let Some(report) = report {
        check_mode = report.check_mode;
        for outcome in &report.outcomes {
            if outcome.failed {
                counts.failed += 1;
                failures.push(format!("{}: {}", outcome.label(), outcome.message));
            } else if outcome.changed {
                counts.changed += 1;
            } else {
                counts.ok += 1;
                if outcome.indeterminate {
                    indeterminate.push(format!("{}: {}", outcome.label(), outcome.message));
                }
            }
        }
        counts.skipped = report.skipped.len();

        if report.overall_status == RunStatus::Cancelled {
            cancelled = true;
            failures.push(format!(
                "run cancelled; {} assertion(s) not attempted",
                report.skipped.len()
            ));
        }
    }

    for result in results {
        match result.verdict {
            Verdict::Passed => counts.passed += 1,
            Verdict::Failed => {
                counts.verify_failed += 1;
                failures.push(format!("{}: {}", result.check_name, result.detail));
            }
            Verdict::Indeterminate => {
                counts.indeterminate += 1;
                indeterminate.push(format!("{}: {}", result.check_name, result.detail));
            }
        }
    }

    Summary {
        overall_ok: failures.is_empty(),
        failures,
        indeterminate,
        counts,
        cancelled,
        check_mode,
    }
}

/// `[PASS] base/package:git: already in desired state`
pub fn outcome_line(outcome: &Outcome, check_mode: bool) -> String {
    let prefix = if outcome.failed { "[FAIL]" } else { "[PASS]" };
    let status = match (outcome.failed, outcome.changed, check_mode) {
        (true, _, _) => "failed",
        (false, true, true) => "would change",
        (false, true, false) => "changed",
        (false, false, _) => "ok",
    };
    format!("{} {} ({}): {}", prefix, outcome.label(), status, outcome.message)
}

/// `[INFO] docker/package:docker-ce skipped: docker/repository:docker failed`
pub fn skipped_line(skipped: &Skipped) -> String {
    format!("[INFO] {} skipped: {}", skipped.label(), skipped.reason)
}

/// `[PASS]`/`[FAIL]` per verdict, `[INFO]` for indeterminate
pub fn verification_line(result: &VerificationResult) -> String {
    match result.verdict {
        Verdict::Passed => format!("[PASS] {}: {}", result.check_name, result.detail),
        Verdict::Failed => format!("[FAIL] {}: {}", result.check_name, result.detail),
        Verdict::Indeterminate => {
            format!("[INFO] {}: indeterminate: {}", result.check_name, result.detail)
        }
    }
}

/// Final text block: failures, indeterminate items, recap
pub fn summary_lines(summary: &Summary) -> Vec<String> {
    let mut lines = Vec::new();
    for failure in &summary.failures {
        lines.push(format!("[FAIL] {}", failure));
    }
    for item in &summary.indeterminate {
        lines.push(format!("[INFO] indeterminate: {}", item));
    }
    let verdict = if summary.overall_ok { "[PASS]" } else { "[FAIL]" };
    lines.push(format!("{} {}", verdict, summary.recap_line()));
    lines
}
