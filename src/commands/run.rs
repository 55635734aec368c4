// src/commands/run.rs

//! Convergence command
//!
//! Loads the plan, converges (or checks) the selected assertions, then
//! optionally runs the verification harness over the same selection.

use super::{open_plan, print_summary, tag_filter};
use crate::cli::{OutputFormat, PlanArgs, TagArgs};
use anyhow::{Context, Result};
use converge::engine::{
    CancelToken, ConvergeOptions, ConvergenceEngine, RunLock, cancel_on_signals,
};
use converge::observer::{LineObserver, RunObserver, SilentObserver};
use converge::plan::parse_duration;
use converge::report::aggregate;
use converge::verify::{Harness, LiveProbe};
use converge::{ModuleRegistry, SystemRunner};
use std::path::Path;
use tracing::{info, warn};

/// Converge the system towards the plan and return the exit code
#[allow(clippy::too_many_arguments)]
pub fn cmd_run(
    plan_args: &PlanArgs,
    tag_args: &TagArgs,
    check: bool,
    root: &str,
    timeout: Option<&str>,
    lock: Option<&str>,
    format: OutputFormat,
    verify: bool,
) -> Result<i32> {
    let plan = open_plan(plan_args)?;
    let filter = tag_filter(tag_args);

    let timeout = timeout
        .map(parse_duration)
        .transpose()
        .context("Invalid --timeout")?;

    let cancel = CancelToken::new();
    if let Err(e) = cancel_on_signals(&cancel) {
        warn!("Interrupts will not stop the run cleanly: {}", e);
    }

    let mut options = ConvergeOptions::new()
        .with_filter(filter.clone())
        .check_mode(check)
        .with_timeout(timeout)
        .with_cancel(cancel);
    if !check {
        options = options.with_lock(RunLock::path_for(lock.map(Path::new), &plan));
    }

    let lines = LineObserver::new(check);
    let observer: &dyn RunObserver = match format {
        OutputFormat::Text => &lines,
        OutputFormat::Json => &SilentObserver,
    };

    let registry = ModuleRegistry::with_builtins();
    let runner = SystemRunner::new();
    let engine = ConvergenceEngine::new(&registry, &runner)
        .with_root(root)
        .with_observer(observer);

    let report = engine.converge(&plan, &options)?;
    info!(
        "Run {}: {} changed, {} failed, {} skipped",
        report.overall_status,
        report.changed_count(),
        report.failed_count(),
        report.skipped.len()
    );

    let results = if verify {
        let probe = LiveProbe::new(&runner, root);
        Harness::new(&probe).with_observer(observer).verify(&plan, &filter)
    } else {
        Vec::new()
    };

    let summary = aggregate(Some(&report), &results);
    print_summary(&summary, Some(&report), &results, format)?;
    Ok(summary.exit_code(false))
}
