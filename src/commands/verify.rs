// src/commands/verify.rs

//! Verification command

use super::{open_plan, print_summary, tag_filter};
use crate::cli::{OutputFormat, PlanArgs, TagArgs};
use anyhow::Result;
use converge::SystemRunner;
use converge::engine::RunLock;
use converge::observer::{LineObserver, RunObserver, SilentObserver};
use converge::report::aggregate;
use converge::verify::{Harness, LiveProbe};
use tracing::warn;

/// Verify the system against the plan and return the exit code
pub fn cmd_verify(
    plan_args: &PlanArgs,
    tag_args: &TagArgs,
    root: &str,
    format: OutputFormat,
    strict: bool,
) -> Result<i32> {
    let plan = open_plan(plan_args)?;
    let filter = tag_filter(tag_args);

    let lock_path = RunLock::path_for(None, &plan);
    if let Some(holder) = RunLock::current_holder(&lock_path) {
        warn!(
            "A convergence run ({}) holds {}; results may change once it finishes",
            holder,
            lock_path.display()
        );
    }

    let lines = LineObserver::new(false);
    let observer: &dyn RunObserver = match format {
        OutputFormat::Text => &lines,
        OutputFormat::Json => &SilentObserver,
    };

    let runner = SystemRunner::new();
    let probe = LiveProbe::new(&runner, root);
    let results = Harness::new(&probe).with_observer(observer).verify(&plan, &filter);

    let summary = aggregate(None, &results);
    print_summary(&summary, None, &results, format)?;
    Ok(summary.exit_code(strict))
}
