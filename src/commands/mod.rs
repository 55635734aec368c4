// src/commands/mod.rs
//! Command handlers for the converge CLI
//!
//! Handlers that produce a verdict return the process exit code; `main`
//! exits with it after tracing has flushed.

mod init;
mod plan;
mod run;
mod verify;

pub use init::{cmd_completions, cmd_init};
pub use plan::{cmd_plan_list, cmd_plan_validate};
pub use run::cmd_run;
pub use verify::cmd_verify;

use crate::cli::{OutputFormat, PlanArgs, TagArgs};
use anyhow::{Context, Result};
use converge::plan::{TagFilter, Vars, load_plan, parse_var_override};
use converge::report::{self, Summary};
use converge::verify::VerificationResult;
use converge::{Plan, RunReport};
use std::path::Path;
use tracing::debug;

/// Load the plan named on the command line, applying `--var` overrides
pub(crate) fn open_plan(args: &PlanArgs) -> Result<Plan> {
    let mut overrides = Vars::new();
    for raw in &args.vars {
        let (key, value) = parse_var_override(raw)?;
        overrides.insert(key, value);
    }

    let plan = load_plan(Some(Path::new(&args.plan)), &overrides)
        .with_context(|| format!("Failed to load plan {}", args.plan))?;
    debug!(
        "Loaded plan '{}': {} group(s), {} assertion(s), {} check(s)",
        plan.name,
        plan.groups.len(),
        plan.assertion_count(),
        plan.checks.len()
    );
    Ok(plan)
}

/// Build the tag filter from `--tags` and `--skip-tags`
pub(crate) fn tag_filter(args: &TagArgs) -> TagFilter {
    let only = args.tags.as_deref().map(TagFilter::parse_list).unwrap_or_default();
    let skip = args
        .skip_tags
        .as_deref()
        .map(TagFilter::parse_list)
        .unwrap_or_default();
    TagFilter::new(only, skip)
}

/// Print the final summary in the requested format
///
/// JSON output is a single document carrying the summary plus the raw
/// outcomes and verification results it was built from.
pub(crate) fn print_summary(
    summary: &Summary,
    run: Option<&RunReport>,
    results: &[VerificationResult],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!();
            for line in report::summary_lines(summary) {
                println!("{}", line);
            }
        }
        OutputFormat::Json => {
            let document = serde_json::json!({
                "summary": summary,
                "run": run,
                "verification": results,
            });
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
    }
    Ok(())
}
