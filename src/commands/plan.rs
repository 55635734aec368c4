// src/commands/plan.rs

//! Plan inspection commands

use super::{open_plan, tag_filter};
use crate::cli::{PlanArgs, TagArgs};
use anyhow::Result;
use converge::{CommandRunner, ModuleRegistry, SystemRunner};
use converge::plan::TagFilter;

/// List groups, assertions, and checks, marking what the filter selects
pub fn cmd_plan_list(plan_args: &PlanArgs, tag_args: &TagArgs) -> Result<()> {
    let plan = open_plan(plan_args)?;
    let filter = tag_filter(tag_args);

    println!("Plan: {}", plan.name);
    if filter.is_restricted() || tag_args.skip_tags.is_some() {
        println!("(* = selected by the given tags)");
    }

    let mut selected_total = 0;
    for group in &plan.groups {
        let selected = group.selected(&filter);
        selected_total += selected.len();

        let tags = join(group.tags.iter());
        if tags.is_empty() {
            println!("\n[{}]", group.name);
        } else {
            println!("\n[{}] tags: {}", group.name, tags);
        }

        for assertion in &group.assertions {
            let marker = if selected.iter().any(|a| a.identifier == assertion.identifier) {
                "*"
            } else {
                " "
            };
            let own_tags = join(assertion.tags.iter());
            if own_tags.is_empty() {
                println!("  {} {} ({})", marker, assertion.identifier, assertion.desired_state);
            } else {
                println!(
                    "  {} {} ({}) tags: {}",
                    marker, assertion.identifier, assertion.desired_state, own_tags
                );
            }
        }
    }

    let checks = plan.selected_checks(&filter);
    if !plan.checks.is_empty() {
        println!("\n[checks]");
        for check in &plan.checks {
            let marker = if checks.iter().any(|c| c.name == check.name) { "*" } else { " " };
            println!("  {} {}", marker, check.name);
        }
    }

    println!(
        "\n{} of {} assertion(s) selected, {} of {} check(s)",
        selected_total,
        plan.assertion_count(),
        checks.len(),
        plan.checks.len()
    );
    Ok(())
}

/// Validate the plan against the module registry
pub fn cmd_plan_validate(plan_args: &PlanArgs) -> Result<()> {
    let plan = open_plan(plan_args)?;
    let registry = ModuleRegistry::with_builtins();
    registry.validate_plan(&plan)?;
    // Missing tools are reported, not fatal
    let runner = SystemRunner::new();
    for (tool, needed_by) in registry.required_tools(&plan, &TagFilter::all())? {
        if runner.locate(&tool).is_none() {
            println!("[INFO] {} needs '{}', which is not on PATH", needed_by, tool);
        }
    }

    println!(
        "[PASS] {}: {} group(s), {} assertion(s), {} check(s)",
        plan_args.plan,
        plan.groups.len(),
        plan.assertion_count(),
        plan.checks.len()
    );
    Ok(())
}

fn join<'a>(items: impl Iterator<Item = &'a String>) -> String {
    items.map(String::as_str).collect::<Vec<_>>().join(",")
}
