// src/cli/plan.rs
//! Plan inspection commands

use super::{PlanArgs, TagArgs};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum PlanCommands {
    /// List groups and assertions, marking what the tags select
    List {
        #[command(flatten)]
        plan: PlanArgs,

        #[command(flatten)]
        tags: TagArgs,
    },

    /// Load the plan and validate every assertion without touching the system
    Validate {
        #[command(flatten)]
        plan: PlanArgs,
    },
}
