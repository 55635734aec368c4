// src/cli/mod.rs
//! CLI definitions for converge
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `run` - Converge the system towards the plan (or `--check` it)
//! - `verify` - Independently verify the system against the plan
//! - `plan` - Inspect and validate plan files
//! - `init` - Write a starter workstation plan
//! - `completions` - Generate shell completion scripts

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

mod plan;

pub use plan::PlanCommands;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Converge Contributors")]
#[command(version)]
#[command(
    about = "Declarative workstation convergence with independent verification",
    long_about = None
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Result output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `[PASS]`/`[FAIL]`/`[INFO]` lines and a recap
    #[default]
    Text,
    /// One JSON summary document
    Json,
}

/// Plan location and variable overrides
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    /// Path to the plan file
    #[arg(short, long, default_value = converge::DEFAULT_PLAN_PATH)]
    pub plan: String,

    /// Override a plan variable (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

/// Tag selection shared by run, verify, and plan list
#[derive(Args, Debug, Clone, Default)]
pub struct TagArgs {
    /// Only assertions with one of these tags (comma-separated)
    #[arg(short, long, value_name = "TAGS")]
    pub tags: Option<String>,

    /// Exclude assertions with any of these tags (comma-separated)
    #[arg(long, value_name = "TAGS")]
    pub skip_tags: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Converge the system towards the plan
    ///
    /// Groups run in plan order. A failed assertion stops the rest of its
    /// group; later groups still run. Nothing is rolled back.
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        #[command(flatten)]
        tags: TagArgs,

        /// Only check; report what would change without applying
        #[arg(long, visible_alias = "dry-run")]
        check: bool,

        /// Target root directory
        #[arg(short, long, default_value = "/")]
        root: String,

        /// Default per-assertion timeout (e.g. 30s, 10m)
        #[arg(long)]
        timeout: Option<String>,

        /// Advisory lock file for mutating runs
        #[arg(long)]
        lock: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Run the verification harness after converging
        #[arg(long)]
        verify: bool,
    },

    /// Verify the system against the plan without changing anything
    ///
    /// Exits 0 when everything passed, 1 on any failure. With --strict,
    /// indeterminate results (e.g. GUI checks without a display) exit 2.
    Verify {
        #[command(flatten)]
        plan: PlanArgs,

        #[command(flatten)]
        tags: TagArgs,

        /// Target root directory
        #[arg(short, long, default_value = "/")]
        root: String,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Treat indeterminate results as exit code 2
        #[arg(long)]
        strict: bool,
    },

    /// Plan inspection
    #[command(subcommand)]
    Plan(PlanCommands),

    /// Write a starter workstation plan
    Init {
        /// Where to write the plan
        #[arg(short, long, default_value = converge::DEFAULT_PLAN_PATH)]
        output: String,

        /// User to add to device and docker groups (default: $SUDO_USER or $USER)
        #[arg(short, long)]
        user: Option<String>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
