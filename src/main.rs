// src/main.rs

use clap::Parser;
use converge::report::{EXIT_FAILURE, EXIT_OK};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands, PlanCommands};

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Run {
            plan,
            tags,
            check,
            root,
            timeout,
            lock,
            format,
            verify,
        } => commands::cmd_run(
            &plan,
            &tags,
            check,
            &root,
            timeout.as_deref(),
            lock.as_deref(),
            format,
            verify,
        ),

        Commands::Verify {
            plan,
            tags,
            root,
            format,
            strict,
        } => commands::cmd_verify(&plan, &tags, &root, format, strict),

        Commands::Plan(plan_cmd) => {
            match plan_cmd {
                PlanCommands::List { plan, tags } => commands::cmd_plan_list(&plan, &tags)?,
                PlanCommands::Validate { plan } => commands::cmd_plan_validate(&plan)?,
            }
            Ok(EXIT_OK)
        }

        Commands::Init {
            output,
            user,
            force,
        } => {
            commands::cmd_init(&output, user.as_deref(), force)?;
            Ok(EXIT_OK)
        }

        Commands::Completions { shell } => {
            commands::cmd_completions(shell)?;
            Ok(EXIT_OK)
        }
    }
}
