// src/commands/init.rs

//! Scaffolding and shell completion commands

use crate::cli::Cli;
use anyhow::{Context, Result, bail};
use clap::CommandFactory;
use clap_complete::Shell;
use converge::scaffold::workstation_plan;
use std::fs;
use std::path::Path;
use tracing::info;

/// Write the starter workstation plan
pub fn cmd_init(output: &str, user: Option<&str>, force: bool) -> Result<()> {
    let path = Path::new(output);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let user = match user {
        Some(user) => user.to_string(),
        None => std::env::var("SUDO_USER")
            .ok()
            .filter(|u| !u.is_empty() && u != "root")
            .or_else(|| std::env::var("USER").ok())
            .context("Cannot determine the target user; pass --user")?,
    };

    let content = workstation_plan(&user)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote workstation plan for user '{}' to {}", user, path.display());

    println!("Created {}", path.display());
    println!("Next steps:");
    println!("  converge plan validate --plan {}", path.display());
    println!("  sudo converge run --plan {} --check", path.display());
    Ok(())
}

/// Print a completion script for `shell` to stdout
pub fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "converge", &mut std::io::stdout());
    Ok(())
}
