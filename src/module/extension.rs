// src/module/extension.rs

//! Editor extension assertions
//!
//! Works with any editor CLI that speaks the VS Code extension flags
//! (`--list-extensions`, `--install-extension`, `--uninstall-extension`).
//! Extensions live in a per-user profile; with `user` set the CLI runs as
//! that user through `runuser` when converge itself runs as root.

use super::{CurrentState, ModuleContext, StateModule};
use crate::engine::Outcome;
use crate::error::{Error, Result};
use crate::plan::{DesiredState, StateAssertion};
use crate::runner::{CommandSpec, is_privileged, run_as};
use tracing::info;

const DEFAULT_CLI: &str = "code";

fn cli(assertion: &StateAssertion) -> &str {
    assertion.param_str("cli").unwrap_or(DEFAULT_CLI)
}

/// CLI plus any extra arguments (e.g. `--user-data-dir`), switched to
/// the profile owner when one is named
fn base_argv(assertion: &StateAssertion, privileged: bool) -> Result<Vec<String>> {
    let mut argv = vec![cli(assertion).to_string()];
    argv.extend(assertion.param_list("args")?);
    Ok(run_as(assertion.param_str("user"), argv, privileged))
}

fn base_command(assertion: &StateAssertion) -> Result<CommandSpec> {
    CommandSpec::from_argv(&base_argv(assertion, is_privileged())?)
}

/// Extension ids are case-insensitive
pub(crate) fn is_listed(listing: &str, id: &str) -> bool {
    listing
        .lines()
        .map(|l| l.trim().split('@').next().unwrap_or(""))
        .any(|l| l.eq_ignore_ascii_case(id))
}

/// `extension` kind
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionModule;

impl StateModule for ExtensionModule {
    fn kind(&self) -> &'static str {
        "extension"
    }

    fn validate(&self, assertion: &StateAssertion) -> Result<()> {
        let id = assertion.require_str("name")?;
        let valid = id
            .split_once('.')
            .is_some_and(|(publisher, name)| !publisher.is_empty() && !name.is_empty());
        if !valid || id.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "Extension id '{}' must look like 'publisher.name'",
                id
            )));
        }
        if assertion.parameters.contains_key("cli") {
            assertion.require_str("cli")?;
        }
        if assertion.parameters.contains_key("user") {
            let user = assertion.require_str("user")?;
            if user.starts_with('-') || user.chars().any(|c| c.is_whitespace() || c == ':') {
                return Err(Error::Config(format!("Invalid user name '{}'", user)));
            }
        }
        assertion.param_list("args")?;
        Ok(())
    }

    fn required_tools(&self, assertion: &StateAssertion) -> Vec<String> {
        let mut tools = vec![cli(assertion).to_string()];
        if assertion.param_str("user").is_some() {
            tools.push("runuser".to_string());
        }
        tools
    }

    fn check(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<CurrentState> {
        let id = assertion.require_str("name")?;
        let output = ctx.run(base_command(assertion)?.arg("--list-extensions"))?;
        if !output.success() {
            return Err(Error::CheckFailure(format!(
                "{} --list-extensions failed: {}",
                cli(assertion),
                output.stderr.trim()
            )));
        }

        let installed = is_listed(&output.stdout, id);
        Ok(match assertion.desired_state {
            DesiredState::Absent => {
                CurrentState::from_match(!installed, format!("{} is installed", id))
            }
            _ => CurrentState::from_match(installed, format!("{} is not installed", id)),
        })
    }

    fn apply(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<Outcome> {
        let id = assertion.require_str("name")?;
        let (spec, done) = match assertion.desired_state {
            DesiredState::Absent => (
                base_command(assertion)?.args(["--uninstall-extension", id]),
                "uninstalled",
            ),
            _ => (
                base_command(assertion)?.args(["--install-extension", id, "--force"]),
                "installed",
            ),
        };
        ctx.run_checked(spec)?;

        info!("Extension {} {}", id, done);
        Ok(Outcome::changed(&assertion.identifier, format!("{} extension {}", done, id)))
    }
}
