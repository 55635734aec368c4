// src/module/package.rs

//! Debian package assertions
//!
//! Installed state is read with `dpkg-query`; changes go through
//! `apt-get` with a non-interactive frontend. For a target root other than
//! `/`, dpkg reads the target's database and apt runs inside a chroot.

use super::{CurrentState, ModuleContext, StateModule};
use crate::engine::Outcome;
use crate::error::{Error, Result};
use crate::plan::{DesiredState, StateAssertion};
use crate::runner::CommandSpec;
use tracing::{debug, info};

/// What dpkg reports for a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PackageStatus {
    pub installed: bool,
    pub version: Option<String>,
}

/// Query dpkg for a package's install status.
///
/// Exit code 1 means dpkg has never heard of the package.
pub(crate) fn query_status(ctx: &ModuleContext<'_>, name: &str) -> Result<PackageStatus> {
    let mut spec = CommandSpec::new("dpkg-query");
    if !ctx.is_live_root() {
        spec = spec.arg(format!("--root={}", ctx.root.display()));
    }
    let output = ctx.run(spec.args(["-W", "-f=${Status}|${Version}", name]))?;

    match output.code {
        Some(0) => Ok(parse_status(&output.stdout)),
        Some(1) => Ok(PackageStatus {
            installed: false,
            version: None,
        }),
        code => Err(Error::CheckFailure(format!(
            "dpkg-query for '{}' exited with {:?}: {}",
            name,
            code,
            output.stderr.trim()
        ))),
    }
}

/// Parse `install ok installed|2.43.0-1` style output
pub(crate) fn parse_status(stdout: &str) -> PackageStatus {
    let line = stdout.lines().next().unwrap_or("").trim();
    let (status, version) = line.split_once('|').unwrap_or((line, ""));
    let installed = status.split_whitespace().nth(2) == Some("installed");

    PackageStatus {
        installed,
        version: (installed && !version.is_empty()).then(|| version.to_string()),
    }
}

/// `version` matches exactly or as an upstream-version prefix
fn version_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || installed
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with(['-', '+', '~']))
}

pub(crate) fn apt_get(ctx: &ModuleContext<'_>) -> CommandSpec {
    ctx.in_root("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
}

/// `package` kind
#[derive(Debug, Default, Clone, Copy)]
pub struct PackageModule;

impl StateModule for PackageModule {
    fn kind(&self) -> &'static str {
        "package"
    }

    fn validate(&self, assertion: &StateAssertion) -> Result<()> {
        let name = assertion.require_str("name")?;
        if name.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!("Invalid package name '{}'", name)));
        }
        if assertion.parameters.contains_key("version") {
            assertion.require_str("version")?;
            if assertion.desired_state == DesiredState::Absent {
                return Err(Error::Config(
                    "'version' cannot be combined with state 'absent'".to_string(),
                ));
            }
        }
        assertion.param_bool("update_cache", false)?;
        Ok(())
    }

    fn required_tools(&self, _assertion: &StateAssertion) -> Vec<String> {
        vec!["dpkg-query".to_string(), "apt-get".to_string()]
    }

    fn check(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<CurrentState> {
        let name = assertion.require_str("name")?;
        let status = query_status(ctx, name)?;

        Ok(match assertion.desired_state {
            DesiredState::Absent => CurrentState::from_match(
                !status.installed,
                format!("{} {} is installed", name, status.version.unwrap_or_default()),
            ),
            _ => match (status.version, assertion.param_str("version")) {
                (None, _) => CurrentState::drifted(format!("{} is not installed", name)),
                (Some(installed), Some(wanted)) => CurrentState::from_match(
                    version_matches(&installed, wanted),
                    format!("{} {} installed, want {}", name, installed, wanted),
                ),
                (Some(_), None) => CurrentState::Satisfied,
            },
        })
    }

    fn apply(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<Outcome> {
        let name = assertion.require_str("name")?;

        if let Some(source) = assertion.param_str("from") {
            debug!("{} is expected to come from repository '{}'", name, source);
        }

        match assertion.desired_state {
            DesiredState::Absent => {
                ctx.run_checked(apt_get(ctx).args(["remove", "-y", "-q", name]))?;
                info!("Removed package {}", name);
                Ok(Outcome::changed(&assertion.identifier, format!("removed {}", name)))
            }
            _ => {
                if assertion.param_bool("update_cache", false)? {
                    ctx.run_checked(apt_get(ctx).args(["update", "-q"]))?;
                }

                let target = match assertion.param_str("version") {
                    Some(version) => format!("{}={}", name, version),
                    None => name.to_string(),
                };
                ctx.run_checked(apt_get(ctx).args(["install", "-y", "-q", &target]))?;
                info!("Installed package {}", target);
                Ok(Outcome::changed(&assertion.identifier, format!("installed {}", target)))
            }
        }
    }
}
