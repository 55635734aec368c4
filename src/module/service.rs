// src/module/service.rs

//! systemd service assertions
//!
//! `enabled` means enabled at boot and currently active; `disabled` means
//! neither. Both are enforced with a single `systemctl ... --now` call.
//!
//! A target root other than `/` has no running service manager, so only
//! boot-time enablement is checked and changed there, via
//! `systemctl --root`.

use super::{CurrentState, ModuleContext, StateModule};
use crate::engine::Outcome;
use crate::error::{Error, Result};
use crate::plan::{DesiredState, StateAssertion};
use crate::runner::CommandSpec;
use tracing::{debug, info};

/// `systemctl is-enabled` answers that count as enabled
const ENABLED_STATES: &[&str] = &["enabled", "enabled-runtime", "static", "alias", "indirect"];

/// Messages systemctl prints when there is no running service manager
const NO_MANAGER_MARKERS: &[&str] = &[
    "System has not been booted with systemd",
    "Failed to connect to bus",
];

/// Unit name from `unit`, falling back to `name`
pub(crate) fn unit_name(assertion: &StateAssertion) -> Result<&str> {
    match assertion.param_str("unit") {
        Some(unit) if !unit.is_empty() => Ok(unit),
        _ => assertion.require_str("name"),
    }
}

/// Observed boot and runtime state of a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnitState {
    pub enabled: String,
    pub active: String,
}

impl UnitState {
    pub fn is_enabled(&self) -> bool {
        ENABLED_STATES.contains(&self.enabled.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.active == "active"
    }
}

fn systemctl(ctx: &ModuleContext<'_>) -> CommandSpec {
    let spec = CommandSpec::new("systemctl");
    if ctx.is_live_root() {
        spec
    } else {
        spec.arg(format!("--root={}", ctx.root.display()))
    }
}

/// `systemctl` exits non-zero for disabled or inactive units, so only
/// stdout matters unless no service manager is reachable.
fn query(ctx: &ModuleContext<'_>, unit: &str) -> Result<Option<UnitState>> {
    let enabled = ctx.run(systemctl(ctx).args(["is-enabled", unit]))?;
    if NO_MANAGER_MARKERS.iter().any(|m| enabled.stderr.contains(m)) {
        return Ok(None);
    }
    let active = if ctx.is_live_root() {
        ctx.run(systemctl(ctx).args(["is-active", unit]))?.stdout.trim().to_string()
    } else {
        "offline".to_string()
    };

    let enabled = enabled.stdout.trim();
    Ok(Some(UnitState {
        enabled: if enabled.is_empty() { "not-found" } else { enabled }.to_string(),
        active,
    }))
}

/// `service` kind
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceModule;

impl StateModule for ServiceModule {
    fn kind(&self) -> &'static str {
        "service"
    }

    fn supported_states(&self) -> &'static [DesiredState] {
        &[DesiredState::Enabled, DesiredState::Disabled]
    }

    fn validate(&self, assertion: &StateAssertion) -> Result<()> {
        let unit = unit_name(assertion)?;
        if unit.contains('/') || unit.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!("Invalid unit name '{}'", unit)));
        }
        assertion.param_bool("daemon_reload", false)?;
        Ok(())
    }

    fn required_tools(&self, _assertion: &StateAssertion) -> Vec<String> {
        vec!["systemctl".to_string()]
    }

    fn check(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<CurrentState> {
        let unit = unit_name(assertion)?;
        let Some(state) = query(ctx, unit)? else {
            return Ok(CurrentState::indeterminate("no running systemd instance"));
        };

        let observed = format!("{} is {} and {}", unit, state.enabled, state.active);
        if !ctx.is_live_root() {
            let want_enabled = assertion.desired_state != DesiredState::Disabled;
            return Ok(CurrentState::from_match(state.is_enabled() == want_enabled, observed));
        }
        Ok(match assertion.desired_state {
            DesiredState::Disabled => {
                CurrentState::from_match(!state.is_enabled() && !state.is_active(), observed)
            }
            _ => CurrentState::from_match(state.is_enabled() && state.is_active(), observed),
        })
    }

    fn apply(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<Outcome> {
        let unit = unit_name(assertion)?;

        if !ctx.is_live_root() {
            if assertion.param_bool("daemon_reload", false)? {
                debug!("Skipping daemon-reload for target root {}", ctx.root.display());
            }
            let (verb, done) = match assertion.desired_state {
                DesiredState::Disabled => ("disable", "disabled"),
                _ => ("enable", "enabled"),
            };
            ctx.run_checked(systemctl(ctx).args([verb, unit]))?;
            info!("Service {} {} in {}", unit, done, ctx.root.display());
            return Ok(Outcome::changed(
                &assertion.identifier,
                format!("{} {} in {}", unit, done, ctx.root.display()),
            ));
        }

        if assertion.param_bool("daemon_reload", false)? {
            ctx.run_checked(systemctl(ctx).arg("daemon-reload"))?;
        }

        let (verb, done) = match assertion.desired_state {
            DesiredState::Disabled => ("disable", "disabled and stopped"),
            _ => ("enable", "enabled and started"),
        };
        ctx.run_checked(systemctl(ctx).args([verb, "--now", unit]))?;

        info!("Service {} {}", unit, done);
        Ok(Outcome::changed(&assertion.identifier, format!("{} {}", unit, done)))
    }
}
