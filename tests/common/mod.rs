// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! `FakeSystem` is an in-memory machine. The fake modules converge it and
//! `FakeProbe` verifies it, so engine and harness can be exercised end to
//! end without touching the host.

#![allow(dead_code)]

use converge::engine::Outcome;
use converge::module::{CurrentState, ModuleContext, ModuleRegistry, StateModule};
use converge::plan::{DesiredState, StateAssertion, Vars, parse_plan};
use converge::runner::{CommandOutput, CommandRunner, CommandSpec};
use converge::verify::{FileFacts, SystemProbe, UnitFacts};
use converge::{Error, Plan, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MachineState {
    packages: BTreeMap<String, String>,
    repositories: BTreeSet<String>,
    unreachable: BTreeSet<String>,
    applied: Vec<String>,
}

/// Shared in-memory machine
#[derive(Clone, Default)]
pub struct FakeSystem {
    state: Arc<Mutex<MachineState>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, name: &str, version: &str) {
        let mut state = self.state.lock().unwrap();
        state.packages.insert(name.to_string(), version.to_string());
    }

    pub fn version_of(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().packages.get(name).cloned()
    }

    /// Make fetching this repository's key fail
    pub fn mark_unreachable(&self, repository: &str) {
        let mut state = self.state.lock().unwrap();
        state.unreachable.insert(repository.to_string());
    }

    pub fn has_repository(&self, name: &str) -> bool {
        self.state.lock().unwrap().repositories.contains(name)
    }

    /// Identifiers of assertions whose `apply` ran, in order
    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    fn record_apply(&self, identifier: &str) {
        let mut state = self.state.lock().unwrap();
        state.applied.push(identifier.to_string());
    }
}

/// `package` kind backed by `FakeSystem`
pub struct FakePackageModule {
    pub system: FakeSystem,
}

impl StateModule for FakePackageModule {
    fn kind(&self) -> &'static str {
        "package"
    }

    fn validate(&self, assertion: &StateAssertion) -> Result<()> {
        assertion.require_str("name").map(|_| ())
    }

    fn check(&self, assertion: &StateAssertion, _ctx: &ModuleContext<'_>) -> Result<CurrentState> {
        let name = assertion.require_str("name")?;
        let installed = self.system.version_of(name).is_some();
        let wanted = assertion.desired_state == DesiredState::Present;
        Ok(CurrentState::from_match(
            installed == wanted,
            if installed { "installed" } else { "not installed" },
        ))
    }

    fn apply(&self, assertion: &StateAssertion, _ctx: &ModuleContext<'_>) -> Result<Outcome> {
        let name = assertion.require_str("name")?;
        self.system.record_apply(&assertion.identifier);

        if let Some(repository) = assertion.param_str("from") {
            if !self.system.has_repository(repository) {
                return Err(Error::ApplyFailure(format!(
                    "{} is not available without repository {}",
                    name, repository
                )));
            }
        }

        let mut state = self.system.state.lock().unwrap();
        match assertion.desired_state {
            DesiredState::Absent => {
                state.packages.remove(name);
                Ok(Outcome::changed(&assertion.identifier, format!("removed {}", name)))
            }
            _ => {
                state.packages.insert(name.to_string(), "1.0".to_string());
                Ok(Outcome::changed(&assertion.identifier, format!("installed {}", name)))
            }
        }
    }
}

/// `repository` kind backed by `FakeSystem`
pub struct FakeRepositoryModule {
    pub system: FakeSystem,
}

impl StateModule for FakeRepositoryModule {
    fn kind(&self) -> &'static str {
        "repository"
    }

    fn validate(&self, assertion: &StateAssertion) -> Result<()> {
        assertion.require_str("name").map(|_| ())
    }

    fn check(&self, assertion: &StateAssertion, _ctx: &ModuleContext<'_>) -> Result<CurrentState> {
        let name = assertion.require_str("name")?;
        Ok(CurrentState::from_match(self.system.has_repository(name), "not configured"))
    }

    fn apply(&self, assertion: &StateAssertion, _ctx: &ModuleContext<'_>) -> Result<Outcome> {
        let name = assertion.require_str("name")?;
        self.system.record_apply(&assertion.identifier);

        let mut state = self.system.state.lock().unwrap();
        if state.unreachable.contains(name) {
            return Err(Error::DownloadError(format!("signing key for {} unreachable", name)));
        }
        state.repositories.insert(name.to_string());
        Ok(Outcome::changed(&assertion.identifier, format!("added {}", name)))
    }
}

/// Registry holding only the fake modules
pub fn fake_registry(system: &FakeSystem) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register_module(FakePackageModule {
        system: system.clone(),
    });
    registry.register_module(FakeRepositoryModule {
        system: system.clone(),
    });
    registry
}

/// Runner that never spawns anything; every tool is "installed" unless
/// listed as missing
#[derive(Default)]
pub struct FakeRunner {
    missing: BTreeSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.display());
        Ok(CommandOutput::ok(""))
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        (!self.missing.contains(program)).then(|| PathBuf::from("/usr/bin").join(program))
    }
}

/// Read-only view of `FakeSystem` for the harness
pub struct FakeProbe {
    pub system: FakeSystem,
    pub display: bool,
    pub commands: BTreeMap<String, CommandOutput>,
}

impl FakeProbe {
    pub fn new(system: &FakeSystem) -> Self {
        Self {
            system: system.clone(),
            display: false,
            commands: BTreeMap::new(),
        }
    }

    /// Scripted output for a command line
    pub fn with_command(mut self, command_line: &str, output: CommandOutput) -> Self {
        self.commands.insert(command_line.to_string(), output);
        self
    }
}

impl SystemProbe for FakeProbe {
    fn package_version(&self, name: &str) -> Result<Option<String>> {
        Ok(self.system.version_of(name))
    }

    fn unit(&self, unit: &str) -> Result<UnitFacts> {
        Err(Error::CheckFailure(format!("no service manager for {}", unit)))
    }

    fn group_members(&self, _group: &str) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    fn file(&self, _path: &Path) -> Result<Option<FileFacts>> {
        Ok(None)
    }

    fn read_to_string(&self, _path: &Path) -> Result<Option<String>> {
        Ok(None)
    }

    fn command(&self, argv: &[String], _timeout: Option<Duration>) -> Result<CommandOutput> {
        let line = argv.join(" ");
        self.commands
            .get(&line)
            .cloned()
            .ok_or_else(|| Error::IoError(format!("Failed to spawn '{}'", line)))
    }

    fn has_display(&self) -> bool {
        self.display
    }
}

/// Parse plan TOML with no variable overrides
pub fn plan(toml: &str) -> Plan {
    parse_plan(toml, &Vars::new()).unwrap()
}
