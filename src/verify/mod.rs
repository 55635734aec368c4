// src/verify/mod.rs

//! Verification harness
//!
//! Re-derives the expected state from the same plan the engine uses and
//! probes the system through `SystemProbe`, never through the state
//! modules. Nothing here mutates the system; verifying twice against a
//! stable system yields the same results.
//!
//! A probe that cannot decide (no systemd, no graphical session, a kind
//! with no independent probe) yields `Verdict::Indeterminate` rather than
//! a guess.

mod probe;

pub use probe::{FileFacts, LiveProbe, PathKind, SystemProbe, UnitFacts};

use crate::error::{Error, Result};
use crate::observer::{RunEvent, RunObserver, SilentObserver};
use crate::plan::{CheckProbe, CheckSpec, DesiredState, Plan, StateAssertion, TagFilter};
use crate::runner::{is_privileged, run_as};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use strum_macros::{AsRefStr, Display};
use tracing::debug;

static SILENT: SilentObserver = SilentObserver;

/// Outcome of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Verdict {
    Passed,
    Failed,
    Indeterminate,
}

/// Read-only counterpart of an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub check_name: String,
    pub verdict: Verdict,
    pub detail: String,
}

impl VerificationResult {
    pub fn pass(check_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(check_name, Verdict::Passed, detail)
    }

    pub fn fail(check_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(check_name, Verdict::Failed, detail)
    }

    pub fn indeterminate(check_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(check_name, Verdict::Indeterminate, detail)
    }

    fn new(check_name: impl Into<String>, verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            verdict,
            detail: detail.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    pub fn is_failure(&self) -> bool {
        self.verdict == Verdict::Failed
    }

    pub fn is_indeterminate(&self) -> bool {
        self.verdict == Verdict::Indeterminate
    }
}

/// Intermediate verdict before the check name is attached
enum Probed {
    Pass(String),
    Fail(String),
    Unknown(String),
}

impl Probed {
    fn expect(ok: bool, pass: String, fail: String) -> Self {
        if ok { Self::Pass(pass) } else { Self::Fail(fail) }
    }

    fn named(self, check_name: String) -> VerificationResult {
        match self {
            Self::Pass(detail) => VerificationResult::pass(check_name, detail),
            Self::Fail(detail) => VerificationResult::fail(check_name, detail),
            Self::Unknown(detail) => VerificationResult::indeterminate(check_name, detail),
        }
    }
}

/// Probes the system against a plan
pub struct Harness<'a> {
    probe: &'a dyn SystemProbe,
    observer: &'a dyn RunObserver,
    /// Whether per-user commands can switch to their owner
    privileged: bool,
}

impl<'a> Harness<'a> {
    pub fn new(probe: &'a dyn SystemProbe) -> Self {
        Self {
            probe,
            observer: &SILENT,
            privileged: is_privileged(),
        }
    }

    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn RunObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Verify every selected assertion, then every selected plan check,
    /// in plan order
    pub fn verify(&self, plan: &Plan, filter: &TagFilter) -> Vec<VerificationResult> {
        let mut results = Vec::new();

        for group in &plan.groups {
            for assertion in group.selected(filter) {
                let timeout = assertion.timeout.or(plan.settings.timeout);
                let result = self
                    .verify_assertion(assertion, timeout)
                    .unwrap_or_else(|e| Probed::Unknown(e.to_string()))
                    .named(assertion.label(&group.name));
                self.record(result, &mut results);
            }
        }

        for check in plan.selected_checks(filter) {
            let result = self.verify_check(check, plan.settings.timeout);
            self.record(result, &mut results);
        }

        debug!(
            "Verified {} item(s), {} passed",
            results.len(),
            results.iter().filter(|r| r.passed()).count()
        );
        results
    }

    fn record(&self, result: VerificationResult, results: &mut Vec<VerificationResult>) {
        self.observer.notify(&RunEvent::Verified(result.clone()));
        results.push(result);
    }

    fn verify_assertion(
        &self,
        assertion: &StateAssertion,
        timeout: Option<Duration>,
    ) -> Result<Probed> {
        match assertion.kind.as_str() {
            "package" => self.verify_package(assertion),
            "service" => self.verify_service(assertion),
            "file" => self.verify_file(assertion),
            "group-member" => self.verify_group_member(assertion),
            "repository" => self.verify_repository(assertion),
            "extension" => self.verify_extension(assertion, timeout),
            other => Ok(Probed::Unknown(format!("no independent probe for kind '{}'", other))),
        }
    }

    fn verify_package(&self, assertion: &StateAssertion) -> Result<Probed> {
        let name = assertion.require_str("name")?;
        let version = self.probe.package_version(name)?;

        Ok(match (assertion.desired_state, version) {
            (DesiredState::Absent, None) => Probed::Pass(format!("{} not installed", name)),
            (DesiredState::Absent, Some(v)) => {
                Probed::Fail(format!("expected absent, observed {} {}", name, v))
            }
            (_, None) => {
                Probed::Fail(format!("expected {} installed, observed not installed", name))
            }
            (_, Some(v)) => match assertion.param_str("version") {
                Some(wanted) => {
                    let upstream = v.split(['-', '+', '~']).next().unwrap_or(&v);
                    Probed::expect(
                        v == wanted || upstream == wanted,
                        format!("{} {} installed", name, v),
                        format!("expected {} {}, observed {}", name, wanted, v),
                    )
                }
                None => Probed::Pass(format!("{} {} installed", name, v)),
            },
        })
    }

    fn verify_service(&self, assertion: &StateAssertion) -> Result<Probed> {
        let unit = assertion
            .param_str("unit")
            .map_or_else(|| assertion.require_str("name"), Ok)?;
        let facts = self.probe.unit(unit)?;
        let observed = format!(
            "{} is {}/{}",
            unit,
            or_unknown(&facts.unit_file_state),
            or_unknown(&facts.active_state),
        );

        Ok(match assertion.desired_state {
            DesiredState::Disabled => Probed::expect(
                !facts.exists() || (!facts.enabled() && !facts.running()),
                format!("{} disabled and stopped", unit),
                format!("expected disabled, observed {}", observed),
            ),
            _ if !facts.exists() => {
                Probed::Fail(format!("expected enabled, unit {} not found", unit))
            }
            _ => Probed::expect(
                facts.enabled() && facts.running(),
                format!("{} enabled and running", unit),
                format!("expected enabled and running, observed {}", observed),
            ),
        })
    }

    fn verify_file(&self, assertion: &StateAssertion) -> Result<Probed> {
        let path = assertion.require_str("path")?;
        let facts = self.probe.file(Path::new(path))?;

        if assertion.desired_state == DesiredState::Absent {
            return Ok(Probed::expect(
                facts.is_none(),
                format!("{} absent", path),
                format!("expected {} absent, observed present", path),
            ));
        }

        let Some(facts) = facts else {
            return Ok(Probed::Fail(format!("expected {} present, observed missing", path)));
        };

        let wanted = match (assertion.param_str("content"), assertion.param_str("source")) {
            (Some(content), _) => content.as_bytes().to_vec(),
            (None, Some(source)) => std::fs::read(source)?,
            (None, None) => return Ok(Probed::Unknown(format!("no content declared for {}", path))),
        };
        let wanted_digest = hex::encode(Sha256::digest(&wanted));

        if facts.sha256.as_deref() != Some(wanted_digest.as_str()) {
            return Ok(Probed::Fail(format!(
                "{} content differs (sha256 {}, expected {})",
                path,
                facts.sha256.as_deref().unwrap_or("n/a"),
                wanted_digest
            )));
        }

        if let Some(wanted_mode) = assertion.param_mode("mode")? {
            if facts.mode != wanted_mode {
                return Ok(Probed::Fail(format!(
                    "{} mode {:04o}, expected {:04o}",
                    path, facts.mode, wanted_mode
                )));
            }
        }

        Ok(Probed::Pass(format!("{} matches", path)))
    }

    fn verify_group_member(&self, assertion: &StateAssertion) -> Result<Probed> {
        let user = assertion.require_str("user")?;
        let group = assertion.require_str("group")?;
        let members = self.probe.group_members(group)?;
        let is_member = members.as_ref().is_some_and(|m| m.iter().any(|u| u == user));

        Ok(match (assertion.desired_state, members.is_some()) {
            (DesiredState::Absent, _) => Probed::expect(
                !is_member,
                format!("{} not in {}", user, group),
                format!("expected {} not in {}, observed member", user, group),
            ),
            (_, false) => {
                Probed::Fail(format!("expected {} in {}, group does not exist", user, group))
            }
            (_, true) => Probed::expect(
                is_member,
                format!("{} in {}", user, group),
                format!("expected {} in {}, observed not a member", user, group),
            ),
        })
    }

    fn verify_repository(&self, assertion: &StateAssertion) -> Result<Probed> {
        let name = assertion.require_str("name")?;
        let list = format!("/etc/apt/sources.list.d/{}.list", name);
        let content = self.probe.read_to_string(Path::new(&list))?;

        if assertion.desired_state == DesiredState::Absent {
            return Ok(Probed::expect(
                content.is_none(),
                format!("{} absent", list),
                format!("expected {} absent, observed present", list),
            ));
        }

        let Some(content) = content else {
            return Ok(Probed::Fail(format!("expected {} present, observed missing", list)));
        };

        let uri = assertion.require_str("uri")?;
        let suite = assertion.require_str("suite")?;
        let declared = content
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("deb "))
            .any(|l| {
                let words: Vec<&str> = l.split_whitespace().collect();
                words.contains(&uri) && words.contains(&suite)
            });
        if !declared {
            return Ok(Probed::Fail(format!("{} does not declare {} {}", list, uri, suite)));
        }

        let keyring = match (assertion.param_str("keyring"), assertion.param_str("key_url")) {
            (Some(keyring), _) => Some(keyring.to_string()),
            (None, Some(_)) => Some(format!("/etc/apt/keyrings/{}.gpg", name)),
            (None, None) => None,
        };
        if let Some(keyring) = keyring {
            if self.probe.file(Path::new(&keyring))?.is_none() {
                return Ok(Probed::Fail(format!("keyring {} missing", keyring)));
            }
        }

        Ok(Probed::Pass(format!("{} declares {} {}", list, uri, suite)))
    }

    fn verify_extension(
        &self,
        assertion: &StateAssertion,
        timeout: Option<Duration>,
    ) -> Result<Probed> {
        let id = assertion.require_str("name")?;
        let mut argv = vec![assertion.param_str("cli").unwrap_or("code").to_string()];
        argv.extend(assertion.param_list("args")?);
        argv.push("--list-extensions".to_string());
        let argv = run_as(assertion.param_str("user"), argv, self.privileged);

        let output = self.probe.command(&argv, timeout)?;
        if !output.success() {
            return Ok(Probed::Unknown(format!(
                "{} failed: {}",
                argv.join(" "),
                output.stderr.trim()
            )));
        }

        let installed = output
            .stdout
            .lines()
            .filter_map(|l| l.trim().split('@').next())
            .any(|l| l.eq_ignore_ascii_case(id));
        Ok(match assertion.desired_state {
            DesiredState::Absent => Probed::expect(
                !installed,
                format!("{} not installed", id),
                format!("expected {} absent, observed installed", id),
            ),
            _ => Probed::expect(
                installed,
                format!("{} installed", id),
                format!("expected {} installed, observed missing", id),
            ),
        })
    }

    /// Run one plan-level check
    pub fn verify_check(
        &self,
        check: &CheckSpec,
        default_timeout: Option<Duration>,
    ) -> VerificationResult {
        let name = format!("check/{}", check.name);

        if check.requires_display && !self.probe.has_display() {
            return VerificationResult::indeterminate(
                name,
                "requires a graphical session (DISPLAY/WAYLAND_DISPLAY unset)",
            );
        }

        let probed = match &check.probe {
            CheckProbe::Socket { path } => self.probe.file(path).map(|facts| match facts {
                Some(f) if f.kind == PathKind::Socket => {
                    Probed::Pass(format!("{} is a socket", path.display()))
                }
                Some(_) => Probed::Fail(format!("{} exists but is not a socket", path.display())),
                None => Probed::Fail(format!("{} missing", path.display())),
            }),
            CheckProbe::Path { path } => self.probe.file(path).map(|facts| {
                Probed::expect(
                    facts.is_some(),
                    format!("{} exists", path.display()),
                    format!("{} missing", path.display()),
                )
            }),
            CheckProbe::Command { argv, expect } => {
                self.run_command_check(argv, expect.as_deref(), check.timeout.or(default_timeout))
            }
        };

        probed.unwrap_or_else(|e| Probed::Unknown(e.to_string())).named(name)
    }

    fn run_command_check(
        &self,
        argv: &[String],
        expect: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Probed> {
        let output = match self.probe.command(argv, timeout) {
            Ok(output) => output,
            // A missing or hung tool is a real failure, not an unknown
            Err(e @ (Error::IoError(_) | Error::Timeout { .. })) => {
                return Ok(Probed::Fail(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        let command = argv.join(" ");
        if !output.success() {
            return Ok(Probed::Fail(format!(
                "'{}' exited with {:?}: {}",
                command,
                output.code,
                output.stderr.trim()
            )));
        }

        let first_line = output.stdout.lines().next().unwrap_or("").trim().to_string();
        let Some(pattern) = expect else {
            return Ok(Probed::Pass(first_line));
        };

        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid expect pattern: {}", e)))?;
        let combined = format!("{}{}", output.stdout, output.stderr);
        Ok(Probed::expect(
            regex.is_match(&combined),
            first_line,
            format!("output of '{}' does not match /{}/", command, pattern),
        ))
    }
}

fn or_unknown(state: &str) -> &str {
    if state.is_empty() { "unknown" } else { state }
}
