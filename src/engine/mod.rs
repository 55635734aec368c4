// src/engine/mod.rs

//! Convergence engine
//!
//! Walks the plan's groups in order and, for every selected assertion,
//! asks its module whether the system already matches. Drifted assertions
//! are applied (or, in check mode, reported as "would change").
//!
//! # Failure policy
//!
//! - The whole plan is validated, and required tools located, before any
//!   assertion runs. Those errors are returned as `Err`.
//! - A failed assertion stops the rest of its group; the remaining
//!   assertions are recorded as skipped. Later groups still run.
//! - Nothing is rolled back. Outcomes recorded before a failure stay.
//! - Cancellation is checked before each assertion, never mid-call.

mod cancel;
mod lock;
mod outcome;

pub use cancel::{CancelToken, cancel_on_signals};
pub use lock::{LockHolder, RunLock};
pub use outcome::{Outcome, RunReport, RunStatus, Skipped};

use crate::error::{Error, Result};
use crate::module::{CurrentState, ModuleContext, ModuleRegistry, StateModule};
use crate::observer::{RunEvent, RunObserver, SilentObserver};
use crate::plan::{Group, Plan, StateAssertion, TagFilter};
use crate::runner::CommandRunner;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

static SILENT: SilentObserver = SilentObserver;

/// Per-run knobs
#[derive(Debug, Clone, Default)]
pub struct ConvergeOptions {
    pub filter: TagFilter,
    /// Run `check` only; `changed` reports what would happen
    pub check_mode: bool,
    /// Fallback timeout when neither the assertion nor the plan sets one
    pub timeout: Option<Duration>,
    /// Advisory lock for mutating runs; `None` disables locking
    pub lock_path: Option<PathBuf>,
    pub cancel: CancelToken,
}

impl ConvergeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_lock(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Applies plans through the module registry
pub struct ConvergenceEngine<'a> {
    registry: &'a ModuleRegistry,
    runner: &'a dyn CommandRunner,
    root: PathBuf,
    observer: &'a dyn RunObserver,
}

impl<'a> ConvergenceEngine<'a> {
    pub fn new(registry: &'a ModuleRegistry, runner: &'a dyn CommandRunner) -> Self {
        Self {
            registry,
            runner,
            root: PathBuf::from("/"),
            observer: &SILENT,
        }
    }

    /// Target root for file-based modules
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn RunObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Locate every external tool the selected assertions need
    pub fn preflight(&self, plan: &Plan, filter: &TagFilter) -> Result<()> {
        for (tool, needed_by) in self.registry.required_tools(plan, filter)? {
            match self.runner.locate(&tool) {
                Some(path) => debug!("Found {} at {}", tool, path.display()),
                None => return Err(Error::ExternalToolMissing { tool, needed_by }),
            }
        }
        Ok(())
    }

    /// Converge the system towards the plan
    pub fn converge(&self, plan: &Plan, options: &ConvergeOptions) -> Result<RunReport> {
        self.registry.validate_plan(plan)?;
        self.preflight(plan, &options.filter)?;

        let _lock = match (&options.lock_path, options.check_mode) {
            (Some(path), false) => Some(RunLock::try_acquire(path)?),
            _ => None,
        };

        info!(
            "Converging plan '{}' ({} assertions{})",
            plan.name,
            plan.assertion_count(),
            if options.check_mode { ", check mode" } else { "" }
        );

        let started_at = Utc::now();
        let mut outcomes = Vec::new();
        let mut skipped = Vec::new();
        let mut cancelled = false;

        for group in &plan.groups {
            let selected = group.selected(&options.filter);
            if selected.is_empty() {
                debug!("Group '{}' has no selected assertions", group.name);
                continue;
            }

            if cancelled {
                self.skip_all(group, &selected, "run cancelled", &mut skipped);
                continue;
            }

            self.observer.notify(&RunEvent::GroupStarted {
                group: group.name.clone(),
                selected: selected.len(),
            });

            for (index, assertion) in selected.iter().enumerate() {
                if options.cancel.is_cancelled() {
                    warn!("Run cancelled before {}", assertion.label(&group.name));
                    cancelled = true;
                    self.skip_all(group, &selected[index..], "run cancelled", &mut skipped);
                    break;
                }

                let outcome = self.process(plan, group, assertion, options).in_group(&group.name);
                self.observer.notify(&RunEvent::Outcome(outcome.clone()));
                let failed = outcome.failed;
                outcomes.push(outcome);

                if failed {
                    let reason = format!("{} failed", assertion.label(&group.name));
                    self.skip_all(group, &selected[index + 1..], &reason, &mut skipped);
                    break;
                }
            }
        }

        let report = RunReport::new(outcomes, skipped, cancelled, options.check_mode, started_at);
        info!(
            "Run {}: {} ok, {} changed, {} failed, {} skipped",
            report.overall_status,
            report.ok_count(),
            report.changed_count(),
            report.failed_count(),
            report.skipped.len()
        );
        self.observer.notify(&RunEvent::RunFinished {
            status: report.overall_status,
        });
        Ok(report)
    }

    fn skip_all(
        &self,
        group: &Group,
        assertions: &[&StateAssertion],
        reason: &str,
        skipped: &mut Vec<Skipped>,
    ) {
        for assertion in assertions {
            let entry = Skipped {
                group: group.name.clone(),
                assertion_identifier: assertion.identifier.clone(),
                reason: reason.to_string(),
            };
            self.observer.notify(&RunEvent::Skipped(entry.clone()));
            skipped.push(entry);
        }
    }

    /// Check, then apply if needed. Errors become failed outcomes.
    fn process(
        &self,
        plan: &Plan,
        group: &Group,
        assertion: &StateAssertion,
        options: &ConvergeOptions,
    ) -> Outcome {
        let id = &assertion.identifier;
        let label = assertion.label(&group.name);

        let module = match self.registry.resolve(&assertion.kind) {
            Ok(module) => module,
            Err(e) => return Outcome::failed(id, e.to_string()),
        };

        let timeout = assertion
            .timeout
            .or(plan.settings.timeout)
            .or(options.timeout);
        let ctx = ModuleContext::new(self.runner, &self.root).with_timeout(timeout);

        debug!("Checking {}", label);
        let (observed, indeterminate) = match module.check(assertion, &ctx) {
            Ok(CurrentState::Satisfied) => {
                return Outcome::unchanged(id, "already in desired state");
            }
            Ok(CurrentState::Drifted { observed }) => (observed, false),
            Ok(CurrentState::Indeterminate { reason }) => {
                (format!("indeterminate: {}", reason), true)
            }
            Err(e @ Error::Timeout { .. }) => return Outcome::failed(id, format!("check: {}", e)),
            Err(e) => (format!("indeterminate: {}", e), true),
        };

        if options.check_mode {
            return if indeterminate {
                Outcome::indeterminate(id, observed)
            } else {
                Outcome::changed(id, format!("would change: {}", observed))
            };
        }

        info!("Applying {} ({})", label, observed);
        self.apply(module, assertion, &ctx, &observed)
    }

    fn apply(
        &self,
        module: &dyn StateModule,
        assertion: &StateAssertion,
        ctx: &ModuleContext<'_>,
        observed: &str,
    ) -> Outcome {
        let id = &assertion.identifier;
        match module.apply(assertion, ctx) {
            Ok(mut outcome) => {
                outcome.assertion_identifier = id.clone();
                outcome
            }
            Err(e) => Outcome::failed(
                id,
                format!("{}; wanted {}, observed: {}", e, assertion.desired_state, observed),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::CallbackObserver;
    use crate::plan::DesiredState;
    use crate::runner::CommandOutput;
    use crate::runner::mock::ScriptedRunner;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// In-memory module: a set of "present" names, optional failures
    #[derive(Default)]
    struct MemoryModule {
        present: Mutex<BTreeSet<String>>,
        fail_apply: BTreeSet<String>,
        unknown: BTreeSet<String>,
        applied: Mutex<Vec<String>>,
    }

    impl MemoryModule {
        fn failing(name: &str) -> Self {
            Self {
                fail_apply: [name.to_string()].into(),
                ..Default::default()
            }
        }
    }

    impl StateModule for MemoryModule {
        fn kind(&self) -> &'static str {
            "mem"
        }

        fn validate(&self, assertion: &StateAssertion) -> Result<()> {
            assertion.require_str("name").map(|_| ())
        }

        fn check(
            &self,
            assertion: &StateAssertion,
            _ctx: &ModuleContext<'_>,
        ) -> Result<CurrentState> {
            let name = assertion.require_str("name")?;
            if self.unknown.contains(name) {
                return Ok(CurrentState::indeterminate(format!("{} cannot be inspected", name)));
            }
            Ok(CurrentState::from_match(
                self.present.lock().unwrap().contains(name),
                format!("{} missing", name),
            ))
        }

        fn apply(&self, assertion: &StateAssertion, _ctx: &ModuleContext<'_>) -> Result<Outcome> {
            let name = assertion.require_str("name")?;
            self.applied.lock().unwrap().push(name.to_string());
            if self.fail_apply.contains(name) {
                return Err(Error::ApplyFailure(format!("cannot create {}", name)));
            }
            self.present.lock().unwrap().insert(name.to_string());
            Ok(Outcome::changed("", format!("created {}", name)))
        }
    }

    fn mem(name: &str) -> StateAssertion {
        StateAssertion::new("mem", format!("mem:{}", name), DesiredState::Present)
            .with_param("name", name)
    }

    fn registry_with(module: Arc<MemoryModule>) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register("mem", module);
        registry
    }

    #[test]
    fn test_converge_is_idempotent() {
        let module = Arc::new(MemoryModule::default());
        let registry = registry_with(module.clone());
        let runner = ScriptedRunner::new();
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p")
            .with_group(Group::new("g").with_assertion(mem("a")).with_assertion(mem("b")));

        let first = engine.converge(&plan, &ConvergeOptions::new()).unwrap();
        assert_eq!(first.changed_count(), 2);
        assert!(first.is_success());

        let second = engine.converge(&plan, &ConvergeOptions::new()).unwrap();
        assert_eq!(second.changed_count(), 0);
        assert_eq!(second.ok_count(), 2);
    }

    #[test]
    fn test_fail_fast_within_group_continues_across_groups() {
        let module = Arc::new(MemoryModule::failing("b"));
        let registry = registry_with(module.clone());
        let runner = ScriptedRunner::new();
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p")
            .with_group(
                Group::new("g1")
                    .with_assertion(mem("a"))
                    .with_assertion(mem("b"))
                    .with_assertion(mem("c")),
            )
            .with_group(Group::new("g2").with_assertion(mem("d")));

        let report = engine.converge(&plan, &ConvergeOptions::new()).unwrap();
        assert_eq!(report.overall_status, RunStatus::Failed);
        assert_eq!(*module.applied.lock().unwrap(), vec!["a", "b", "d"]);
        assert!(report.outcome_for("g1", "mem:b").unwrap().failed);
        assert!(report.outcome_for("g1", "mem:c").is_none());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].label(), "g1/mem:c");
        assert_eq!(report.skipped[0].reason, "g1/mem:b failed");
        assert!(report.outcome_for("g2", "mem:d").unwrap().changed);
    }

    #[test]
    fn test_failure_message_has_expected_and_observed() {
        let module = Arc::new(MemoryModule::failing("a"));
        let registry = registry_with(module);
        let runner = ScriptedRunner::new();
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p").with_group(Group::new("g").with_assertion(mem("a")));

        let report = engine.converge(&plan, &ConvergeOptions::new()).unwrap();
        let message = &report.outcomes[0].message;
        assert!(message.contains("cannot create a"));
        assert!(message.contains("wanted present, observed: a missing"));
    }

    #[test]
    fn test_check_mode_never_applies() {
        let module = Arc::new(MemoryModule::default());
        let registry = registry_with(module.clone());
        let runner = ScriptedRunner::new();
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p").with_group(Group::new("g").with_assertion(mem("a")));

        let report = engine.converge(&plan, &ConvergeOptions::new().check_mode(true)).unwrap();
        assert!(report.check_mode);
        assert!(report.outcomes[0].changed);
        assert_eq!(report.outcomes[0].message, "would change: a missing");
        assert!(module.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_check_mode_flags_indeterminate_state() {
        let module = Arc::new(MemoryModule {
            unknown: ["a".to_string()].into(),
            ..Default::default()
        });
        let registry = registry_with(module.clone());
        let runner = ScriptedRunner::new();
        let engine = ConvergenceEngine::new(&registry, &runner);
        // A drifted module message that merely starts with the word
        let plan = Plan::new("p").with_group(
            Group::new("g")
                .with_assertion(mem("a"))
                .with_assertion(mem("indeterminate")),
        );

        let report = engine.converge(&plan, &ConvergeOptions::new().check_mode(true)).unwrap();
        let unknown = &report.outcomes[0];
        assert!(unknown.indeterminate);
        assert!(!unknown.changed);
        assert_eq!(unknown.message, "indeterminate: a cannot be inspected");

        let drifted = &report.outcomes[1];
        assert!(!drifted.indeterminate);
        assert!(drifted.changed);
        assert_eq!(drifted.message, "would change: indeterminate missing");
        assert!(module.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tag_filter_limits_scope() {
        let module = Arc::new(MemoryModule::default());
        let registry = registry_with(module.clone());
        let runner = ScriptedRunner::new();
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p")
            .with_group(Group::new("base").with_assertion(mem("git")))
            .with_group(Group::new("docker").with_tag("docker").with_assertion(mem("docker-ce")));

        let options =
            ConvergeOptions::new().with_filter(TagFilter::new(["docker"], Vec::<String>::new()));
        let report = engine.converge(&plan, &options).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(*module.applied.lock().unwrap(), vec!["docker-ce"]);
    }

    #[test]
    fn test_validation_happens_before_any_apply() {
        let module = Arc::new(MemoryModule::default());
        let registry = registry_with(module.clone());
        let runner = ScriptedRunner::new();
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p")
            .with_group(Group::new("g1").with_assertion(mem("a")))
            .with_group(
                Group::new("g2")
                    .with_assertion(StateAssertion::new("snap", "snap:x", DesiredState::Present)),
            );

        let err = engine.converge(&plan, &ConvergeOptions::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownKind { .. }));
        assert!(module.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_tool_is_fatal() {
        let registry = ModuleRegistry::with_builtins();
        let runner = ScriptedRunner::new().without("apt-get");
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p").with_group(Group::new("base").with_assertion(
            StateAssertion::new("package", "package:git", DesiredState::Present)
                .with_param("name", "git"),
        ));

        let err = engine.converge(&plan, &ConvergeOptions::new()).unwrap_err();
        assert!(matches!(err, Error::ExternalToolMissing { ref tool, .. } if tool == "apt-get"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_cancel_stops_before_next_assertion() {
        let module = Arc::new(MemoryModule::default());
        let registry = registry_with(module.clone());
        let runner = ScriptedRunner::new();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let observer = CallbackObserver::new(move |event: &RunEvent| {
            if let RunEvent::Outcome(outcome) = event {
                if outcome.assertion_identifier == "mem:a" {
                    trigger.cancel();
                }
            }
        });
        let engine = ConvergenceEngine::new(&registry, &runner).with_observer(&observer);
        let plan = Plan::new("p")
            .with_group(Group::new("g1").with_assertion(mem("a")).with_assertion(mem("b")))
            .with_group(Group::new("g2").with_assertion(mem("c")));

        let report = engine.converge(&plan, &ConvergeOptions::new().with_cancel(cancel)).unwrap();
        assert_eq!(report.overall_status, RunStatus::Cancelled);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(*module.applied.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_timeout_precedence() {
        let registry = ModuleRegistry::with_builtins();
        let runner = ScriptedRunner::new()
            .respond("dpkg-query", CommandOutput::ok("install ok installed|1"));
        let engine = ConvergenceEngine::new(&registry, &runner);
        let mut plan = Plan::new("p").with_group(
            Group::new("base")
                .with_assertion(
                    StateAssertion::new("package", "package:git", DesiredState::Present)
                        .with_param("name", "git")
                        .with_timeout(Duration::from_secs(5)),
                ),
        );
        plan.settings.timeout = Some(Duration::from_secs(60));

        let options = ConvergeOptions::new()
            .check_mode(true)
            .with_timeout(Some(Duration::from_secs(600)));
        engine.converge(&plan, &options).unwrap();
        assert_eq!(runner.timeout_of("dpkg-query"), Some(Duration::from_secs(5)));

        plan.groups[0].assertions[0].timeout = None;
        let runner = ScriptedRunner::new()
            .respond("dpkg-query", CommandOutput::ok("install ok installed|1"));
        let engine = ConvergenceEngine::new(&registry, &runner);
        engine.converge(&plan, &options).unwrap();
        assert_eq!(runner.timeout_of("dpkg-query"), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_check_timeout_is_failure() {
        let registry = ModuleRegistry::with_builtins();
        let runner = ScriptedRunner::new().fail_with(
            "dpkg-query",
            Error::Timeout {
                command: "dpkg-query".to_string(),
                after: Duration::from_secs(5),
            },
        );
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p").with_group(Group::new("base").with_assertion(
            StateAssertion::new("package", "package:git", DesiredState::Present)
                .with_param("name", "git"),
        ));

        let report = engine.converge(&plan, &ConvergeOptions::new()).unwrap();
        assert!(report.outcomes[0].failed);
        assert!(report.outcomes[0].message.contains("timed out"));
        assert!(!runner.calls().iter().any(|c| c.starts_with("apt-get")));
    }

    #[test]
    fn test_lock_only_for_mutating_runs() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("converge.lock");
        let _held = RunLock::try_acquire(&lock_path).unwrap();

        let module = Arc::new(MemoryModule::default());
        let registry = registry_with(module);
        let runner = ScriptedRunner::new();
        let engine = ConvergenceEngine::new(&registry, &runner);
        let plan = Plan::new("p").with_group(Group::new("g").with_assertion(mem("a")));

        let err = engine
            .converge(&plan, &ConvergeOptions::new().with_lock(&lock_path))
            .unwrap_err();
        assert!(matches!(err, Error::Locked(_)));

        let report = engine
            .converge(&plan, &ConvergeOptions::new().with_lock(&lock_path).check_mode(true))
            .unwrap();
        assert!(report.is_success());
    }
}
