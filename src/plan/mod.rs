// src/plan/mod.rs

//! Plan - Declarative Workstation State
//!
//! A plan describes the desired state of a machine as an ordered list of
//! groups, each holding an ordered list of state assertions. The plan is
//! loaded once per run and shared read-only by the convergence engine and
//! the verification harness.
//!
//! # Example plan.toml
//!
//! ```toml
//! [plan]
//! version = 1
//! name = "workstation"
//!
//! [vars]
//! user = "dev"
//!
//! [[group]]
//! name = "docker"
//! tags = ["docker"]
//!
//! [[group.assert]]
//! kind = "repository"
//! name = "docker"
//! uri = "https://download.docker.com/linux/ubuntu"
//! suite = "noble"
//! components = ["stable"]
//! key_url = "https://download.docker.com/linux/ubuntu/gpg"
//!
//! [[group.assert]]
//! kind = "package"
//! name = "docker-ce"
//! from = "docker"
//!
//! [[group.assert]]
//! kind = "group-member"
//! user = "{{ user }}"
//! group = "docker"
//! ```
//!
//! Ordering within a group is significant: later assertions may depend on
//! the side effects of earlier ones.

pub mod parser;
pub mod tags;
pub mod vars;

pub use parser::{PLAN_VERSION, parse_duration, parse_plan, parse_plan_file};
pub use tags::{ALWAYS_TAG, NEVER_TAG, TagFilter};
pub use vars::{Vars, parse_var_override};

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};

/// Default path for the plan file
pub const DEFAULT_PLAN_PATH: &str = "/etc/converge/plan.toml";

/// The condition an assertion asks the system to be in
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DesiredState {
    #[default]
    Present,
    Absent,
    /// Enabled at boot and currently running
    Enabled,
    /// Disabled at boot and currently stopped
    Disabled,
}

/// A single declarative unit describing a desired system condition
#[derive(Debug, Clone, PartialEq)]
pub struct StateAssertion {
    /// Module kind that checks and enforces this assertion
    pub kind: String,
    /// Unique within its group
    pub identifier: String,
    /// Module parameters, variables already substituted
    pub parameters: BTreeMap<String, toml::Value>,
    pub desired_state: DesiredState,
    pub tags: BTreeSet<String>,
    /// Per-assertion deadline for external calls
    pub timeout: Option<Duration>,
}

impl StateAssertion {
    /// Create an assertion with no parameters
    pub fn new(
        kind: impl Into<String>,
        identifier: impl Into<String>,
        state: DesiredState,
    ) -> Self {
        Self {
            kind: kind.into(),
            identifier: identifier.into(),
            parameters: BTreeMap::new(),
            desired_state: state,
            tags: BTreeSet::new(),
            timeout: None,
        }
    }

    /// Builder: add a parameter
    pub fn with_param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Builder: add a tag
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    /// Builder: set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get a string parameter, if present and a string
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Get a required string parameter
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.parameters.get(key) {
            Some(toml::Value::String(s)) if !s.is_empty() => Ok(s),
            Some(_) => Err(Error::Config(format!(
                "Parameter '{}' of '{}' must be a non-empty string",
                key, self.identifier
            ))),
            None => Err(Error::Config(format!(
                "Assertion '{}' ({}) is missing required parameter '{}'",
                self.identifier, self.kind, key
            ))),
        }
    }

    /// Get a list-of-strings parameter. A single string is treated as a
    /// one-element list. Missing parameters yield an empty list.
    pub fn param_list(&self, key: &str) -> Result<Vec<String>> {
        match self.parameters.get(key) {
            None => Ok(Vec::new()),
            Some(toml::Value::String(s)) => Ok(vec![s.clone()]),
            Some(toml::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        Error::Config(format!(
                            "Parameter '{}' of '{}' must contain only strings",
                            key, self.identifier
                        ))
                    })
                })
                .collect(),
            Some(_) => Err(Error::Config(format!(
                "Parameter '{}' of '{}' must be a string or list of strings",
                key, self.identifier
            ))),
        }
    }

    /// Get a boolean parameter, defaulting when absent
    pub fn param_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.parameters.get(key) {
            None => Ok(default),
            Some(toml::Value::Boolean(b)) => Ok(*b),
            Some(_) => Err(Error::Config(format!(
                "Parameter '{}' of '{}' must be a boolean",
                key, self.identifier
            ))),
        }
    }

    /// Get an octal permission parameter. `"0644"`, `"0o644"` and the bare
    /// integer `644` all mean the same mode.
    pub fn param_mode(&self, key: &str) -> Result<Option<u32>> {
        let raw = match self.parameters.get(key) {
            None => return Ok(None),
            Some(toml::Value::String(s)) => s.clone(),
            Some(toml::Value::Integer(i)) => i.to_string(),
            Some(_) => {
                return Err(Error::Config(format!(
                    "Parameter '{}' of '{}' must be an octal string",
                    key, self.identifier
                )));
            }
        };
        let digits = raw.strip_prefix("0o").unwrap_or(&raw);
        u32::from_str_radix(digits, 8)
            .ok()
            .filter(|m| *m <= 0o7777)
            .map(Some)
            .ok_or_else(|| Error::Config(format!("Invalid file mode '{}'", raw)))
    }

    /// Short label used in log lines: `group/identifier`
    pub fn label(&self, group: &str) -> String {
        format!("{}/{}", group, self.identifier)
    }
}

/// A named, ordered unit of assertions (role analogue)
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub assertions: Vec<StateAssertion>,
    pub tags: BTreeSet<String>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assertions: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Builder: append an assertion
    pub fn with_assertion(mut self, assertion: StateAssertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Builder: add a group-level tag
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    /// Group tags merged with the assertion's own tags
    pub fn effective_tags(&self, assertion: &StateAssertion) -> BTreeSet<String> {
        self.tags.union(&assertion.tags).cloned().collect()
    }

    /// Assertions of this group selected by the filter, in order
    pub fn selected<'a>(&'a self, filter: &TagFilter) -> Vec<&'a StateAssertion> {
        self.assertions
            .iter()
            .filter(|a| filter.selects(&self.effective_tags(a)))
            .collect()
    }

    /// Reject duplicate identifiers within the group
    pub fn check_unique_identifiers(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for assertion in &self.assertions {
            if !seen.insert(assertion.identifier.as_str()) {
                return Err(Error::DuplicateIdentifier {
                    group: self.name.clone(),
                    identifier: assertion.identifier.clone(),
                });
            }
        }
        Ok(())
    }
}

/// How a verification-only check probes the system
#[derive(Debug, Clone, PartialEq)]
pub enum CheckProbe {
    /// Path exists and is a Unix domain socket
    Socket { path: PathBuf },
    /// Path exists
    Path { path: PathBuf },
    /// Command exits 0 and its output matches `expect` when given
    Command {
        argv: Vec<String>,
        expect: Option<String>,
    },
}

/// A verification-only probe declared at plan level
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSpec {
    pub name: String,
    pub probe: CheckProbe,
    /// Only meaningful with a graphical session
    pub requires_display: bool,
    pub tags: BTreeSet<String>,
    pub timeout: Option<Duration>,
}

/// Run-wide settings carried by the plan file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    /// Default per-assertion timeout
    pub timeout: Option<Duration>,
    /// Advisory lock for mutating runs
    pub lock_path: Option<PathBuf>,
}

/// The full, validated-for-structure plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub name: String,
    pub groups: Vec<Group>,
    pub checks: Vec<CheckSpec>,
    pub settings: Settings,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: append a group
    pub fn with_group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }

    /// Total number of assertions across all groups
    pub fn assertion_count(&self) -> usize {
        self.groups.iter().map(|g| g.assertions.len()).sum()
    }

    /// Structural checks that need no module registry
    pub fn check_structure(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(Error::Config("Group name must not be empty".to_string()));
            }
            if !names.insert(group.name.as_str()) {
                return Err(Error::Config(format!(
                    "Group '{}' is defined more than once",
                    group.name
                )));
            }
            group.check_unique_identifiers()?;
        }
        Ok(())
    }

    /// Plan-level checks selected by the filter
    pub fn selected_checks<'a>(&'a self, filter: &TagFilter) -> Vec<&'a CheckSpec> {
        self.checks.iter().filter(|c| filter.selects(&c.tags)).collect()
    }
}

/// Load a plan from the default or specified path
pub fn load_plan(path: Option<&Path>, overrides: &Vars) -> Result<Plan> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_PLAN_PATH));
    parse_plan_file(path, overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn pkg(name: &str) -> StateAssertion {
        StateAssertion::new("package", format!("package:{}", name), DesiredState::Present)
            .with_param("name", name)
    }

    #[test]
    fn test_desired_state_parse() {
        assert_eq!(DesiredState::from_str("present").unwrap(), DesiredState::Present);
        assert_eq!(DesiredState::from_str("Enabled").unwrap(), DesiredState::Enabled);
        assert!(DesiredState::from_str("installed").is_err());
        assert_eq!(DesiredState::Disabled.to_string(), "disabled");
    }

    #[test]
    fn test_param_accessors() {
        let a = pkg("git")
            .with_param("update_cache", true)
            .with_param("components", vec!["main", "contrib"]);
        assert_eq!(a.param_str("name"), Some("git"));
        assert_eq!(a.require_str("name").unwrap(), "git");
        assert!(a.require_str("version").is_err());
        assert!(a.param_bool("update_cache", false).unwrap());
        assert!(!a.param_bool("missing", false).unwrap());
        assert_eq!(a.param_list("components").unwrap(), vec!["main", "contrib"]);
        assert_eq!(a.param_list("name").unwrap(), vec!["git"]);
        assert!(a.param_list("nothing").unwrap().is_empty());
        assert!(a.param_bool("name", false).is_err());
        assert_eq!(a.param_mode("mode").unwrap(), None);
    }

    #[test]
    fn test_param_mode_forms() {
        let forms = [
            toml::Value::from("0644"),
            toml::Value::from("0o644"),
            toml::Value::from("644"),
            toml::Value::from(644),
        ];
        for mode in forms {
            let a = pkg("x").with_param("mode", mode.clone());
            assert_eq!(a.param_mode("mode").unwrap(), Some(0o644), "{:?}", mode);
        }
        assert!(pkg("x").with_param("mode", "0999").param_mode("mode").is_err());
        assert!(pkg("x").with_param("mode", "rw-r--r--").param_mode("mode").is_err());
        assert!(pkg("x").with_param("mode", "17777").param_mode("mode").is_err());
        assert!(pkg("x").with_param("mode", true).param_mode("mode").is_err());
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let group = Group::new("embedded")
            .with_assertion(pkg("stlink"))
            .with_assertion(pkg("stlink"));
        let err = group.check_unique_identifiers().unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateIdentifier { ref identifier, .. } if identifier == "package:stlink"
        ));
    }

    #[test]
    fn test_duplicate_group_name_rejected() {
        let plan = Plan::new("p")
            .with_group(Group::new("base"))
            .with_group(Group::new("base"));
        assert!(matches!(plan.check_structure(), Err(Error::Config(_))));
    }

    #[test]
    fn test_effective_tags_union() {
        let group = Group::new("docker").with_tag("docker");
        let a = pkg("docker-ce").with_tag("containers");
        let tags = group.effective_tags(&a);
        assert!(tags.contains("docker"));
        assert!(tags.contains("containers"));
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_label() {
        assert_eq!(pkg("git").label("base"), "base/package:git");
    }
}
