// src/plan/parser.rs

//! Parser for plan TOML files.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::vars::{self, ITEM_VAR, Vars};
use super::{CheckProbe, CheckSpec, DesiredState, Group, Plan, Settings, StateAssertion};
use crate::error::{Error, Result};

/// Current plan file version
pub const PLAN_VERSION: u32 = 1;

/// Parameters tried, in order, when deriving a default identifier
const IDENTIFIER_PARAMS: &[&str] = &["name", "path", "unit", "group"];

#[derive(Debug, Deserialize)]
struct PlanFile {
    plan: PlanHeader,

    #[serde(default)]
    settings: RawSettings,

    #[serde(default)]
    vars: BTreeMap<String, toml::Value>,

    #[serde(default)]
    group: Vec<RawGroup>,

    #[serde(default)]
    check: Vec<RawCheck>,
}

#[derive(Debug, Deserialize)]
struct PlanHeader {
    #[serde(default = "default_version")]
    version: u32,

    #[serde(default)]
    name: Option<String>,
}

fn default_version() -> u32 {
    PLAN_VERSION
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    timeout: Option<String>,

    #[serde(default)]
    lock_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    name: String,

    #[serde(default)]
    tags: Vec<String>,

    #[serde(default, rename = "assert")]
    assertions: Vec<RawAssertion>,
}

#[derive(Debug, Deserialize)]
struct RawAssertion {
    kind: String,

    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    state: Option<String>,

    #[serde(default)]
    tags: Vec<String>,

    /// Variable name holding a list, or an inline list
    #[serde(default)]
    for_each: Option<toml::Value>,

    #[serde(default)]
    timeout: Option<String>,

    /// Everything else is a module parameter
    #[serde(flatten)]
    params: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawCheck {
    name: String,

    #[serde(rename = "type")]
    check_type: String,

    #[serde(default)]
    path: Option<String>,

    #[serde(default)]
    command: Option<Vec<String>>,

    #[serde(default)]
    expect: Option<String>,

    #[serde(default)]
    requires_display: bool,

    #[serde(default)]
    tags: Vec<String>,

    #[serde(default)]
    timeout: Option<String>,
}

/// Parse a plan file from disk, applying variable overrides
pub fn parse_plan_file(path: &Path, overrides: &Vars) -> Result<Plan> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read plan file {}: {}", path.display(), e))
    })?;
    let mut plan = parse_plan(&content, overrides)?;
    if plan.name.is_empty() {
        plan.name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plan")
            .to_string();
    }
    Ok(plan)
}

/// Parse plan TOML text, applying variable overrides
pub fn parse_plan(content: &str, overrides: &Vars) -> Result<Plan> {
    let file: PlanFile = toml::from_str(content)?;

    if file.plan.version != PLAN_VERSION {
        return Err(Error::Config(format!(
            "Unsupported plan version: expected {}, found {}",
            PLAN_VERSION, file.plan.version
        )));
    }

    let mut vars = file.vars;
    for (key, value) in overrides {
        vars.insert(key.clone(), value.clone());
    }

    let settings = Settings {
        timeout: file.settings.timeout.as_deref().map(parse_duration).transpose()?,
        lock_path: file.settings.lock_path.map(PathBuf::from),
    };

    let mut groups = Vec::with_capacity(file.group.len());
    for raw in file.group {
        groups.push(build_group(raw, &vars)?);
    }

    let checks = file
        .check
        .into_iter()
        .map(|raw| build_check(raw, &vars))
        .collect::<Result<Vec<_>>>()?;

    let plan = Plan {
        name: file.plan.name.unwrap_or_default(),
        groups,
        checks,
        settings,
    };
    plan.check_structure()?;

    debug!(
        "Parsed plan '{}': {} group(s), {} assertion(s), {} check(s)",
        plan.name,
        plan.groups.len(),
        plan.assertion_count(),
        plan.checks.len()
    );

    Ok(plan)
}

fn build_group(raw: RawGroup, vars: &Vars) -> Result<Group> {
    let mut group = Group::new(raw.name);
    group.tags = raw.tags.into_iter().collect();

    for raw_assertion in raw.assertions {
        let expanded = expand_assertion(&raw_assertion, vars).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("group '{}': {}", group.name, msg)),
            other => other,
        })?;
        group.assertions.extend(expanded);
    }

    Ok(group)
}

/// Turn one raw assertion into one or more concrete assertions
fn expand_assertion(raw: &RawAssertion, vars: &Vars) -> Result<Vec<StateAssertion>> {
    let items = match &raw.for_each {
        None => return Ok(vec![build_assertion(raw, vars)?]),
        Some(toml::Value::String(name)) => match vars.get(name.trim()) {
            Some(toml::Value::Array(items)) => items.clone(),
            Some(_) => {
                return Err(Error::Config(format!(
                    "for_each variable '{}' is not a list",
                    name
                )));
            }
            None => {
                return Err(Error::Config(format!(
                    "for_each references undefined variable '{}'",
                    name
                )));
            }
        },
        Some(toml::Value::Array(items)) => {
            vars::substitute_value(&toml::Value::Array(items.clone()), vars)?
                .as_array()
                .cloned()
                .unwrap_or_default()
        }
        Some(_) => {
            return Err(Error::Config(format!(
                "for_each of '{}' assertion must be a variable name or a list",
                raw.kind
            )));
        }
    };

    let mut scoped = vars.clone();
    let mut assertions = Vec::with_capacity(items.len());
    for item in items {
        scoped.insert(ITEM_VAR.to_string(), item);
        assertions.push(build_assertion(raw, &scoped)?);
    }
    Ok(assertions)
}

fn build_assertion(raw: &RawAssertion, vars: &Vars) -> Result<StateAssertion> {
    let mut parameters = BTreeMap::new();
    for (key, value) in &raw.params {
        parameters.insert(key.clone(), vars::substitute_value(value, vars)?);
    }

    let desired_state = match &raw.state {
        Some(s) => DesiredState::from_str(&vars::substitute(s, vars)?).map_err(|_| {
            Error::Config(format!("Invalid state '{}' for '{}' assertion", s, raw.kind))
        })?,
        None => DesiredState::default(),
    };

    let identifier = match &raw.id {
        Some(id) => vars::substitute(id, vars)?,
        None => default_identifier(&raw.kind, &parameters)?,
    };

    Ok(StateAssertion {
        kind: raw.kind.clone(),
        identifier,
        parameters,
        desired_state,
        tags: raw.tags.iter().cloned().collect::<BTreeSet<_>>(),
        timeout: raw.timeout.as_deref().map(parse_duration).transpose()?,
    })
}

fn default_identifier(kind: &str, params: &BTreeMap<String, toml::Value>) -> Result<String> {
    // group-member assertions are identified by both sides
    if let (Some(user), Some(group)) = (
        params.get("user").and_then(|v| v.as_str()),
        params.get("group").and_then(|v| v.as_str()),
    ) {
        return Ok(format!("{}:{}@{}", kind, user, group));
    }

    IDENTIFIER_PARAMS
        .iter()
        .find_map(|key| params.get(*key).and_then(|v| v.as_str()))
        .map(|primary| format!("{}:{}", kind, primary))
        .ok_or_else(|| {
            Error::Config(format!(
                "'{}' assertion needs an 'id' or one of: {}",
                kind,
                IDENTIFIER_PARAMS.join(", ")
            ))
        })
}

fn build_check(raw: RawCheck, vars: &Vars) -> Result<CheckSpec> {
    let path = raw
        .path
        .as_deref()
        .map(|p| vars::substitute(p, vars))
        .transpose()?;

    let require_path = |path: Option<String>| {
        path.map(PathBuf::from).ok_or_else(|| {
            Error::Config(format!(
                "Check '{}' of type '{}' needs a 'path'",
                raw.name, raw.check_type
            ))
        })
    };

    let probe = match raw.check_type.as_str() {
        "socket" => CheckProbe::Socket {
            path: require_path(path)?,
        },
        "path" => CheckProbe::Path {
            path: require_path(path)?,
        },
        "command" => {
            let argv = raw
                .command
                .as_ref()
                .filter(|argv| !argv.is_empty())
                .ok_or_else(|| {
                    Error::Config(format!("Check '{}' needs a non-empty 'command'", raw.name))
                })?
                .iter()
                .map(|arg| vars::substitute(arg, vars))
                .collect::<Result<Vec<_>>>()?;

            if let Some(pattern) = &raw.expect {
                regex::Regex::new(pattern).map_err(|e| {
                    Error::Config(format!(
                        "Check '{}' has invalid 'expect' pattern: {}",
                        raw.name, e
                    ))
                })?;
            }

            CheckProbe::Command {
                argv,
                expect: raw.expect.clone(),
            }
        }
        other => {
            return Err(Error::Config(format!(
                "Check '{}' has unknown type '{}' (expected socket, path, or command)",
                raw.name, other
            )));
        }
    };

    Ok(CheckSpec {
        name: vars::substitute(&raw.name, vars)?,
        probe,
        requires_display: raw.requires_display,
        tags: raw.tags.into_iter().collect(),
        timeout: raw.timeout.as_deref().map(parse_duration).transpose()?,
    })
}

/// Parse a duration string like "30s", "5m", "2h", "1d", "1w"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Config("Empty duration".to_string()));
    }

    let split = s.len() - s.chars().last().map(char::len_utf8).unwrap_or(0);
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::Config(format!("Invalid duration number: {}", num_str)))?;

    let seconds = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        "w" => num * 604800,
        _ => return Err(Error::Config(format!("Invalid duration unit: {}", unit))),
    };

    Ok(Duration::from_secs(seconds))
}
