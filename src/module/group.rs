// src/module/group.rs

//! Supplementary group membership assertions
//!
//! On the live root membership is read with `getent`, which also sees
//! NSS-backed groups. For a target root the group database is read from
//! `<root>/etc/group` and the shadow tools are pointed at it with `--root`.

use super::{CurrentState, ModuleContext, StateModule};
use crate::engine::Outcome;
use crate::error::{Error, Result};
use crate::plan::{DesiredState, StateAssertion};
use crate::runner::CommandSpec;
use std::fs;
use tracing::info;

/// One entry of the group database
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupEntry {
    pub name: String,
    pub gid: Option<u32>,
    pub members: Vec<String>,
}

impl GroupEntry {
    pub fn has_member(&self, user: &str) -> bool {
        self.members.iter().any(|m| m == user)
    }
}

/// Parse one `name:x:gid:member,member` line
pub(crate) fn parse_group_line(line: &str) -> Option<GroupEntry> {
    let mut fields = line.trim().splitn(4, ':');
    let name = fields.next().filter(|n| !n.is_empty())?;
    let _password = fields.next()?;
    let gid = fields.next().and_then(|g| g.parse().ok());
    let members = fields
        .next()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();

    Some(GroupEntry {
        name: name.to_string(),
        gid,
        members,
    })
}

/// Find a group in `/etc/group`-formatted content
pub(crate) fn find_group(content: &str, group: &str) -> Option<GroupEntry> {
    content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .filter_map(parse_group_line)
        .find(|e| e.name == group)
}

fn lookup(ctx: &ModuleContext<'_>, group: &str) -> Result<Option<GroupEntry>> {
    if !ctx.is_live_root() {
        let path = ctx.resolve("/etc/group");
        return match fs::read_to_string(&path) {
            Ok(content) => Ok(find_group(&content, group)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::CheckFailure(format!("Cannot read {}: {}", path.display(), e))),
        };
    }

    let output = ctx.run(CommandSpec::new("getent").args(["group", group]))?;
    match output.code {
        Some(0) => Ok(output.stdout.lines().find_map(parse_group_line)),
        // getent: 2 means the key was not found
        Some(2) => Ok(None),
        code => Err(Error::CheckFailure(format!(
            "getent group {} exited with {:?}",
            group, code
        ))),
    }
}

/// Point a shadow-utils command at the target root when not live
fn with_root(spec: CommandSpec, ctx: &ModuleContext<'_>) -> CommandSpec {
    if ctx.is_live_root() {
        spec
    } else {
        spec.arg("--root").arg(ctx.root.to_string_lossy())
    }
}

/// `group-member` kind
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupMemberModule;

impl StateModule for GroupMemberModule {
    fn kind(&self) -> &'static str {
        "group-member"
    }

    fn validate(&self, assertion: &StateAssertion) -> Result<()> {
        for key in ["user", "group"] {
            let value = assertion.require_str(key)?;
            if value.contains([':', ',']) || value.chars().any(char::is_whitespace) {
                return Err(Error::Config(format!("Invalid {} name '{}'", key, value)));
            }
        }
        assertion.param_bool("create", false)?;
        assertion.param_bool("system", false)?;
        Ok(())
    }

    fn required_tools(&self, assertion: &StateAssertion) -> Vec<String> {
        let mut tools = vec!["getent".to_string()];
        if assertion.desired_state == DesiredState::Absent {
            tools.push("gpasswd".to_string());
        } else {
            if assertion.param_bool("create", false).unwrap_or(false) {
                tools.push("groupadd".to_string());
            }
            tools.push("usermod".to_string());
        }
        tools
    }

    fn check(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<CurrentState> {
        let user = assertion.require_str("user")?;
        let group = assertion.require_str("group")?;
        let entry = lookup(ctx, group)?;

        Ok(match (assertion.desired_state, entry) {
            (DesiredState::Absent, None) => CurrentState::Satisfied,
            (DesiredState::Absent, Some(entry)) => CurrentState::from_match(
                !entry.has_member(user),
                format!("{} is a member of {}", user, group),
            ),
            (_, None) => CurrentState::drifted(format!("group {} does not exist", group)),
            (_, Some(entry)) => CurrentState::from_match(
                entry.has_member(user),
                format!("{} is not a member of {}", user, group),
            ),
        })
    }

    fn apply(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<Outcome> {
        let user = assertion.require_str("user")?;
        let group = assertion.require_str("group")?;

        if assertion.desired_state == DesiredState::Absent {
            ctx.run_checked(with_root(CommandSpec::new("gpasswd").args(["-d", user, group]), ctx))?;
            info!("Removed {} from group {}", user, group);
            return Ok(Outcome::changed(
                &assertion.identifier,
                format!("removed {} from {}", user, group),
            ));
        }

        if lookup(ctx, group)?.is_none() {
            if !assertion.param_bool("create", false)? {
                return Err(Error::ApplyFailure(format!(
                    "group '{}' does not exist (set create = true to add it)",
                    group
                )));
            }
            let mut groupadd = CommandSpec::new("groupadd");
            if assertion.param_bool("system", false)? {
                groupadd = groupadd.arg("--system");
            }
            ctx.run_checked(with_root(groupadd, ctx).arg(group))?;
            info!("Created group {}", group);
        }

        ctx.run_checked(with_root(CommandSpec::new("usermod"), ctx).args(["-aG", group, user]))?;
        info!("Added {} to group {}", user, group);
        Ok(Outcome::changed(
            &assertion.identifier,
            format!("added {} to {} (effective at next login)", user, group),
        ))
    }
}
