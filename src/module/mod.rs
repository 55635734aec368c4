// src/module/mod.rs

//! State modules
//!
//! A module knows how to check and enforce one kind of state assertion.
//! All modules share the same capability set:
//!
//! - `check` observes the system and must never modify it
//! - `apply` moves the system towards the desired state
//!
//! Built-in kinds target a Debian-family workstation:
//!
//! | kind           | backing tools                          |
//! |----------------|----------------------------------------|
//! | `package`      | dpkg-query, apt-get                    |
//! | `service`      | systemctl                              |
//! | `file`         | direct filesystem access               |
//! | `group-member` | getent, usermod, groupadd, gpasswd     |
//! | `repository`   | apt sources.list.d, gpg, apt-get       |
//! | `extension`    | editor CLI (`code` by default)         |

mod extension;
mod file;
mod group;
mod package;
pub mod registry;
mod repository;
mod service;

pub use extension::ExtensionModule;
pub use file::FileModule;
pub use group::GroupMemberModule;
pub use package::PackageModule;
pub use registry::ModuleRegistry;
pub use repository::RepositoryModule;
pub use service::ServiceModule;

use crate::engine::Outcome;
use crate::error::Result;
use crate::plan::{DesiredState, StateAssertion};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a module observed during `check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentState {
    /// The system already matches the desired state
    Satisfied,
    /// The system differs; `observed` describes what was found
    Drifted { observed: String },
    /// State could not be determined
    Indeterminate { reason: String },
}

impl CurrentState {
    pub fn drifted(observed: impl Into<String>) -> Self {
        Self::Drifted {
            observed: observed.into(),
        }
    }

    pub fn indeterminate(reason: impl Into<String>) -> Self {
        Self::Indeterminate {
            reason: reason.into(),
        }
    }

    /// Satisfied when `matches`, otherwise drifted with `observed`
    pub fn from_match(matches: bool, observed: impl Into<String>) -> Self {
        if matches {
            Self::Satisfied
        } else {
            Self::drifted(observed)
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Everything a module call may touch besides the assertion itself
pub struct ModuleContext<'a> {
    pub runner: &'a dyn CommandRunner,
    /// Target root; file paths in assertions are resolved beneath it
    pub root: &'a Path,
    /// Deadline applied to each external command
    pub timeout: Option<Duration>,
}

impl<'a> ModuleContext<'a> {
    pub fn new(runner: &'a dyn CommandRunner, root: &'a Path) -> Self {
        Self {
            runner,
            root,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if we're operating on the live root
    pub fn is_live_root(&self) -> bool {
        self.root == Path::new("/")
    }

    /// Resolve an absolute plan path beneath the target root
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Command for `program` executed inside the target root, through
    /// `chroot` unless the target is the live system
    pub fn in_root(&self, program: &str) -> CommandSpec {
        if self.is_live_root() {
            CommandSpec::new(program)
        } else {
            CommandSpec::new("chroot")
                .arg(self.root.to_string_lossy().into_owned())
                .arg(program)
        }
    }

    /// Run a command with this context's timeout
    pub fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let spec = spec.timeout(self.timeout);
        self.runner.run(&spec)
    }

    /// Run a command and require a zero exit status
    pub fn run_checked(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let spec = spec.timeout(self.timeout);
        self.runner.run(&spec)?.into_result(&spec)
    }
}

/// The shared capability set of every assertion kind
pub trait StateModule: Send + Sync {
    /// Kind string assertions use to select this module
    fn kind(&self) -> &'static str;

    /// Desired states this module can enforce
    fn supported_states(&self) -> &'static [DesiredState] {
        &[DesiredState::Present, DesiredState::Absent]
    }

    /// Load-time parameter validation; must not touch the system
    fn validate(&self, assertion: &StateAssertion) -> Result<()>;

    /// External programs this assertion needs on PATH
    fn required_tools(&self, _assertion: &StateAssertion) -> Vec<String> {
        Vec::new()
    }

    /// Observe current state. Read-only.
    fn check(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<CurrentState>;

    /// Enforce desired state and report what happened
    fn apply(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<Outcome>;
}
