// src/verify/probe.rs

//! Read-only system probes used by the verification harness
//!
//! These deliberately avoid the state modules' query paths: packages are
//! read with `dpkg -s` rather than `dpkg-query`, services with
//! `systemctl show`, and group membership straight from `/etc/group`
//! instead of `getent`.

use crate::error::{Error, Result};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// What kind of filesystem object a path names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
    Socket,
    Other,
}

/// Facts about an existing path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFacts {
    pub kind: PathKind,
    /// Permission bits
    pub mode: u32,
    /// Hex SHA-256, regular files only
    pub sha256: Option<String>,
}

/// Facts systemd reports for a unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFacts {
    pub load_state: String,
    pub unit_file_state: String,
    pub active_state: String,
}

impl UnitFacts {
    pub fn exists(&self) -> bool {
        !self.load_state.is_empty() && self.load_state != "not-found"
    }

    pub fn enabled(&self) -> bool {
        matches!(
            self.unit_file_state.as_str(),
            "enabled" | "enabled-runtime" | "static" | "alias" | "indirect" | "generated"
        )
    }

    pub fn running(&self) -> bool {
        self.active_state == "active"
    }
}

/// Read-only view of the system for verification
pub trait SystemProbe: Send + Sync {
    /// Installed version of a package, `None` if not installed
    fn package_version(&self, name: &str) -> Result<Option<String>>;

    fn unit(&self, unit: &str) -> Result<UnitFacts>;

    /// Members of a group, `None` if the group does not exist
    fn group_members(&self, group: &str) -> Result<Option<Vec<String>>>;

    /// Facts about a path, `None` if it does not exist
    fn file(&self, path: &Path) -> Result<Option<FileFacts>>;

    fn read_to_string(&self, path: &Path) -> Result<Option<String>>;

    /// Run a command and capture its output
    fn command(&self, argv: &[String], timeout: Option<Duration>) -> Result<CommandOutput>;

    /// Whether a graphical session is available
    fn has_display(&self) -> bool;
}

/// Probes the running system (or a target root for file-backed facts)
pub struct LiveProbe<'a> {
    runner: &'a dyn CommandRunner,
    root: PathBuf,
    display: bool,
}

impl<'a> LiveProbe<'a> {
    pub fn new(runner: &'a dyn CommandRunner, root: impl AsRef<Path>) -> Self {
        let display = ["DISPLAY", "WAYLAND_DISPLAY"]
            .iter()
            .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()));
        Self {
            runner,
            root: root.as_ref().to_path_buf(),
            display,
        }
    }

    /// Override graphical session detection
    pub fn with_display(mut self, display: bool) -> Self {
        self.display = display;
        self
    }

    fn is_live_root(&self) -> bool {
        self.root == Path::new("/")
    }

    fn target(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }
}

/// Parse `Key: value` control-file style output
fn control_fields(text: &str) -> HashMap<&str, &str> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect()
}

impl SystemProbe for LiveProbe<'_> {
    fn package_version(&self, name: &str) -> Result<Option<String>> {
        let mut spec = CommandSpec::new("dpkg");
        if !self.is_live_root() {
            spec = spec.arg(format!("--root={}", self.root.display()));
        }
        let output = self.runner.run(&spec.args(["-s", name]))?;

        match output.code {
            Some(0) => {
                let fields = control_fields(&output.stdout);
                let installed = fields
                    .get("Status")
                    .is_some_and(|status| status.ends_with(" installed"));
                Ok(installed.then(|| fields.get("Version").unwrap_or(&"").to_string()))
            }
            Some(1) => Ok(None),
            code => Err(Error::CheckFailure(format!(
                "dpkg -s {} exited with {:?}",
                name, code
            ))),
        }
    }

    fn unit(&self, unit: &str) -> Result<UnitFacts> {
        if !self.is_live_root() {
            return Err(Error::CheckFailure(
                "service state is only observable on the live root".to_string(),
            ));
        }

        let output = self.runner.run(
            &CommandSpec::new("systemctl").args([
                "show",
                "--property=LoadState,UnitFileState,ActiveState",
                unit,
            ]),
        )?;
        if !output.success() {
            return Err(Error::CheckFailure(format!(
                "systemctl show {}: {}",
                unit,
                output.stderr.trim()
            )));
        }

        let mut facts = UnitFacts::default();
        for (key, value) in output.stdout.lines().filter_map(|l| l.split_once('=')) {
            match key {
                "LoadState" => facts.load_state = value.to_string(),
                "UnitFileState" => facts.unit_file_state = value.to_string(),
                "ActiveState" => facts.active_state = value.to_string(),
                _ => {}
            }
        }
        debug!("{}: {:?}", unit, facts);
        Ok(facts)
    }

    fn group_members(&self, group: &str) -> Result<Option<Vec<String>>> {
        let Some(content) = self.read_to_string(Path::new("/etc/group"))? else {
            return Ok(None);
        };

        for line in content.lines() {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() == 4 && fields[0] == group {
                return Ok(Some(
                    fields[3]
                        .split(',')
                        .filter(|m| !m.is_empty())
                        .map(str::to_string)
                        .collect(),
                ));
            }
        }
        Ok(None)
    }

    fn file(&self, path: &Path) -> Result<Option<FileFacts>> {
        let target = self.target(path);
        let metadata = match fs::metadata(&target) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file_type = metadata.file_type();
        let kind = if file_type.is_socket() {
            PathKind::Socket
        } else if file_type.is_dir() {
            PathKind::Directory
        } else if file_type.is_file() {
            PathKind::File
        } else {
            PathKind::Other
        };

        let sha256 = if kind == PathKind::File {
            let mut hasher = Sha256::new();
            std::io::copy(&mut File::open(&target)?, &mut hasher)?;
            Some(hex::encode(hasher.finalize()))
        } else {
            None
        };

        Ok(Some(FileFacts {
            kind,
            mode: metadata.permissions().mode() & 0o7777,
            sha256,
        }))
    }

    fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(self.target(path)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn command(&self, argv: &[String], timeout: Option<Duration>) -> Result<CommandOutput> {
        self.runner.run(&CommandSpec::from_argv(argv)?.timeout(timeout))
    }

    fn has_display(&self) -> bool {
        self.display
    }
}
