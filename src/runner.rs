// src/runner.rs

//! External command execution
//!
//! Every module talks to the live system through a `CommandRunner`. The
//! production `SystemRunner` spawns processes with stdin nullified and
//! enforces an optional per-call timeout; tests substitute a scripted
//! runner so no real package manager or service manager is touched.
//!
//! Children run in their own process group. A terminal Ctrl-C only
//! reaches converge, which finishes the in-flight command and then stops
//! before the next assertion.

use crate::error::{Error, Result};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};
use wait_timeout::ChildExt;

/// A command to run, fully specified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Build from an argv list; the first element is the program
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Config("Empty command".to_string()))?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program and arguments joined for logs and messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Prefix `argv` with `runuser` so it runs as `user`. Switching users
/// needs root; an unprivileged caller runs the command as itself.
pub fn run_as(user: Option<&str>, argv: Vec<String>, privileged: bool) -> Vec<String> {
    match user {
        Some(user) if privileged => ["runuser", "-u", user, "--"]
            .into_iter()
            .map(String::from)
            .chain(argv)
            .collect(),
        _ => argv,
    }
}

/// Whether this process may switch to another user
pub fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a non-zero exit into an error carrying stderr
    pub fn into_result(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::ApplyFailure(format!(
                "'{}' exited with {}: {}",
                spec.display(),
                self.code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                self.stderr.trim()
            )))
        }
    }
}

/// Seam between modules and the operating system
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. Spawn failures and timeouts are
    /// errors; a non-zero exit is reported through `CommandOutput`.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Locate a program on PATH
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Production runner backed by `std::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Executing: {}", spec.display());

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|e| Error::IoError(format!("Failed to spawn '{}': {}", spec.program, e)))?;

        // Drain pipes on their own threads so a chatty child cannot block
        // on a full pipe while we wait on it.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match spec.timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    // Take helpers the command forked down with it
                    let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Timeout {
                        command: spec.display(),
                        after: timeout,
                    });
                }
            },
            None => child.wait()?,
        };

        let output = CommandOutput {
            code: status.code(),
            stdout: stdout.map(join_drain).unwrap_or_default(),
            stderr: stderr.map(join_drain).unwrap_or_default(),
        };

        trace!(
            "'{}' exited with {:?} ({} bytes stdout)",
            spec.program,
            output.code,
            output.stdout.len()
        );

        Ok(output)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted runner for unit tests

    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Responds to commands by matching their display string prefix
    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: Mutex<Vec<(String, Result<CommandOutput>)>>,
        missing: HashSet<String>,
        calls: Mutex<Vec<CommandSpec>>,
        timeouts: Mutex<HashMap<String, Option<Duration>>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a response for the next command whose display starts with `prefix`
        pub fn respond(self, prefix: &str, output: CommandOutput) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push((prefix.to_string(), Ok(output)));
            self
        }

        /// Queue an error for the next matching command
        pub fn fail_with(self, prefix: &str, err: Error) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push((prefix.to_string(), Err(err)));
            self
        }

        /// Mark a program as absent from PATH
        pub fn without(mut self, program: &str) -> Self {
            self.missing.insert(program.to_string());
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(CommandSpec::display).collect()
        }

        pub fn timeout_of(&self, prefix: &str) -> Option<Duration> {
            self.timeouts.lock().unwrap().get(prefix).copied().flatten()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            let display = spec.display();
            self.calls.lock().unwrap().push(spec.clone());

            let mut responses = self.responses.lock().unwrap();
            if let Some(pos) = responses.iter().position(|(p, _)| display.starts_with(p.as_str())) {
                let (prefix, response) = responses.remove(pos);
                self.timeouts.lock().unwrap().insert(prefix, spec.timeout);
                return response;
            }
            Ok(CommandOutput::ok(""))
        }

        fn locate(&self, program: &str) -> Option<PathBuf> {
            if self.missing.contains(program) {
                None
            } else {
                Some(PathBuf::from("/usr/bin").join(program))
            }
        }
    }
}
