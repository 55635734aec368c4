// src/module/file.rs

//! Managed file assertions
//!
//! Content is compared by SHA-256 digest. Writes go to a temporary file in
//! the destination directory and are renamed into place, so a reader never
//! sees a half-written file.

use super::{CurrentState, ModuleContext, StateModule};
use crate::engine::Outcome;
use crate::error::{Error, Result};
use crate::plan::{DesiredState, StateAssertion};
use crate::runner::CommandSpec;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Hex-encoded SHA-256 of a byte slice
pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Bytes the file should contain, from `content` or `source`
fn desired_content(assertion: &StateAssertion) -> Result<Vec<u8>> {
    if let Some(content) = assertion.param_str("content") {
        return Ok(content.as_bytes().to_vec());
    }
    let source = assertion.require_str("source")?;
    fs::read(source).map_err(|e| Error::IoError(format!("Failed to read source {}: {}", source, e)))
}

/// Run the `on_change` hook, if any
fn run_on_change(assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<()> {
    let argv = assertion.param_list("on_change")?;
    if argv.is_empty() {
        return Ok(());
    }
    let spec = CommandSpec::from_argv(&argv)?;
    debug!("Running on_change hook: {}", spec.display());
    ctx.run_checked(spec)?;
    Ok(())
}

/// Mode for new files when none is declared
const DEFAULT_MODE: u32 = 0o644;

/// Write `content` to `path` atomically. Without an explicit mode an
/// existing file keeps its permissions and a new one gets 0644.
pub(crate) fn write_atomic(path: &Path, content: &[u8], mode: Option<u32>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::ApplyFailure(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(parent)?;

    let mode = match (mode, fs::metadata(path)) {
        (Some(mode), _) => mode,
        (None, Ok(existing)) => existing.permissions().mode() & 0o7777,
        (None, Err(_)) => DEFAULT_MODE,
    };

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode))?;
    temp.persist(path)
        .map_err(|e| {
            Error::ApplyFailure(format!("Failed to write {}: {}", path.display(), e.error))
        })?;
    Ok(())
}

/// `file` kind
#[derive(Debug, Default, Clone, Copy)]
pub struct FileModule;

impl StateModule for FileModule {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn validate(&self, assertion: &StateAssertion) -> Result<()> {
        let path = assertion.require_str("path")?;
        if !path.starts_with('/') {
            return Err(Error::Config(format!("File path '{}' must be absolute", path)));
        }
        if assertion.desired_state == DesiredState::Present {
            match (assertion.param_str("content"), assertion.param_str("source")) {
                (Some(_), Some(_)) => {
                    return Err(Error::Config(
                        "Use either 'content' or 'source', not both".to_string(),
                    ));
                }
                (None, None) => {
                    return Err(Error::Config(
                        "One of 'content' or 'source' is required".to_string(),
                    ));
                }
                _ => {}
            }
        }
        assertion.param_mode("mode")?;
        assertion.param_list("on_change")?;
        Ok(())
    }

    fn required_tools(&self, assertion: &StateAssertion) -> Vec<String> {
        assertion
            .param_list("on_change")
            .ok()
            .and_then(|argv| argv.into_iter().next())
            .into_iter()
            .collect()
    }

    fn check(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<CurrentState> {
        let path = ctx.resolve(assertion.require_str("path")?);

        if assertion.desired_state == DesiredState::Absent {
            return Ok(CurrentState::from_match(
                !path.exists(),
                format!("{} exists", path.display()),
            ));
        }

        let current = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CurrentState::drifted(format!("{} is missing", path.display())));
            }
            Err(e) => {
                return Err(Error::CheckFailure(format!("Cannot read {}: {}", path.display(), e)));
            }
        };

        let wanted = desired_content(assertion)?;
        let current_digest = sha256_hex(&current);
        if current_digest != sha256_hex(&wanted) {
            return Ok(CurrentState::drifted(format!(
                "{} content differs (sha256 {})",
                path.display(),
                &current_digest[..12]
            )));
        }

        if let Some(mode) = assertion.param_mode("mode")? {
            let actual = fs::metadata(&path)?.permissions().mode() & 0o7777;
            if actual != mode {
                return Ok(CurrentState::drifted(format!(
                    "{} has mode {:04o}, want {:04o}",
                    path.display(),
                    actual,
                    mode
                )));
            }
        }

        Ok(CurrentState::Satisfied)
    }

    fn apply(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<Outcome> {
        let path = ctx.resolve(assertion.require_str("path")?);

        let message = if assertion.desired_state == DesiredState::Absent {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            format!("removed {}", path.display())
        } else {
            let content = desired_content(assertion)?;
            write_atomic(&path, &content, assertion.param_mode("mode")?)?;
            format!("wrote {} ({} bytes)", path.display(), content.len())
        };

        info!("{}", message);
        run_on_change(assertion, ctx)?;
        Ok(Outcome::changed(&assertion.identifier, message))
    }
}
