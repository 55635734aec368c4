// src/module/repository.rs

//! APT repository assertions
//!
//! A repository is a one-line `sources.list.d` entry plus, optionally, a
//! signing keyring fetched from `key_url`. ASCII-armored keys are converted
//! with `gpg --dearmor` before installation.

use super::file::write_atomic;
use super::package::apt_get;
use super::{CurrentState, ModuleContext, StateModule};
use crate::engine::Outcome;
use crate::error::{Error, Result};
use crate::plan::{DesiredState, StateAssertion};
use crate::runner::CommandSpec;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::Url;

const SOURCES_DIR: &str = "/etc/apt/sources.list.d";
const KEYRING_DIR: &str = "/etc/apt/keyrings";
const ARMOR_HEADER: &[u8] = b"-----BEGIN PGP PUBLIC KEY BLOCK-----";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Path of the list file for a repository
pub(crate) fn list_path(name: &str) -> String {
    format!("{}/{}.list", SOURCES_DIR, name)
}

/// Keyring path: explicit `keyring`, else derived from the name when a
/// `key_url` is given
pub(crate) fn keyring_path(assertion: &StateAssertion) -> Result<Option<String>> {
    if let Some(keyring) = assertion.param_str("keyring") {
        return Ok(Some(keyring.to_string()));
    }
    if assertion.param_str("key_url").is_some() {
        let name = assertion.require_str("name")?;
        return Ok(Some(format!("{}/{}.gpg", KEYRING_DIR, name)));
    }
    Ok(None)
}

/// Render the one-line source entry
pub(crate) fn source_line(assertion: &StateAssertion) -> Result<String> {
    let uri = assertion.require_str("uri")?;
    let suite = assertion.require_str("suite")?;
    let mut components = assertion.param_list("components")?;
    if components.is_empty() {
        components.push("main".to_string());
    }

    let mut options = Vec::new();
    if let Some(arch) = assertion.param_str("arch") {
        options.push(format!("arch={}", arch));
    }
    if let Some(keyring) = keyring_path(assertion)? {
        options.push(format!("signed-by={}", keyring));
    }

    let options = if options.is_empty() {
        String::new()
    } else {
        format!("[{}] ", options.join(" "))
    };

    Ok(format!("deb {}{} {} {}\n", options, uri, suite, components.join(" ")))
}

/// Fetch key material from an http(s) or file URL
pub(crate) fn fetch_key(key_url: &str, timeout: Option<Duration>) -> Result<Vec<u8>> {
    let url = Url::parse(key_url)
        .map_err(|e| Error::DownloadError(format!("Invalid key URL '{}': {}", key_url, e)))?;

    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| Error::DownloadError(format!("Invalid file URL '{}'", key_url)))?;
            fs::read(&path)
                .map_err(|e| {
                    Error::DownloadError(format!("Failed to read {}: {}", path.display(), e))
                })
        }
        "http" | "https" => {
            debug!("Fetching signing key from {}", url);
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT))
                .build()
                .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {}", e)))?;

            let response = client
                .get(url.as_str())
                .send()
                .and_then(|r| r.error_for_status())
                .map_err(|e| Error::DownloadError(format!("Failed to fetch {}: {}", key_url, e)))?;

            response
                .bytes()
                .map(|b| b.to_vec())
                .map_err(|e| Error::DownloadError(format!("Failed to read {}: {}", key_url, e)))
        }
        other => Err(Error::DownloadError(format!(
            "Unsupported key URL scheme '{}'",
            other
        ))),
    }
}

/// Whether key material is ASCII-armored
pub(crate) fn is_armored(key: &[u8]) -> bool {
    let start = key.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(key.len());
    key[start..].starts_with(ARMOR_HEADER)
}

fn install_keyring(key: &[u8], keyring: &Path, ctx: &ModuleContext<'_>) -> Result<()> {
    if !is_armored(key) {
        return write_atomic(keyring, key, Some(0o644));
    }

    let parent = keyring
        .parent()
        .ok_or_else(|| {
            Error::ApplyFailure(format!("{} has no parent directory", keyring.display()))
        })?;
    fs::create_dir_all(parent)?;

    let mut armored = NamedTempFile::new()?;
    armored.write_all(key)?;
    armored.flush()?;

    ctx.run_checked(CommandSpec::new("gpg").args([
        "--dearmor".to_string(),
        "--yes".to_string(),
        "--output".to_string(),
        keyring.to_string_lossy().into_owned(),
        armored.path().to_string_lossy().into_owned(),
    ]))?;
    Ok(())
}

/// `repository` kind
#[derive(Debug, Default, Clone, Copy)]
pub struct RepositoryModule;

impl StateModule for RepositoryModule {
    fn kind(&self) -> &'static str {
        "repository"
    }

    fn validate(&self, assertion: &StateAssertion) -> Result<()> {
        let name = assertion.require_str("name")?;
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(Error::Config(format!("Invalid repository name '{}'", name)));
        }

        if assertion.desired_state == DesiredState::Present {
            let uri = assertion.require_str("uri")?;
            Url::parse(uri).map_err(|e| Error::Config(format!("Invalid uri '{}': {}", uri, e)))?;
            assertion.require_str("suite")?;
            assertion.param_list("components")?;
        }

        if let Some(key_url) = assertion.param_str("key_url") {
            let url = Url::parse(key_url)
                .map_err(|e| Error::Config(format!("Invalid key_url '{}': {}", key_url, e)))?;
            if !matches!(url.scheme(), "http" | "https" | "file") {
                return Err(Error::Config(format!(
                    "key_url scheme '{}' is not supported",
                    url.scheme()
                )));
            }
        }
        if let Some(keyring) = assertion.param_str("keyring") {
            if !keyring.starts_with('/') {
                return Err(Error::Config(format!("Keyring path '{}' must be absolute", keyring)));
            }
        }
        assertion.param_bool("update_cache", true)?;
        Ok(())
    }

    fn required_tools(&self, assertion: &StateAssertion) -> Vec<String> {
        let mut tools = Vec::new();
        let present = assertion.desired_state == DesiredState::Present;
        if present && assertion.param_str("key_url").is_some() {
            tools.push("gpg".to_string());
        }
        if assertion.param_bool("update_cache", true).unwrap_or(true) {
            tools.push("apt-get".to_string());
        }
        tools
    }

    fn check(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<CurrentState> {
        let name = assertion.require_str("name")?;
        let list = ctx.resolve(&list_path(name));

        if assertion.desired_state == DesiredState::Absent {
            return Ok(CurrentState::from_match(
                !list.exists(),
                format!("{} exists", list.display()),
            ));
        }

        let wanted = source_line(assertion)?;
        match fs::read_to_string(&list) {
            Ok(current) if current == wanted => {}
            Ok(_) => return Ok(CurrentState::drifted(format!("{} differs", list.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CurrentState::drifted(format!("{} is missing", list.display())));
            }
            Err(e) => {
                return Err(Error::CheckFailure(format!("Cannot read {}: {}", list.display(), e)));
            }
        }

        if let Some(keyring) = keyring_path(assertion)? {
            let keyring = ctx.resolve(&keyring);
            if !keyring.exists() {
                return Ok(CurrentState::drifted(format!(
                    "keyring {} is missing",
                    keyring.display()
                )));
            }
        }

        Ok(CurrentState::Satisfied)
    }

    fn apply(&self, assertion: &StateAssertion, ctx: &ModuleContext<'_>) -> Result<Outcome> {
        let name = assertion.require_str("name")?;
        let list = ctx.resolve(&list_path(name));
        let mut actions = Vec::new();

        if assertion.desired_state == DesiredState::Absent {
            if list.exists() {
                fs::remove_file(&list)?;
                actions.push(format!("removed {}", list.display()));
            }
            let fetched = assertion.param_str("key_url").is_some();
            if let (true, Some(keyring)) = (fetched, keyring_path(assertion)?) {
                let keyring = ctx.resolve(&keyring);
                if keyring.exists() {
                    fs::remove_file(&keyring)?;
                    actions.push(format!("removed {}", keyring.display()));
                }
            }
        } else {
            if let Some(keyring) = keyring_path(assertion)? {
                let keyring = ctx.resolve(&keyring);
                if !keyring.exists() {
                    let key_url = assertion.param_str("key_url").ok_or_else(|| {
                        Error::ApplyFailure(format!(
                            "keyring {} missing and no key_url to fetch it",
                            keyring.display()
                        ))
                    })?;
                    let key = fetch_key(key_url, ctx.timeout)?;
                    install_keyring(&key, &keyring, ctx)?;
                    actions.push(format!("installed keyring {}", keyring.display()));
                }
            }

            let wanted = source_line(assertion)?;
            if fs::read_to_string(&list).ok().as_deref() != Some(wanted.as_str()) {
                write_atomic(&list, wanted.as_bytes(), Some(0o644))?;
                actions.push(format!("wrote {}", list.display()));
            }
        }

        if !actions.is_empty() && assertion.param_bool("update_cache", true)? {
            ctx.run_checked(apt_get(ctx).args(["update", "-q"]))?;
        }

        if actions.is_empty() {
            debug!("Repository {} already configured", name);
            return Ok(Outcome::unchanged(
                &assertion.identifier,
                format!("repository {} already configured", name),
            ));
        }

        let message = actions.join(", ");
        info!("Repository {}: {}", name, message);
        Ok(Outcome::changed(&assertion.identifier, message))
    }
}
