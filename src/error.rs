// src/error.rs

//! Error types for converge
//!
//! Load-time errors (`UnknownKind`, `Config`, `DuplicateIdentifier`,
//! `ExternalToolMissing`) are fatal and surface before anything on the
//! system is touched. Run-time errors from modules are captured by the
//! engine and turned into failed outcomes instead of aborting the run.

use std::time::Duration;
use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Assertion references a kind with no registered module
    #[error(
        "Unknown assertion kind '{kind}'{}",
        .identifier.as_ref().map(|id| format!(" (assertion '{}')", id)).unwrap_or_default()
    )]
    UnknownKind {
        kind: String,
        identifier: Option<String>,
    },

    /// A module's apply step failed
    #[error("Apply failed: {0}")]
    ApplyFailure(String),

    /// A module's check step could not determine current state
    #[error("Check failed: {0}")]
    CheckFailure(String),

    /// A depended-on external tool is not installed
    #[error("Required tool '{tool}' not found in PATH (needed by {needed_by})")]
    ExternalToolMissing { tool: String, needed_by: String },

    /// Malformed plan or invalid parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two assertions in one group share an identifier
    #[error("Duplicate assertion identifier '{identifier}' in group '{group}'")]
    DuplicateIdentifier { group: String, identifier: String },

    /// External command exceeded its deadline
    #[error("'{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    /// Another mutating run holds the lock
    #[error("Another run holds the lock at {0}")]
    Locked(String),

    /// Run was cancelled before completion
    #[error("Run cancelled")]
    Cancelled,

    /// Failed to fetch a remote resource
    #[error("Download failed: {0}")]
    DownloadError(String),

    /// Filesystem or process I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

impl Error {
    /// Whether this error occurred before any mutation could begin
    pub fn is_load_time(&self) -> bool {
        matches!(
            self,
            Error::UnknownKind { .. }
                | Error::Config(_)
                | Error::DuplicateIdentifier { .. }
                | Error::ExternalToolMissing { .. }
                | Error::TomlError(_)
        )
    }
}

/// Result type alias using converge's Error type
pub type Result<T> = std::result::Result<T, Error>;
