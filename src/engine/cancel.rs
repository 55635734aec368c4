// src/engine/cancel.rs

//! Cooperative cancellation
//!
//! The engine polls the token before starting each assertion. An external
//! command that is already running is left to finish or fail on its own.

use crate::error::{Error, Result};
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use std::ffi::c_int;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

static SIGNAL_TOKEN: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn handle_signal(_signal: c_int) {
    if let Some(token) = SIGNAL_TOKEN.get() {
        token.cancel();
    }
}

/// Route SIGINT and SIGTERM to `token`.
///
/// The handler resets itself after the first delivery, so a second
/// signal terminates the process the usual way.
pub fn cancel_on_signals(token: &CancelToken) -> Result<()> {
    if SIGNAL_TOKEN.set(token.clone()).is_err() {
        return Err(Error::Config("Signal handlers are already installed".to_string()));
    }

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESTART | SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );

    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only performs an atomic store
        unsafe { sigaction(signal, &action) }
            .map_err(|e| Error::IoError(format!("Failed to install {} handler: {}", signal, e)))?;
        debug!("Installed cancellation handler for {}", signal);
    }

    Ok(())
}
