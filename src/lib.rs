// src/lib.rs

//! Converge
//!
//! Declarative workstation convergence with independent verification.
//!
//! # Architecture
//!
//! - Plans: ordered groups of state assertions loaded from TOML
//! - Modules: one per assertion kind, each with a read-only `check` and an
//!   idempotent `apply`
//! - Engine: converges the system group by group, failing fast within a
//!   group and never rolling back
//! - Harness: re-checks the same plan through separate probes, never
//!   calling `apply`
//! - Reports: one summary and exit code for the whole invocation

pub mod engine;
mod error;
pub mod module;
pub mod observer;
pub mod plan;
pub mod report;
pub mod runner;
pub mod scaffold;
pub mod verify;

pub use engine::{
    CancelToken, ConvergeOptions, ConvergenceEngine, Outcome, RunLock, RunReport, RunStatus,
    Skipped,
};
pub use error::{Error, Result};
pub use module::{CurrentState, ModuleContext, ModuleRegistry, StateModule};
pub use observer::{
    CallbackObserver, LineObserver, LogObserver, RunEvent, RunObserver, SilentObserver,
};
pub use plan::{
    CheckProbe, CheckSpec, DEFAULT_PLAN_PATH, DesiredState, Group, Plan, StateAssertion,
    TagFilter, Vars, load_plan,
};
pub use report::{Summary, aggregate};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use verify::{Harness, LiveProbe, SystemProbe, Verdict, VerificationResult};
