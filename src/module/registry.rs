// src/module/registry.rs

//! Module registry
//!
//! Maps assertion kinds to the module that handles them. New kinds are
//! added by registering a module; nothing else in the engine or the
//! harness needs to change.

use super::{
    ExtensionModule, FileModule, GroupMemberModule, PackageModule, RepositoryModule,
    ServiceModule, StateModule,
};
use crate::error::{Error, Result};
use crate::plan::{Plan, TagFilter};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Kind string to module lookup
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn StateModule>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in module
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_module(PackageModule);
        registry.register_module(ServiceModule);
        registry.register_module(FileModule);
        registry.register_module(GroupMemberModule);
        registry.register_module(RepositoryModule);
        registry.register_module(ExtensionModule);
        registry
    }

    /// Associate a kind with a module, returning any module it replaces
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        module: Arc<dyn StateModule>,
    ) -> Option<Arc<dyn StateModule>> {
        let kind = kind.into();
        debug!("Registering module for kind '{}'", kind);
        self.modules.insert(kind, module)
    }

    /// Register a module under its own kind
    pub fn register_module<M: StateModule + 'static>(&mut self, module: M) {
        let kind = module.kind();
        self.register(kind, Arc::new(module));
    }

    /// Find the module for a kind
    pub fn resolve(&self, kind: &str) -> Result<&dyn StateModule> {
        self.modules
            .get(kind)
            .map(|m| m.as_ref())
            .ok_or_else(|| Error::UnknownKind {
                kind: kind.to_string(),
                identifier: None,
            })
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    /// Validate every assertion in the plan before anything runs.
    ///
    /// Covers structure (unique names and identifiers), kind resolution,
    /// supported desired states, and module parameter checks.
    pub fn validate_plan(&self, plan: &Plan) -> Result<()> {
        plan.check_structure()?;

        for group in &plan.groups {
            for assertion in &group.assertions {
                let module = self.resolve(&assertion.kind).map_err(|_| Error::UnknownKind {
                    kind: assertion.kind.clone(),
                    identifier: Some(assertion.label(&group.name)),
                })?;

                if !module.supported_states().contains(&assertion.desired_state) {
                    return Err(Error::Config(format!(
                        "'{}' does not support state '{}' (supported: {})",
                        assertion.label(&group.name),
                        assertion.desired_state,
                        module
                            .supported_states()
                            .iter()
                            .map(|s| s.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )));
                }

                module.validate(assertion).map_err(|e| match e {
                    Error::Config(msg) => {
                        Error::Config(format!("{}: {}", assertion.label(&group.name), msg))
                    }
                    other => other,
                })?;
            }
        }

        Ok(())
    }

    /// External tools needed by the selected assertions, with the first
    /// assertion that needs each one
    pub fn required_tools(&self, plan: &Plan, filter: &TagFilter) -> Result<Vec<(String, String)>> {
        let mut seen = BTreeSet::new();
        let mut tools = Vec::new();

        for group in &plan.groups {
            for assertion in group.selected(filter) {
                let module = self.resolve(&assertion.kind)?;
                for tool in module.required_tools(assertion) {
                    if seen.insert(tool.clone()) {
                        tools.push((tool, assertion.label(&group.name)));
                    }
                }
            }
        }

        Ok(tools)
    }
}
