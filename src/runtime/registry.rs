// src/runtime/registry.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::{ContainerRuntime, PythonRuntime, Runtime, RuntimeBase, RuntimeSettings, WorkflowRuntime};
use crate::errors::{EngineError, Result};
use crate::run::Run;

/// Runtimes by kind. Kinds are unique; a second registration for the same
/// runtime kind, or for a run kind another runtime already claims, fails.
#[derive(Debug, Default, Clone)]
pub struct RuntimeRegistry {
    runtimes: BTreeMap<String, Arc<dyn Runtime>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container, python and workflow runtimes sharing one store.
    pub fn standard(base: RuntimeBase, settings: RuntimeSettings) -> Result<Self> {
        let settings = Arc::new(settings);
        let mut registry = Self::new();
        registry.register(Arc::new(ContainerRuntime::new(base.clone(), Arc::clone(&settings))))?;
        registry.register(Arc::new(PythonRuntime::new(base.clone(), Arc::clone(&settings))))?;
        registry.register(Arc::new(WorkflowRuntime::new(base, settings)))?;
        Ok(registry)
    }

    pub fn register(&mut self, runtime: Arc<dyn Runtime>) -> Result<()> {
        let kind = runtime.kind().to_string();
        if self.runtimes.contains_key(&kind) {
            return Err(EngineError::DuplicateRuntime(kind));
        }
        for run_kind in runtime.run_kinds() {
            if self.runtimes.values().any(|r| r.run_kinds().contains(run_kind)) {
                return Err(EngineError::DuplicateRuntime((*run_kind).to_string()));
            }
        }
        debug!(runtime = %kind, run_kinds = ?runtime.run_kinds(), "runtime registered");
        self.runtimes.insert(kind, runtime);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn Runtime>> {
        self.runtimes
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no runtime registered for kind '{kind}'")))
    }

    /// Runtime responsible for `run`, checking the full run kind too.
    pub fn for_run(&self, run: &Run) -> Result<Arc<dyn Runtime>> {
        let runtime = self.get(run.runtime_kind())?;
        if !runtime.run_kinds().iter().any(|k| *k == run.kind) {
            return Err(EngineError::InvalidArgument(format!(
                "runtime '{}' does not support run kind '{}'",
                runtime.kind(),
                run.kind
            )));
        }
        Ok(runtime)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.runtimes.keys().map(String::as_str)
    }

    pub fn run_kinds(&self) -> Vec<&'static str> {
        self.runtimes
            .values()
            .flat_map(|r| r.run_kinds().iter().copied())
            .collect()
    }
}
