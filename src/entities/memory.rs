// src/entities/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use super::{
    Configuration, ConfigurationProvider, Credentials, CredentialsProvider, EntityProvider,
    Function, RunRepository, Task, Workflow,
};
use crate::errors::{EngineError, Result};
use crate::run::Run;

/// Tasks, functions and workflows held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryEntities {
    tasks: RwLock<HashMap<String, Task>>,
    functions: RwLock<HashMap<String, Function>>,
    workflows: RwLock<HashMap<String, Workflow>>,
}

impl InMemoryEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_task(&self, task: Task) {
        self.tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id.clone(), task);
    }

    pub fn insert_function(&self, function: Function) {
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(function.id.clone(), function);
    }

    pub fn insert_workflow(&self, workflow: Workflow) {
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(workflow.id.clone(), workflow);
    }
}

fn lookup<T: Clone>(map: &RwLock<HashMap<String, T>>, what: &str, id: &str) -> Result<T> {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(id)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("{what} '{id}'")))
}

impl EntityProvider for InMemoryEntities {
    fn get_task(&self, id: &str) -> Result<Task> {
        lookup(&self.tasks, "task", id)
    }

    fn get_function(&self, id: &str) -> Result<Function> {
        lookup(&self.functions, "function", id)
    }

    fn get_workflow(&self, id: &str) -> Result<Workflow> {
        lookup(&self.workflows, "workflow", id)
    }
}

/// Fixed credentials per principal; `None` principal maps to the `""` entry.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    by_principal: BTreeMap<String, Vec<Credentials>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, principal: &str, credentials: Credentials) -> Self {
        self.by_principal
            .entry(principal.to_string())
            .or_default()
            .push(credentials);
        self
    }
}

impl CredentialsProvider for StaticCredentials {
    fn get_credentials(&self, principal: Option<&str>) -> Result<Vec<Credentials>> {
        Ok(self
            .by_principal
            .get(principal.unwrap_or_default())
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticConfigurations {
    configurations: Vec<Configuration>,
}

impl StaticConfigurations {
    pub fn new(configurations: Vec<Configuration>) -> Self {
        Self { configurations }
    }
}

impl ConfigurationProvider for StaticConfigurations {
    fn get_configurations(&self) -> Result<Vec<Configuration>> {
        Ok(self.configurations.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRunRepository {
    runs: RwLock<HashMap<String, Run>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunRepository for InMemoryRunRepository {
    fn find(&self, id: &str) -> Result<Option<Run>> {
        Ok(self
            .runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn save(&self, run: &Run) -> Result<()> {
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.id.clone(), run.clone());
        Ok(())
    }
}
