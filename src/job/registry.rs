use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{Job, JobContext};
use crate::error::{ResourceError, Result};
use crate::jobs;

/// Builds a job instance around its context.
pub type JobFactory = Arc<dyn Fn(JobContext) -> Box<dyn Job> + Send + Sync>;

/// Command name to job implementation.
#[derive(Clone, Default)]
pub struct JobRegistry {
    factories: BTreeMap<String, JobFactory>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the jobs shipped with the resource.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        jobs::register_builtins(&mut registry);
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(JobContext) -> Box<dyn Job> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(&self, name: &str, ctx: JobContext) -> Result<Box<dyn Job>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ResourceError::Load(name.to_string()))?;
        Ok(factory(ctx))
    }
}
