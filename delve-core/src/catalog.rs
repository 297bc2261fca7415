//! Named agent factories.
//!
//! The CLI looks agents up by name. Factories run on every load, so each
//! caller gets an agent with its own virtual filesystem.

use crate::error::ConfigError;
use crate::orchestrator::Agent;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

type AgentFactory = Arc<dyn Fn() -> Result<Agent, ConfigError> + Send + Sync>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("Agent name must not be empty")]
    EmptyName,

    #[error("Unknown agent '{name}'. Available: {available}")]
    NotFound { name: String, available: String },

    #[error("Failed to build agent '{name}': {source}")]
    Build {
        name: String,
        #[source]
        source: ConfigError,
    },
}

/// Agent factories keyed by name.
#[derive(Clone, Default)]
pub struct AgentCatalog {
    factories: BTreeMap<String, AgentFactory>,
}

impl fmt::Debug for AgentCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCatalog")
            .field("agents", &self.list_agents())
            .finish()
    }
}

impl AgentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Agent, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Registered names, sorted.
    pub fn list_agents(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn load_agent(&self, name: &str) -> Result<Agent, CatalogError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CatalogError::EmptyName);
        }
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CatalogError::NotFound {
                name: name.to_string(),
                available: self.list_agents().join(", "),
            })?;
        log::debug!("Loading agent '{}'", name);
        factory().map_err(|source| CatalogError::Build {
            name: name.to_string(),
            source,
        })
    }
}
