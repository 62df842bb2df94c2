use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use aiden_core::error::{AidenError, Result};

use crate::agent::Agent;

/// Agents by name, as referenced from the phase table.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the agent's own name, replacing any previous entry.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        info!(agent = %name, "Registered agent");
        self.agents.insert(name, agent);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| AidenError::not_found("Agent", name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}
