//! Agent registry
//!
//! The map is only locked for lookup and insert. Each agent sits behind its
//! own async mutex, so submissions for different agents never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::agent::{Agent, AgentId};
use crate::error::LedgerError;

pub type AgentHandle = Arc<Mutex<Agent>>;

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, AgentHandle>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &AgentId) -> Option<AgentHandle> {
        self.agents.read().await.get(id).cloned()
    }

    /// Existing handle, or a new agent seeded with `initial_reputation`
    pub async fn get_or_register(&self, id: &AgentId, initial_reputation: i64) -> AgentHandle {
        if let Some(handle) = self.get(id).await {
            return handle;
        }
        let mut agents = self.agents.write().await;
        agents
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Agent::new(id.clone(), initial_reputation))))
            .clone()
    }

    /// Insert a new agent; fails if the id is taken
    pub async fn insert(&self, agent: Agent) -> Result<AgentHandle, LedgerError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(agent.id()) {
            return Err(LedgerError::AlreadyRegistered(agent.id().to_string()));
        }
        let id = agent.id().clone();
        let handle = Arc::new(Mutex::new(agent));
        agents.insert(id, handle.clone());
        Ok(handle)
    }

    /// Handles sorted by agent id
    pub async fn handles(&self) -> Vec<(AgentId, AgentHandle)> {
        let agents = self.agents.read().await;
        let mut all: Vec<_> = agents
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}
