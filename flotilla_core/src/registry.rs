use crate::agent::{Agent, AgentInfo, Connectivity};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by [`AgentRegistry`] operations.
///
/// Unregistering an unknown agent is not an error; it simply reports `false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Agent identities must contain at least one non-whitespace character.
    #[error("Agent id must not be empty")]
    EmptyAgentId,
    /// The agent is not registered.
    #[error("Agent {0} is not registered")]
    AgentNotFound(String),
}

#[derive(Debug, Default)]
struct RegistryState {
    agents: HashMap<String, Agent>,
    /// Registration order; an id stays in place when it is re-registered.
    order: Vec<String>,
}

/// The control node's record of registered agents.
///
/// Registration and connectivity live in the same record, so an agent can never
/// be "connected" without being registered or the other way round. Every
/// read-then-write runs under a single write guard, and readers only ever see
/// cloned snapshots of whole records.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    state: RwLock<RegistryState>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id`, or refreshes it if it is already known.
    ///
    /// Re-registration overwrites `info`, resets both timestamps and marks the
    /// agent connected. It never creates a second record.
    pub fn register(&self, id: &str, info: AgentInfo) -> Result<Agent, RegistryError> {
        self.register_at(id, info, Utc::now())
    }

    pub fn register_at(
        &self,
        id: &str,
        info: AgentInfo,
        now: DateTime<Utc>,
    ) -> Result<Agent, RegistryError> {
        if id.trim().is_empty() {
            return Err(RegistryError::EmptyAgentId);
        }

        let mut state = self.state.write();
        let agent = Agent::new(id.to_string(), info, now);
        let previous = state.agents.insert(id.to_string(), agent.clone());
        if previous.is_none() {
            state.order.push(id.to_string());
            info!(agent_id = id, "agent registered");
        } else {
            info!(agent_id = id, "agent re-registered");
        }
        Ok(agent)
    }

    /// Removes the agent. Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        let mut state = self.state.write();
        if state.agents.remove(id).is_none() {
            return false;
        }
        state.order.retain(|known| known != id);
        info!(agent_id = id, "agent unregistered");
        true
    }

    /// Records a heartbeat, which also marks the agent connected again.
    pub fn heartbeat(&self, id: &str) -> Result<Agent, RegistryError> {
        self.heartbeat_at(id, Utc::now())
    }

    pub fn heartbeat_at(&self, id: &str, now: DateTime<Utc>) -> Result<Agent, RegistryError> {
        let mut state = self.state.write();
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::AgentNotFound(id.to_string()))?;
        agent.touch(now);
        debug!(agent_id = id, "heartbeat recorded");
        Ok(agent.clone())
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.state
            .read()
            .agents
            .get(id)
            .is_some_and(Agent::is_connected)
    }

    pub fn get(&self, id: &str) -> Option<Agent> {
        self.state.read().agents.get(id).cloned()
    }

    /// Snapshots of every agent, in registration order.
    pub fn list(&self) -> Vec<Agent> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.agents.get(id).cloned())
            .collect()
    }

    /// The earliest-registered agent that is currently connected.
    pub fn first_connected(&self) -> Option<Agent> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.agents.get(id))
            .find(|agent| agent.is_connected())
            .cloned()
    }

    /// Marks every connected agent whose last heartbeat is older than `cutoff`
    /// as disconnected and returns their ids. Agents are never removed.
    pub fn disconnect_stale(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut state = self.state.write();
        let RegistryState { agents, order } = &mut *state;
        let mut stale = Vec::new();
        for id in order.iter() {
            if let Some(agent) = agents.get_mut(id) {
                if agent.is_connected() && agent.last_heartbeat < cutoff {
                    agent.connectivity = Connectivity::Disconnected;
                    stale.push(id.clone());
                }
            }
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.state.read().agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connected_count(&self) -> usize {
        self.counts().1
    }

    /// `(total, connected)` read under a single guard.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.state.read();
        let connected = state
            .agents
            .values()
            .filter(|agent| agent.is_connected())
            .count();
        (state.agents.len(), connected)
    }
}
