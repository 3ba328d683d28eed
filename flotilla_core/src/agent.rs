use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration metadata supplied by an agent (platform, capabilities, ...).
///
/// The control node stores it verbatim and never interprets it.
pub type AgentInfo = serde_json::Map<String, serde_json::Value>;

/// Whether the control node currently considers an agent reachable.
///
/// This is the single source of truth for agent connectivity; there is no
/// separate active/inactive flag to keep in sync with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    #[default]
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn is_connected(self) -> bool {
        matches!(self, Connectivity::Connected)
    }
}

/// A remote worker registered with the control node.
///
/// Snapshots handed out by the registry are clones; mutating one has no effect
/// on the stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub info: AgentInfo,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub connectivity: Connectivity,
}

impl Agent {
    pub fn new(id: String, info: AgentInfo, now: DateTime<Utc>) -> Self {
        Self {
            id,
            info,
            registered_at: now,
            last_heartbeat: now,
            connectivity: Connectivity::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected()
    }

    /// Refreshes the heartbeat timestamp and marks the agent connected.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = now;
        self.connectivity = Connectivity::Connected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    #[test]
    fn new_agent_starts_connected_with_matching_timestamps() {
        let now = Utc::now();
        let agent = Agent::new("A1".to_string(), AgentInfo::new(), now);
        assert!(agent.is_connected());
        assert_eq!(agent.registered_at, now);
        assert_eq!(agent.last_heartbeat, now);
    }

    #[test]
    fn touch_reconnects_and_moves_heartbeat_forward() {
        let start = Utc::now();
        let mut agent = Agent::new("A1".to_string(), AgentInfo::new(), start);
        agent.connectivity = Connectivity::Disconnected;

        let later = start + TimeDelta::seconds(30);
        agent.touch(later);

        assert!(agent.is_connected());
        assert_eq!(agent.last_heartbeat, later);
        assert_eq!(
            agent.registered_at, start,
            "Heartbeat must not rewrite the registration time"
        );
    }

    #[test]
    fn connectivity_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_value(Connectivity::Disconnected).unwrap(),
            json!("disconnected")
        );
    }
}
