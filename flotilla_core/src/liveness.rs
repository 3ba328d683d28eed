use crate::registry::AgentRegistry;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tracing::warn;

/// Marks agents disconnected once their last heartbeat is older than a grace
/// period.
///
/// The sweep is never run implicitly by the registry or the orchestrator; the
/// caller decides when (and whether) to invoke it. It only flips connectivity
/// and never unregisters anyone.
#[derive(Debug, Clone, Copy)]
pub struct LivenessSweep {
    grace: TimeDelta,
}

impl LivenessSweep {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace: TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn grace(&self) -> TimeDelta {
        self.grace
    }

    pub fn sweep_now(&self, registry: &AgentRegistry) -> Vec<String> {
        self.sweep(registry, Utc::now())
    }

    /// Disconnects stale agents as of `now` and returns their ids.
    pub fn sweep(&self, registry: &AgentRegistry, now: DateTime<Utc>) -> Vec<String> {
        let Some(cutoff) = now.checked_sub_signed(self.grace) else {
            return Vec::new();
        };
        let stale = registry.disconnect_stale(cutoff);
        for agent_id in &stale {
            warn!(
                agent_id = %agent_id,
                grace_secs = self.grace.num_seconds(),
                "agent missed its heartbeat window, marking disconnected"
            );
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentInfo;

    #[test]
    fn agent_past_grace_period_is_disconnected() {
        let registry = AgentRegistry::new();
        let t0 = Utc::now();
        registry.register_at("A1", AgentInfo::new(), t0).unwrap();
        let sweep = LivenessSweep::new(Duration::from_secs(60));

        let stale = sweep.sweep(&registry, t0 + TimeDelta::seconds(61));
        assert_eq!(stale, vec!["A1".to_string()]);
        assert!(!registry.is_connected("A1"));
        assert!(
            registry.get("A1").is_some(),
            "Sweeping must not unregister the agent"
        );
    }

    #[test]
    fn agent_within_grace_period_stays_connected() {
        let registry = AgentRegistry::new();
        let t0 = Utc::now();
        registry.register_at("A1", AgentInfo::new(), t0).unwrap();
        let sweep = LivenessSweep::new(Duration::from_secs(60));

        assert!(sweep.sweep(&registry, t0 + TimeDelta::seconds(59)).is_empty());
        assert!(registry.is_connected("A1"));
    }

    #[test]
    fn heartbeat_restores_connectivity_after_sweep() {
        let registry = AgentRegistry::new();
        let t0 = Utc::now();
        registry.register_at("A1", AgentInfo::new(), t0).unwrap();
        let sweep = LivenessSweep::new(Duration::from_secs(60));
        let later = t0 + TimeDelta::seconds(120);
        sweep.sweep(&registry, later);
        assert!(!registry.is_connected("A1"));

        registry.heartbeat_at("A1", later).unwrap();
        assert!(registry.is_connected("A1"));
        assert!(sweep.sweep(&registry, later + TimeDelta::seconds(1)).is_empty());
    }

    #[test]
    fn already_disconnected_agents_are_not_reported_twice() {
        let registry = AgentRegistry::new();
        let t0 = Utc::now();
        registry.register_at("A1", AgentInfo::new(), t0).unwrap();
        let sweep = LivenessSweep::new(Duration::from_secs(1));

        assert_eq!(sweep.sweep(&registry, t0 + TimeDelta::seconds(5)).len(), 1);
        assert!(sweep.sweep(&registry, t0 + TimeDelta::seconds(10)).is_empty());
    }
}
