//! The operation surface of the control node.
//!
//! [`Orchestrator`] composes the [`AgentRegistry`] and the [`SessionLedger`].
//! Each store is consistent on its own; operations that touch both (such as
//! checking an agent before opening a session for it) are not atomic across
//! the two. A session may end up referencing an agent that disconnected a
//! moment later, which is acceptable because sessions only hold the agent id.

use crate::agent::{Agent, AgentInfo};
use crate::config::FlotillaConfig;
use crate::error::OrchestrationError;
use crate::ids::IdGenerator;
use crate::ledger::{LedgerSettings, SessionLedger, StopOutcome};
use crate::registry::AgentRegistry;
use crate::session::{ProgressDelta, Session, SessionSpec, SessionStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Parameters for [`Orchestrator::start_session`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartSession {
    pub target_binary: String,
    pub input_dir: String,
    /// Defaults to `afl_output_<unix-seconds>` when absent.
    #[serde(default)]
    pub output_dir: Option<String>,
    /// Defaults to the earliest-registered connected agent when absent.
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// Aggregate counts across both stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub total_agents: usize,
    pub connected_agents: usize,
    pub total_sessions: usize,
    /// Sessions in `starting` or `running`.
    pub active_sessions: usize,
    pub sessions_by_status: BTreeMap<SessionStatus, usize>,
}

#[derive(Debug, Default)]
pub struct Orchestrator {
    registry: AgentRegistry,
    ledger: SessionLedger,
    agent_ids: IdGenerator,
}

impl Orchestrator {
    pub fn new(settings: LedgerSettings) -> Self {
        Self::with_stores(AgentRegistry::new(), SessionLedger::new(settings))
    }

    pub fn from_config(config: &FlotillaConfig) -> Self {
        Self::new(config.ledger.settings())
    }

    pub fn with_stores(registry: AgentRegistry, ledger: SessionLedger) -> Self {
        Self {
            registry,
            ledger,
            agent_ids: IdGenerator::new(),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Registers an agent, generating an id when the caller supplies none.
    pub fn register_agent(
        &self,
        id: Option<&str>,
        info: AgentInfo,
    ) -> Result<Agent, OrchestrationError> {
        let agent = match id {
            Some(id) => self.registry.register(id, info)?,
            None => self.registry.register(&self.agent_ids.next_id(), info)?,
        };
        Ok(agent)
    }

    /// Removes an agent. Its sessions are left in place.
    pub fn unregister_agent(&self, id: &str) -> bool {
        self.registry.unregister(id)
    }

    pub fn heartbeat(&self, id: &str) -> Result<Agent, OrchestrationError> {
        Ok(self.registry.heartbeat(id)?)
    }

    pub fn get_agent(&self, id: &str) -> Result<Agent, OrchestrationError> {
        self.registry
            .get(id)
            .ok_or_else(|| OrchestrationError::AgentNotFound(id.to_string()))
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        self.registry.list()
    }

    pub fn is_agent_connected(&self, id: &str) -> bool {
        self.registry.is_connected(id)
    }

    /// Opens a session on a specific agent, which must exist and be connected.
    pub fn create_session(
        &self,
        agent_id: &str,
        target_binary: &str,
        input_dir: &str,
        output_dir: &str,
    ) -> Result<Session, OrchestrationError> {
        require_non_empty("target_binary", target_binary)?;
        require_non_empty("input_dir", input_dir)?;
        require_non_empty("output_dir", output_dir)?;

        let agent = self.get_agent(agent_id)?;
        if !agent.is_connected() {
            return Err(OrchestrationError::AgentNotConnected(agent.id));
        }

        let session = self.ledger.create(SessionSpec {
            agent_id: agent.id,
            target_binary: target_binary.to_string(),
            input_dir: input_dir.to_string(),
            output_dir: output_dir.to_string(),
        })?;
        Ok(session)
    }

    /// Opens a session, picking the agent and output directory if not given.
    pub fn start_session(&self, request: StartSession) -> Result<Session, OrchestrationError> {
        let agent_id = match request.agent_id {
            Some(id) => id,
            None => {
                self.registry
                    .first_connected()
                    .ok_or(OrchestrationError::NoAgentAvailable)?
                    .id
            }
        };
        let output_dir = request
            .output_dir
            .unwrap_or_else(|| format!("afl_output_{}", Utc::now().timestamp()));

        let session = self.create_session(
            &agent_id,
            &request.target_binary,
            &request.input_dir,
            &output_dir,
        )?;
        info!(session_id = %session.id, agent_id = %agent_id, "session started");
        Ok(session)
    }

    pub fn update_session_status(
        &self,
        id: &str,
        status: SessionStatus,
        progress: Option<&ProgressDelta>,
    ) -> Result<Session, OrchestrationError> {
        Ok(self.ledger.update_status(id, status, progress)?)
    }

    pub fn get_session(&self, id: &str) -> Result<Session, OrchestrationError> {
        self.ledger
            .get(id)
            .ok_or_else(|| OrchestrationError::SessionNotFound(id.to_string()))
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.ledger.list()
    }

    /// Records the intent to stop; see [`SessionLedger::stop`].
    pub fn stop_session(&self, id: &str) -> Result<StopOutcome, OrchestrationError> {
        Ok(self.ledger.stop(id)?)
    }

    pub fn reopen_session(&self, id: &str) -> Result<Session, OrchestrationError> {
        Ok(self.ledger.reopen(id)?)
    }

    pub fn cleanup_session(&self, id: &str) -> bool {
        self.ledger.cleanup(id)
    }

    pub fn system_status(&self) -> SystemStatus {
        let (total_agents, connected_agents) = self.registry.counts();
        let sessions_by_status = self.ledger.status_counts();
        let total_sessions: usize = sessions_by_status.values().sum();
        let active_sessions: usize = sessions_by_status
            .iter()
            .filter(|(status, _)| status.is_active())
            .map(|(_, count)| count)
            .sum();
        SystemStatus {
            total_agents,
            connected_agents,
            total_sessions,
            active_sessions,
            sessions_by_status,
        }
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), OrchestrationError> {
    if value.trim().is_empty() {
        return Err(OrchestrationError::InvalidRequest(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::liveness::LivenessSweep;
    use chrono::TimeDelta;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(LedgerSettings::default())
    }

    fn start(agent_id: Option<&str>) -> StartSession {
        StartSession {
            target_binary: "/bin/t".to_string(),
            input_dir: "/in".to_string(),
            output_dir: Some("/out".to_string()),
            agent_id: agent_id.map(str::to_string),
        }
    }

    #[test]
    fn full_session_lifecycle() {
        let orch = orchestrator();
        orch.register_agent(Some("A1"), AgentInfo::new()).unwrap();

        let s1 = orch.create_session("A1", "/bin/t", "/in", "/out").unwrap();
        assert_eq!(s1.status, SessionStatus::Created);

        orch.update_session_status(&s1.id, SessionStatus::Starting, None)
            .unwrap();
        orch.update_session_status(
            &s1.id,
            SessionStatus::Running,
            Some(&ProgressDelta {
                paths_found: Some(5),
                ..Default::default()
            }),
        )
        .unwrap();

        let running = orch.get_session(&s1.id).unwrap();
        assert_eq!(running.status, SessionStatus::Running);
        assert_eq!(running.progress.paths_found, 5);
        assert_eq!(running.progress.execs_done, 0);

        let stopped = orch.stop_session(&s1.id).unwrap();
        assert_eq!(stopped.session.status, SessionStatus::Stopped);
        assert!(!stopped.already_terminal);

        assert!(orch.cleanup_session(&s1.id));
        match orch.get_session(&s1.id) {
            Err(OrchestrationError::SessionNotFound(id)) => assert_eq!(id, s1.id),
            other => panic!("Expected SessionNotFound after cleanup, got {other:?}"),
        }
    }

    #[test]
    fn register_without_id_generates_one() {
        let orch = orchestrator();
        let agent = orch.register_agent(None, AgentInfo::new()).unwrap();
        assert_eq!(agent.id.len(), 32);
        assert!(orch.is_agent_connected(&agent.id));
    }

    #[test]
    fn create_session_checks_agent_preconditions() {
        let orch = orchestrator();
        assert_eq!(
            orch.create_session("ghost", "/bin/t", "/in", "/out"),
            Err(OrchestrationError::AgentNotFound("ghost".to_string()))
        );

        let t0 = Utc::now() - TimeDelta::seconds(600);
        orch.registry()
            .register_at("A1", AgentInfo::new(), t0)
            .unwrap();
        LivenessSweep::new(Duration::from_secs(60)).sweep(orch.registry(), Utc::now());

        let err = orch
            .create_session("A1", "/bin/t", "/in", "/out")
            .unwrap_err();
        assert_eq!(err, OrchestrationError::AgentNotConnected("A1".to_string()));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(orch.list_sessions().is_empty());
    }

    #[test]
    fn create_session_rejects_empty_paths() {
        let orch = orchestrator();
        orch.register_agent(Some("A1"), AgentInfo::new()).unwrap();
        match orch.create_session("A1", "", "/in", "/out") {
            Err(OrchestrationError::InvalidRequest(msg)) => assert!(msg.contains("target_binary")),
            other => panic!("Expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn start_session_without_agents_reports_no_agent_available() {
        let orch = orchestrator();
        assert_eq!(
            orch.start_session(start(None)),
            Err(OrchestrationError::NoAgentAvailable)
        );
    }

    #[test]
    fn start_session_picks_first_connected_agent() {
        let orch = orchestrator();
        let t0 = Utc::now();
        orch.registry()
            .register_at("old", AgentInfo::new(), t0 - TimeDelta::seconds(600))
            .unwrap();
        orch.registry()
            .register_at("fresh", AgentInfo::new(), t0)
            .unwrap();
        orch.registry()
            .register_at("later", AgentInfo::new(), t0)
            .unwrap();
        LivenessSweep::new(Duration::from_secs(60)).sweep(orch.registry(), t0);

        let session = orch.start_session(start(None)).unwrap();
        assert_eq!(session.agent_id, "fresh");
    }

    #[test]
    fn start_session_with_explicit_agent_distinguishes_missing_and_disconnected() {
        let orch = orchestrator();
        assert_eq!(
            orch.start_session(start(Some("ghost"))),
            Err(OrchestrationError::AgentNotFound("ghost".to_string()))
        );

        orch.registry()
            .register_at("A1", AgentInfo::new(), Utc::now() - TimeDelta::seconds(600))
            .unwrap();
        LivenessSweep::new(Duration::from_secs(1)).sweep(orch.registry(), Utc::now());
        assert_eq!(
            orch.start_session(start(Some("A1"))),
            Err(OrchestrationError::AgentNotConnected("A1".to_string()))
        );
    }

    #[test]
    fn start_session_defaults_output_dir() {
        let orch = orchestrator();
        orch.register_agent(Some("A1"), AgentInfo::new()).unwrap();
        let session = orch
            .start_session(StartSession {
                output_dir: None,
                ..start(None)
            })
            .unwrap();
        assert!(
            session.output_dir.starts_with("afl_output_"),
            "Unexpected default output dir {}",
            session.output_dir
        );
    }

    #[test]
    fn sessions_survive_agent_unregistration() {
        let orch = orchestrator();
        orch.register_agent(Some("A1"), AgentInfo::new()).unwrap();
        let session = orch.create_session("A1", "/bin/t", "/in", "/out").unwrap();

        assert!(orch.unregister_agent("A1"));
        let kept = orch.get_session(&session.id).unwrap();
        assert_eq!(kept.agent_id, "A1");
    }

    #[test]
    fn stop_session_is_idempotent_for_completed_sessions() {
        let orch = orchestrator();
        orch.register_agent(Some("A1"), AgentInfo::new()).unwrap();
        let id = orch.create_session("A1", "/bin/t", "/in", "/out").unwrap().id;
        for status in [
            SessionStatus::Starting,
            SessionStatus::Running,
            SessionStatus::Completed,
        ] {
            orch.update_session_status(&id, status, None).unwrap();
        }
        let before = orch.get_session(&id).unwrap();

        let outcome = orch.stop_session(&id).unwrap();
        assert!(outcome.already_terminal);
        assert_eq!(outcome.session, before);
    }

    #[test]
    fn operations_on_unknown_sessions_are_not_found() {
        let orch = orchestrator();
        for err in [
            orch.stop_session("nope").unwrap_err(),
            orch.update_session_status("nope", SessionStatus::Running, None)
                .unwrap_err(),
            orch.reopen_session("nope").unwrap_err(),
        ] {
            assert_eq!(err, OrchestrationError::SessionNotFound("nope".to_string()));
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
        assert!(!orch.cleanup_session("nope"));
    }

    #[test]
    fn system_status_counts_agents_and_active_sessions() {
        let orch = orchestrator();
        orch.register_agent(Some("A1"), AgentInfo::new()).unwrap();
        orch.register_agent(Some("A2"), AgentInfo::new()).unwrap();

        let a = orch.create_session("A1", "/bin/t", "/in", "/out").unwrap().id;
        let b = orch.create_session("A2", "/bin/t", "/in", "/out").unwrap().id;
        orch.create_session("A2", "/bin/t", "/in", "/out").unwrap();
        orch.update_session_status(&a, SessionStatus::Starting, None)
            .unwrap();
        orch.update_session_status(&b, SessionStatus::Starting, None)
            .unwrap();
        orch.update_session_status(&b, SessionStatus::Running, None)
            .unwrap();
        orch.unregister_agent("A2");

        let status = orch.system_status();
        assert_eq!(status.total_agents, 1);
        assert_eq!(status.connected_agents, 1);
        assert_eq!(status.total_sessions, 3);
        assert_eq!(status.active_sessions, 2);
        assert_eq!(status.sessions_by_status[&SessionStatus::Created], 1);
    }

    #[test]
    fn session_creation_racing_unregistration_stays_consistent() {
        let orch = Arc::new(orchestrator());
        orch.register_agent(Some("A1"), AgentInfo::new()).unwrap();

        let creators: Vec<_> = (0..8)
            .map(|_| {
                let orch = Arc::clone(&orch);
                thread::spawn(move || orch.create_session("A1", "/bin/t", "/in", "/out"))
            })
            .collect();
        let remover = {
            let orch = Arc::clone(&orch);
            thread::spawn(move || orch.unregister_agent("A1"))
        };

        let mut created = 0;
        for handle in creators {
            match handle.join().expect("creator thread panicked") {
                Ok(session) => {
                    assert_eq!(session.agent_id, "A1");
                    created += 1;
                }
                Err(err) => assert_eq!(err, OrchestrationError::AgentNotFound("A1".to_string())),
            }
        }
        assert!(remover.join().expect("remover thread panicked"));

        assert_eq!(orch.list_sessions().len(), created);
        assert!(orch.list_agents().is_empty());
        let status = orch.system_status();
        assert_eq!(status.total_agents, 0);
        assert_eq!(status.total_sessions, created);
    }
}
