use crate::ids::IdGenerator;
use crate::session::{ProgressDelta, Session, SessionSpec, SessionStatus};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by [`SessionLedger`] operations.
///
/// A failed mutation never leaves a partially applied change behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// No session with this id exists.
    #[error("Session {0} not found")]
    SessionNotFound(String),

    /// The requested status change does not follow the session state machine.
    #[error("Session {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: String,
        from: SessionStatus,
        to: SessionStatus,
    },

    /// Only sessions in a terminal status can be re-opened.
    #[error("Session {id} is {status}; only terminal sessions can be re-opened")]
    NotReopenable { id: String, status: SessionStatus },

    /// Re-opening sessions is switched off in the ledger settings.
    #[error("Re-opening sessions is disabled")]
    ReopenDisabled,

    /// A progress report carried a negative or non-finite execution rate.
    #[error("Session {0} progress report has an invalid execs_per_sec value")]
    InvalidProgress(String),

    /// The identity generator produced an id that is already in use.
    #[error("Generated session id {0} collides with an existing session")]
    IdentityCollision(String),
}

/// Behavioural switches for the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Reject status updates that do not follow the state machine.
    /// When off, any status overwrites any other and a warning is logged.
    pub strict_transitions: bool,
    /// Allow terminal sessions to be explicitly moved back to `created`.
    pub allow_reopen: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            strict_transitions: true,
            allow_reopen: true,
        }
    }
}

/// Result of a stop request. Serializes as the session record itself with
/// an extra `already_terminal` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOutcome {
    #[serde(flatten)]
    pub session: Session,
    /// `true` when the session was already terminal and was left unchanged.
    pub already_terminal: bool,
}

/// Owner of every session record.
///
/// All reads hand out clones, and every read-then-write happens under one
/// write guard, so concurrent callers never observe a half-applied update.
#[derive(Debug)]
pub struct SessionLedger {
    sessions: RwLock<HashMap<String, Session>>,
    ids: IdGenerator,
    settings: LedgerSettings,
}

impl SessionLedger {
    pub fn new(settings: LedgerSettings) -> Self {
        Self::with_id_generator(settings, IdGenerator::new())
    }

    pub fn with_id_generator(settings: LedgerSettings, ids: IdGenerator) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ids,
            settings,
        }
    }

    pub fn settings(&self) -> LedgerSettings {
        self.settings
    }

    /// Opens a new session in `created` status with zeroed progress.
    ///
    /// The ledger does not check that `spec.agent_id` refers to a registered,
    /// connected agent; that is the caller's job.
    pub fn create(&self, spec: SessionSpec) -> Result<Session, LedgerError> {
        let mut sessions = self.sessions.write();
        let id = self.ids.next_id();
        if sessions.contains_key(&id) {
            return Err(LedgerError::IdentityCollision(id));
        }
        let session = Session::new(id.clone(), spec, Utc::now());
        sessions.insert(id.clone(), session.clone());
        info!(
            session_id = %id,
            agent_id = %session.agent_id,
            target = %session.target_binary,
            "session created"
        );
        Ok(session)
    }

    /// Moves a session to `status` and merges `progress` into its counters.
    pub fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        progress: Option<&ProgressDelta>,
    ) -> Result<Session, LedgerError> {
        if progress.is_some_and(|delta| !delta.has_valid_rate()) {
            return Err(LedgerError::InvalidProgress(id.to_string()));
        }

        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| LedgerError::SessionNotFound(id.to_string()))?;

        let from = session.status;
        if !from.can_transition_to(status) {
            if self.settings.strict_transitions {
                warn!(session_id = id, %from, to = %status, "rejected illegal status transition");
                return Err(LedgerError::IllegalTransition {
                    id: id.to_string(),
                    from,
                    to: status,
                });
            }
            warn!(session_id = id, %from, to = %status, "applying illegal status transition");
        }

        session.status = status;
        if let Some(delta) = progress {
            session.progress.merge(delta);
        }
        session.updated_at = Utc::now();
        debug!(session_id = id, %from, to = %status, "session status updated");
        Ok(session.clone())
    }

    /// Records the intent to stop a session.
    ///
    /// Terminal sessions are returned unchanged. Nothing is sent to the agent;
    /// the remote fuzzing process keeps running until the agent acts on the
    /// new status.
    pub fn stop(&self, id: &str) -> Result<StopOutcome, LedgerError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| LedgerError::SessionNotFound(id.to_string()))?;

        if session.status.is_terminal() {
            debug!(session_id = id, status = %session.status, "stop ignored for terminal session");
            return Ok(StopOutcome {
                session: session.clone(),
                already_terminal: true,
            });
        }

        let from = session.status;
        session.status = SessionStatus::Stopped;
        session.updated_at = Utc::now();
        info!(session_id = id, %from, "session stopped");
        Ok(StopOutcome {
            session: session.clone(),
            already_terminal: false,
        })
    }

    /// Moves a terminal session back to `created`, keeping its progress.
    pub fn reopen(&self, id: &str) -> Result<Session, LedgerError> {
        if !self.settings.allow_reopen {
            return Err(LedgerError::ReopenDisabled);
        }

        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| LedgerError::SessionNotFound(id.to_string()))?;

        if !session.status.is_terminal() {
            return Err(LedgerError::NotReopenable {
                id: id.to_string(),
                status: session.status,
            });
        }

        let from = session.status;
        session.status = SessionStatus::Created;
        session.updated_at = Utc::now();
        info!(session_id = id, %from, "session re-opened");
        Ok(session.clone())
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Snapshots of every session, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Removes a session whatever its status. Returns `false` if it was absent.
    pub fn cleanup(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(session) => {
                info!(session_id = id, status = %session.status, "session cleaned up");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sessions in each status; every status is present, even at zero.
    pub fn status_counts(&self) -> BTreeMap<SessionStatus, usize> {
        let mut counts: BTreeMap<SessionStatus, usize> =
            SessionStatus::ALL.into_iter().map(|status| (status, 0)).collect();
        for session in self.sessions.read().values() {
            *counts.entry(session.status).or_default() += 1;
        }
        counts
    }
}

impl Default for SessionLedger {
    fn default() -> Self {
        Self::new(LedgerSettings::default())
    }
}
