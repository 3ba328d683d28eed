use crate::ledger::LedgerError;
use crate::registry::RegistryError;
use serde::Serialize;
use thiserror::Error;

/// Broad classes of failure that callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The agent or session does not exist. A normal outcome, not a fault.
    NotFound,
    /// Something exists but cannot be used as asked.
    Precondition,
    /// The control node itself failed; nothing was applied.
    Internal,
}

/// Errors surfaced by the [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    #[error("Agent {0} not found")]
    AgentNotFound(String),

    #[error("Agent {0} is registered but not connected")]
    AgentNotConnected(String),

    #[error("No connected agent is available")]
    NoAgentAvailable,

    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Registry(RegistryError),

    #[error(transparent)]
    Ledger(LedgerError),
}

impl OrchestrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestrationError::AgentNotFound(_) | OrchestrationError::SessionNotFound(_) => {
                ErrorKind::NotFound
            }
            OrchestrationError::AgentNotConnected(_)
            | OrchestrationError::NoAgentAvailable
            | OrchestrationError::InvalidRequest(_) => ErrorKind::Precondition,
            OrchestrationError::Registry(RegistryError::AgentNotFound(_)) => ErrorKind::NotFound,
            OrchestrationError::Registry(RegistryError::EmptyAgentId) => ErrorKind::Precondition,
            OrchestrationError::Ledger(err) => match err {
                LedgerError::SessionNotFound(_) => ErrorKind::NotFound,
                LedgerError::IllegalTransition { .. }
                | LedgerError::NotReopenable { .. }
                | LedgerError::ReopenDisabled
                | LedgerError::InvalidProgress(_) => ErrorKind::Precondition,
                LedgerError::IdentityCollision(_) => ErrorKind::Internal,
            },
        }
    }
}

impl From<RegistryError> for OrchestrationError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AgentNotFound(id) => OrchestrationError::AgentNotFound(id),
            other => OrchestrationError::Registry(other),
        }
    }
}

impl From<LedgerError> for OrchestrationError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::SessionNotFound(id) => OrchestrationError::SessionNotFound(id),
            other => OrchestrationError::Ledger(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    #[test]
    fn not_found_errors_are_normalised() {
        let from_registry: OrchestrationError =
            RegistryError::AgentNotFound("A1".to_string()).into();
        let from_ledger: OrchestrationError = LedgerError::SessionNotFound("S1".to_string()).into();

        assert_eq!(from_registry, OrchestrationError::AgentNotFound("A1".to_string()));
        assert_eq!(from_ledger, OrchestrationError::SessionNotFound("S1".to_string()));
        assert_eq!(from_registry.kind(), ErrorKind::NotFound);
        assert_eq!(from_ledger.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn preconditions_are_distinct_from_not_found() {
        assert_eq!(OrchestrationError::NoAgentAvailable.kind(), ErrorKind::Precondition);
        assert_eq!(
            OrchestrationError::AgentNotConnected("A1".to_string()).kind(),
            ErrorKind::Precondition
        );
        let illegal: OrchestrationError = LedgerError::IllegalTransition {
            id: "S1".to_string(),
            from: SessionStatus::Completed,
            to: SessionStatus::Starting,
        }
        .into();
        assert_eq!(illegal.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn identity_collision_is_internal() {
        let err: OrchestrationError = LedgerError::IdentityCollision("x".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(
            err.to_string(),
            "Generated session id x collides with an existing session"
        );
    }
}
