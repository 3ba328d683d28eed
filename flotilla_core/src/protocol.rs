//! Newline-delimited JSON request/response protocol.
//!
//! Every request is one JSON object tagged by `"op"`; every response is one
//! JSON object with `"ok"` plus either `"result"` or `"error"`.

use crate::agent::AgentInfo;
use crate::error::{ErrorKind, OrchestrationError};
use crate::orchestrator::{Orchestrator, StartSession};
use crate::session::{ProgressDelta, SessionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    RegisterAgent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        info: AgentInfo,
    },
    UnregisterAgent {
        id: String,
    },
    Heartbeat {
        id: String,
    },
    GetAgent {
        id: String,
    },
    ListAgents,
    CreateSession {
        agent_id: String,
        target_binary: String,
        input_dir: String,
        output_dir: String,
    },
    StartSession(StartSession),
    UpdateSessionStatus {
        session_id: String,
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<ProgressDelta>,
    },
    GetSession {
        session_id: String,
    },
    ListSessions,
    StopSession {
        session_id: String,
    },
    ReopenSession {
        session_id: String,
    },
    CleanupSession {
        session_id: String,
    },
    SystemStatus,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::RegisterAgent { .. } => "register_agent",
            Request::UnregisterAgent { .. } => "unregister_agent",
            Request::Heartbeat { .. } => "heartbeat",
            Request::GetAgent { .. } => "get_agent",
            Request::ListAgents => "list_agents",
            Request::CreateSession { .. } => "create_session",
            Request::StartSession(_) => "start_session",
            Request::UpdateSessionStatus { .. } => "update_session_status",
            Request::GetSession { .. } => "get_session",
            Request::ListSessions => "list_sessions",
            Request::StopSession { .. } => "stop_session",
            Request::ReopenSession { .. } => "reopen_session",
            Request::CleanupSession { .. } => "cleanup_session",
            Request::SystemStatus => "system_status",
        }
    }
}

/// Failure classes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Precondition,
    Internal,
    /// The request line could not be parsed.
    BadRequest,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => FailureKind::NotFound,
            ErrorKind::Precondition => FailureKind::Precondition,
            ErrorKind::Internal => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl Response {
    pub fn success(result: JsonValue) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(Failure {
                kind,
                message: message.into(),
            }),
        }
    }

    fn from_result<T: Serialize>(result: Result<T, OrchestrationError>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(json) => Response::success(json),
                Err(e) => Response::failure(
                    FailureKind::Internal,
                    format!("Failed to encode result: {e}"),
                ),
            },
            Err(err) => Response::failure(err.kind().into(), err.to_string()),
        }
    }

    /// Serializes the response as a single JSON line (without the newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"ok":false,"error":{{"kind":"internal","message":"Failed to encode response: {e}"}}}}"#
            )
        })
    }
}

/// Runs one request against the orchestrator.
pub fn dispatch(orchestrator: &Orchestrator, request: Request) -> Response {
    debug!(op = request.op(), "dispatching request");
    match request {
        Request::RegisterAgent { id, info } => {
            Response::from_result(orchestrator.register_agent(id.as_deref(), info))
        }
        Request::UnregisterAgent { id } => {
            Response::from_result(Ok(orchestrator.unregister_agent(&id)))
        }
        Request::Heartbeat { id } => Response::from_result(orchestrator.heartbeat(&id)),
        Request::GetAgent { id } => Response::from_result(orchestrator.get_agent(&id)),
        Request::ListAgents => Response::from_result(Ok(orchestrator.list_agents())),
        Request::CreateSession {
            agent_id,
            target_binary,
            input_dir,
            output_dir,
        } => Response::from_result(orchestrator.create_session(
            &agent_id,
            &target_binary,
            &input_dir,
            &output_dir,
        )),
        Request::StartSession(start) => Response::from_result(orchestrator.start_session(start)),
        Request::UpdateSessionStatus {
            session_id,
            status,
            progress,
        } => Response::from_result(orchestrator.update_session_status(
            &session_id,
            status,
            progress.as_ref(),
        )),
        Request::GetSession { session_id } => {
            Response::from_result(orchestrator.get_session(&session_id))
        }
        Request::ListSessions => Response::from_result(Ok(orchestrator.list_sessions())),
        Request::StopSession { session_id } => {
            Response::from_result(orchestrator.stop_session(&session_id))
        }
        Request::ReopenSession { session_id } => {
            Response::from_result(orchestrator.reopen_session(&session_id))
        }
        Request::CleanupSession { session_id } => {
            Response::from_result(Ok(orchestrator.cleanup_session(&session_id)))
        }
        Request::SystemStatus => Response::from_result(Ok(orchestrator.system_status())),
    }
}

/// Parses and runs one request line. Malformed input yields a `bad_request`
/// response rather than an error so the caller's loop can keep going.
pub fn handle_line(orchestrator: &Orchestrator, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => dispatch(orchestrator, request),
        Err(e) => {
            debug!(error = %e, "rejected malformed request line");
            Response::failure(FailureKind::BadRequest, format!("Malformed request: {e}"))
        }
    }
}
