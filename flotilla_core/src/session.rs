use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a fuzzing session.
///
/// The forward path is `created -> starting -> running`, ending in one of the
/// terminal states `completed`, `stopped` or `error`. Live statuses may be
/// skipped, so a session can report `running` straight from `created`, but
/// it can only complete from `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Starting,
    Running,
    Completed,
    Stopped,
    Error,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Created,
        SessionStatus::Starting,
        SessionStatus::Running,
        SessionStatus::Completed,
        SessionStatus::Stopped,
        SessionStatus::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Error
        )
    }

    /// `starting` and `running` sessions count as active.
    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Starting | SessionStatus::Running)
    }

    /// Position along the forward path; all terminal statuses share the last.
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Created => 0,
            SessionStatus::Starting => 1,
            SessionStatus::Running => 2,
            SessionStatus::Completed | SessionStatus::Stopped | SessionStatus::Error => 3,
        }
    }

    /// Whether moving from `self` to `next` follows the state machine.
    ///
    /// Staying in the same status is always allowed so that progress-only
    /// updates go through. Otherwise the status may only move forward, and
    /// leaving a terminal status takes an explicit re-open.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }
        next != SessionStatus::Completed || self == SessionStatus::Running
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown session status '{s}'"))
    }
}

/// Execution counters reported for a session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub execs_done: u64,
    pub execs_per_sec: f64,
    pub paths_total: u64,
    pub paths_found: u64,
    pub crashes: u64,
    pub hangs: u64,
}

/// A partial progress report. Absent fields leave the stored value alone.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execs_done: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execs_per_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths_total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths_found: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crashes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hangs: Option<u64>,
}

impl ProgressDelta {
    pub fn is_empty(&self) -> bool {
        *self == ProgressDelta::default()
    }

    /// Rejects rates that are negative or not finite.
    pub fn has_valid_rate(&self) -> bool {
        self.execs_per_sec
            .is_none_or(|rate| rate.is_finite() && rate >= 0.0)
    }
}

impl Progress {
    /// Overlays every field present in `delta`, leaving the others untouched.
    pub fn merge(&mut self, delta: &ProgressDelta) {
        if let Some(v) = delta.execs_done {
            self.execs_done = v;
        }
        if let Some(v) = delta.execs_per_sec {
            self.execs_per_sec = v;
        }
        if let Some(v) = delta.paths_total {
            self.paths_total = v;
        }
        if let Some(v) = delta.paths_found {
            self.paths_found = v;
        }
        if let Some(v) = delta.crashes {
            self.crashes = v;
        }
        if let Some(v) = delta.hangs {
            self.hangs = v;
        }
    }
}

/// A unit of fuzzing work bound to one agent.
///
/// `agent_id` is a plain identity copy: the session neither keeps the agent
/// registered nor disappears when the agent does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub target_binary: String,
    pub input_dir: String,
    pub output_dir: String,
    pub status: SessionStatus,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a new session should run, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub agent_id: String,
    pub target_binary: String,
    pub input_dir: String,
    pub output_dir: String,
}

impl Session {
    pub fn new(id: String, spec: SessionSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            agent_id: spec.agent_id,
            target_binary: spec.target_binary,
            input_dir: spec.input_dir,
            output_dir: spec.output_dir,
            status: SessionStatus::Created,
            progress: Progress::default(),
            created_at: now,
            updated_at: now,
        }
    }
}
