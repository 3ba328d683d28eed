pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod liveness;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod session;

pub use agent::{Agent, AgentInfo, Connectivity};
pub use bootstrap::{ArtifactBundle, BootstrapError, BootstrapGenerator, Platform};
pub use config::FlotillaConfig;
pub use error::{ErrorKind, OrchestrationError};
pub use ids::IdGenerator;
pub use ledger::{LedgerError, LedgerSettings, SessionLedger, StopOutcome};
pub use liveness::LivenessSweep;
pub use orchestrator::{Orchestrator, StartSession, SystemStatus};
pub use protocol::{Request, Response};
pub use registry::{AgentRegistry, RegistryError};
pub use session::{Progress, ProgressDelta, Session, SessionStatus};
