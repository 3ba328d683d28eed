use crate::ledger::LedgerSettings;
use crate::liveness::LivenessSweep;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    #[serde(default = "default_true")]
    pub strict_transitions: bool,
    #[serde(default = "default_true")]
    pub allow_reopen: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            strict_transitions: true,
            allow_reopen: true,
        }
    }
}

impl LedgerConfig {
    pub fn settings(&self) -> LedgerSettings {
        LedgerSettings {
            strict_transitions: self.strict_transitions,
            allow_reopen: self.allow_reopen,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct LivenessConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

pub fn default_grace_secs() -> u64 {
    90
}

pub fn default_interval_secs() -> u64 {
    30
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grace_secs: default_grace_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl LivenessConfig {
    /// The configured sweep, or `None` when liveness checking is off.
    pub fn sweep(&self) -> Option<LivenessSweep> {
        self.enabled
            .then(|| LivenessSweep::new(Duration::from_secs(self.grace_secs)))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

pub fn default_listen() -> String {
    "127.0.0.1:7420".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FlotillaConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FlotillaConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
