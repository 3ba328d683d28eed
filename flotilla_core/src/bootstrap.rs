use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while generating or writing an agent package.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// Agent names are embedded in scripts and file names, so they are
    /// restricted to `[A-Za-z0-9_.-]`.
    #[error("Invalid agent name {0:?}: use letters, digits, '_', '.' or '-'")]
    InvalidAgentName(String),

    /// The control address must be `host[:port]` or `[ipv6][:port]`, with
    /// the host limited to `[A-Za-z0-9_.:-]` and a numeric port.
    #[error("Invalid control address {0:?}")]
    InvalidControlAddr(String),

    #[error("Bootstrap I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BootstrapError {
    fn from(err: std::io::Error) -> Self {
        BootstrapError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Darwin,
    Windows,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
            Platform::Windows => "windows",
        }
    }

    fn is_posix(self) -> bool {
        !matches!(self, Platform::Windows)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "darwin" | "macos" => Ok(Platform::Darwin),
            "windows" => Ok(Platform::Windows),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// A generated file: its name inside the package and its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub file_name: String,
    pub contents: String,
}

impl Artifact {
    pub fn md5_hex(&self) -> String {
        format!("{:x}", md5::compute(self.contents.as_bytes()))
    }
}

/// Everything needed to install an agent on one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub script: Artifact,
    pub manifest: Artifact,
    pub installer: Artifact,
}

impl ArtifactBundle {
    /// Writes the three artifacts into `dir`, creating it if needed.
    pub fn write_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, BootstrapError> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::with_capacity(3);
        for artifact in [&self.script, &self.installer, &self.manifest] {
            let path = dir.join(&artifact.file_name);
            fs::write(&path, &artifact.contents)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Produces installable agent packages.
///
/// The control node treats the bundle as opaque; it never reads the files
/// back or depends on their layout.
pub trait BootstrapGenerator: Send + Sync {
    fn generate(&self, platform: Platform, agent_name: &str)
    -> Result<ArtifactBundle, BootstrapError>;
}

/// Generates a launcher that registers with the control node over TCP and
/// keeps sending heartbeats, plus an installer and a manifest.
#[derive(Debug, Clone)]
pub struct TemplateBootstrapGenerator {
    control_addr: String,
    heartbeat_secs: u64,
}

impl TemplateBootstrapGenerator {
    pub fn new(control_addr: impl Into<String>) -> Self {
        Self {
            control_addr: control_addr.into(),
            heartbeat_secs: 30,
        }
    }

    pub fn with_heartbeat_secs(mut self, secs: u64) -> Self {
        self.heartbeat_secs = secs.max(1);
        self
    }

    /// Splits the control address into host and port, stripping IPv6
    /// brackets. The port defaults to 7420.
    fn control_endpoint(&self) -> Result<(&str, &str), BootstrapError> {
        let addr = self.control_addr.as_str();
        let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
            match rest.split_once(']') {
                Some((host, "")) => (host, "7420"),
                Some((host, tail)) => match tail.strip_prefix(':') {
                    Some(port) => (host, port),
                    None => return Err(BootstrapError::InvalidControlAddr(addr.to_string())),
                },
                None => return Err(BootstrapError::InvalidControlAddr(addr.to_string())),
            }
        } else if addr.matches(':').count() > 1 {
            (addr, "7420")
        } else {
            addr.rsplit_once(':').unwrap_or((addr, "7420"))
        };

        let host_ok = !host.is_empty()
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ':'));
        let port_ok = !port.is_empty() && port.chars().all(|c| c.is_ascii_digit());
        if host_ok && port_ok {
            Ok((host, port))
        } else {
            Err(BootstrapError::InvalidControlAddr(addr.to_string()))
        }
    }

    fn posix_script(&self, platform: Platform, name: &str, host: &str, port: &str) -> String {
        format!(
            r#"#!/bin/sh
# flotilla agent launcher for {name} ({platform})
set -eu

CONTROL_HOST="${{FLOTILLA_HOST:-{host}}}"
CONTROL_PORT="${{FLOTILLA_PORT:-{port}}}"
AGENT_ID="{name}"

send() {{
    printf '%s\n' "$1" | nc -w 5 "$CONTROL_HOST" "$CONTROL_PORT"
}}

send '{{"op":"register_agent","id":"'"$AGENT_ID"'","info":{{"platform":"{platform}","hostname":"'"$(hostname)"'"}}}}'

while true; do
    sleep {interval}
    send '{{"op":"heartbeat","id":"'"$AGENT_ID"'"}}' >/dev/null || true
done
"#,
            interval = self.heartbeat_secs,
        )
    }

    fn windows_script(&self, name: &str, host: &str, port: &str) -> String {
        format!(
            r#"# flotilla agent launcher for {name} (windows)
$ErrorActionPreference = "Stop"

$ControlHost = if ($env:FLOTILLA_HOST) {{ $env:FLOTILLA_HOST }} else {{ "{host}" }}
$ControlPort = if ($env:FLOTILLA_PORT) {{ [int]$env:FLOTILLA_PORT }} else {{ {port} }}
$AgentId = "{name}"

function Send-Line([string]$Line) {{
    $client = New-Object System.Net.Sockets.TcpClient($ControlHost, $ControlPort)
    try {{
        $stream = $client.GetStream()
        $writer = New-Object System.IO.StreamWriter($stream)
        $reader = New-Object System.IO.StreamReader($stream)
        $writer.WriteLine($Line)
        $writer.Flush()
        $reader.ReadLine()
    }} finally {{
        $client.Close()
    }}
}}

Send-Line ('{{"op":"register_agent","id":"' + $AgentId + '","info":{{"platform":"windows","hostname":"' + $env:COMPUTERNAME + '"}}}}')

while ($true) {{
    Start-Sleep -Seconds {interval}
    try {{ Send-Line ('{{"op":"heartbeat","id":"' + $AgentId + '"}}') | Out-Null }} catch {{ }}
}}
"#,
            interval = self.heartbeat_secs,
        )
    }

    fn posix_installer(script_name: &str) -> String {
        format!(
            r#"#!/bin/sh
set -eu
DEST="${{HOME}}/.flotilla"
mkdir -p "$DEST"
cp "$(dirname "$0")/{script_name}" "$DEST/{script_name}"
chmod +x "$DEST/{script_name}"
echo "Installed $DEST/{script_name}"
"#
        )
    }

    fn windows_installer(script_name: &str) -> String {
        format!(
            r#"$Dest = Join-Path $env:USERPROFILE ".flotilla"
New-Item -ItemType Directory -Force -Path $Dest | Out-Null
Copy-Item (Join-Path $PSScriptRoot "{script_name}") (Join-Path $Dest "{script_name}") -Force
Write-Output "Installed $(Join-Path $Dest "{script_name}")"
"#
        )
    }
}

impl BootstrapGenerator for TemplateBootstrapGenerator {
    fn generate(
        &self,
        platform: Platform,
        agent_name: &str,
    ) -> Result<ArtifactBundle, BootstrapError> {
        validate_agent_name(agent_name)?;
        let (host, port) = self.control_endpoint()?;

        let (script, installer) = if platform.is_posix() {
            let script_name = format!("flotilla-agent-{agent_name}.sh");
            (
                Artifact {
                    contents: self.posix_script(platform, agent_name, host, port),
                    file_name: script_name.clone(),
                },
                Artifact {
                    contents: Self::posix_installer(&script_name),
                    file_name: "install.sh".to_string(),
                },
            )
        } else {
            let script_name = format!("flotilla-agent-{agent_name}.ps1");
            (
                Artifact {
                    contents: self.windows_script(agent_name, host, port),
                    file_name: script_name.clone(),
                },
                Artifact {
                    contents: Self::windows_installer(&script_name),
                    file_name: "install.ps1".to_string(),
                },
            )
        };

        let manifest = serde_json::json!({
            "agent_name": agent_name,
            "platform": platform,
            "control_addr": self.control_addr,
            "files": {
                "script": { "name": script.file_name, "md5": script.md5_hex() },
                "installer": { "name": installer.file_name, "md5": installer.md5_hex() },
            },
        });
        let manifest = Artifact {
            file_name: "manifest.json".to_string(),
            contents: serde_json::to_string_pretty(&manifest)
                .map_err(|e| BootstrapError::Io(format!("Failed to encode manifest: {e}")))?,
        };

        Ok(ArtifactBundle {
            script,
            manifest,
            installer,
        })
    }
}

fn validate_agent_name(name: &str) -> Result<(), BootstrapError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(BootstrapError::InvalidAgentName(name.to_string()))
    }
}
