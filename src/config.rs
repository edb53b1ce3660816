//! Global configuration parsing and validation.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration that launches `codex app-server` in the current
//! directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::launcher::LaunchConfig;
use crate::pump::ApprovalPolicy;
use crate::session::SessionOptions;
use crate::turn::TurnOptions;
use crate::{AppError, Result};

/// Longest accepted read slice.
const MAX_READ_SLICE_MILLIS: u64 = 60_000;

/// How the agent process is launched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments for the executable.
    pub args: Vec<String>,
    /// Working directory for the agent and for new threads.
    pub workspace_root: PathBuf,
    /// Environment variables passed through besides the built-in allowlist.
    pub env_passthrough: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "codex".into(),
            args: vec!["app-server".into()],
            workspace_root: PathBuf::from("."),
            env_passthrough: Vec::new(),
        }
    }
}

/// Identity reported during the handshake.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ClientConfig {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Timeouts, in seconds unless noted.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Deadline for the `initialize` response.
    #[serde(default = "default_handshake_seconds")]
    pub handshake_seconds: u64,
    /// Default request deadline; 0 means no deadline.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Deadline for a turn's notifications.
    #[serde(default = "default_turn_seconds")]
    pub turn_seconds: u64,
    /// Grace period before the agent is force-killed on close.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Ceiling for one bounded read while draining, in milliseconds.
    #[serde(default = "default_read_slice_millis")]
    pub read_slice_millis: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_seconds: default_handshake_seconds(),
            request_seconds: default_request_seconds(),
            turn_seconds: default_turn_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            read_slice_millis: default_read_slice_millis(),
        }
    }
}

fn default_handshake_seconds() -> u64 {
    30
}

fn default_request_seconds() -> u64 {
    60
}

fn default_turn_seconds() -> u64 {
    600
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

fn default_read_slice_millis() -> u64 {
    500
}

/// Approval policy selector.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Accept every approval request.
    #[default]
    Accept,
    /// Decline every approval request.
    Reject,
}

/// Approval settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ApprovalConfig {
    /// Answer given to approval requests.
    pub policy: ApprovalMode,
}

/// Turn settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TurnConfig {
    /// Raw events kept per turn; 0 keeps all of them.
    pub max_raw_events: usize,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// Agent launch settings.
    pub agent: AgentConfig,
    /// Handshake identity.
    pub client: ClientConfig,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
    /// Approval policy.
    pub approvals: ApprovalConfig,
    /// Turn settings.
    pub turn: TurnConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the workspace root, canonicalising it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the directory does not exist.
    pub fn set_workspace_root(&mut self, root: &Path) -> Result<()> {
        self.agent.workspace_root = root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace root: {err}")))?;
        Ok(())
    }

    /// Launch settings for the agent process.
    #[must_use]
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            command: self.agent.command.clone(),
            args: self.agent.args.clone(),
            workspace_root: self.agent.workspace_root.clone(),
            env_passthrough: self.agent.env_passthrough.clone(),
        }
    }

    /// Session tunables.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        let t = &self.timeouts;
        SessionOptions {
            client_name: self.client.name.clone(),
            client_version: self.client.version.clone(),
            handshake_timeout: Duration::from_secs(t.handshake_seconds),
            request_timeout: (t.request_seconds > 0).then(|| Duration::from_secs(t.request_seconds)),
            shutdown_grace: Duration::from_secs(t.shutdown_grace_seconds),
        }
    }

    /// Approval policy for the notification pump.
    #[must_use]
    pub fn approval_policy(&self) -> ApprovalPolicy {
        match self.approvals.policy {
            ApprovalMode::Accept => ApprovalPolicy::Accept,
            ApprovalMode::Reject => ApprovalPolicy::Reject,
        }
    }

    /// Read slice for the notification pump.
    #[must_use]
    pub fn read_slice(&self) -> Duration {
        Duration::from_millis(self.timeouts.read_slice_millis)
    }

    /// Turn tunables.
    #[must_use]
    pub fn turn_options(&self) -> TurnOptions {
        TurnOptions {
            timeout: Duration::from_secs(self.timeouts.turn_seconds),
            max_raw_events: (self.turn.max_raw_events > 0).then_some(self.turn.max_raw_events),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.client.name.trim().is_empty() {
            return Err(AppError::Config("client.name must not be empty".into()));
        }

        let slice = self.timeouts.read_slice_millis;
        if slice == 0 || slice > MAX_READ_SLICE_MILLIS {
            return Err(AppError::Config(format!(
                "timeouts.read_slice_millis must be between 1 and {MAX_READ_SLICE_MILLIS}"
            )));
        }

        if self.timeouts.handshake_seconds == 0 || self.timeouts.turn_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.handshake_seconds and timeouts.turn_seconds must be greater than zero"
                    .into(),
            ));
        }

        Ok(())
    }
}
