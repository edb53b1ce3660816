//! Agent process launcher.
//!
//! Spawns the configured agent command with:
//! - `kill_on_drop(true)` so an abandoned process never outlives its handle.
//! - `env_clear()` plus an allowlist, so only the variables the agent needs
//!   are inherited.
//! - Piped stdio: stdin/stdout carry the protocol, stderr is forwarded to
//!   `tracing` at `DEBUG`.
//!
//! The launcher does no binary discovery; `command` is used as given and
//! resolved through `PATH` by the OS.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::{AppError, Result};

/// Environment variables always inherited by the agent process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "LANG",
    "TERM",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Resolved command line for the agent process.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory of the child.
    pub workspace_root: PathBuf,
    /// Extra variables inherited in addition to [`ALLOWED_ENV_VARS`].
    pub env_passthrough: Vec<String>,
}

/// Live agent process with its protocol streams.
#[derive(Debug)]
pub struct AgentProcess {
    /// Label used in logs.
    pub label: String,
    /// Child handle; kept alive so `kill_on_drop` applies.
    pub child: Child,
    /// Protocol input of the agent.
    pub stdin: ChildStdin,
    /// Protocol output of the agent.
    pub stdout: ChildStdout,
}

/// Spawn the agent process.
///
/// # Errors
///
/// - `AppError::Launch("empty command")` when `config.command` is blank.
/// - `AppError::Launch("failed to spawn …")` on OS spawn failure.
/// - `AppError::Launch("failed to capture …")` if a pipe is missing.
pub fn spawn_agent(config: &LaunchConfig, label: &str) -> Result<AgentProcess> {
    if config.command.trim().is_empty() {
        return Err(AppError::Launch("empty command".into()));
    }

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    cmd.env_clear();
    let passthrough = config.env_passthrough.iter().map(String::as_str);
    for key in ALLOWED_ENV_VARS.iter().copied().chain(passthrough) {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }

    cmd.current_dir(&config.workspace_root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Launch(format!("failed to spawn {}: {err}", config.command))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture agent stdout".into()))?;
    if let Some(stderr) = child.stderr.take() {
        forward_stderr(label.to_owned(), stderr);
    }

    info!(
        session = label,
        pid = child.id().unwrap_or(0),
        command = %config.command,
        "agent process spawned"
    );

    Ok(AgentProcess {
        label: label.to_owned(),
        child,
        stdin,
        stdout,
    })
}

fn forward_stderr(label: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(session = %label, %line, "agent stderr"),
                Ok(None) => break,
                Err(err) => {
                    debug!(session = %label, %err, "agent stderr unreadable");
                    break;
                }
            }
        }
    });
}
