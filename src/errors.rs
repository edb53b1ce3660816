//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every protocol and collaborator failure mode.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Local I/O failure that is not an end-of-stream condition.
    Io(String),
    /// The agent process could not be launched.
    Launch(String),
    /// An inbound line could not be framed or parsed as a JSON-RPC envelope.
    MalformedEnvelope(String),
    /// The remote process answered a request with a JSON-RPC error object.
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable error message supplied by the remote.
        message: String,
    },
    /// The agent's output stream ended; the session cannot continue.
    RemoteClosed(String),
    /// A deadline elapsed before the awaited condition was observed.
    Timeout(String),
    /// The session was closed locally.
    Closed(String),
}

impl AppError {
    /// Whether this error invalidates the whole session.
    ///
    /// Only stream-level failures are fatal; protocol errors and timeouts
    /// leave the session usable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RemoteClosed(_) | Self::Closed(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Launch(msg) => write!(f, "launch failure: {msg}"),
            Self::MalformedEnvelope(msg) => write!(f, "malformed envelope: {msg}"),
            Self::Remote { code, message } => write!(f, "remote error {code}: {message}"),
            Self::RemoteClosed(msg) => write!(f, "remote closed: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Closed(msg) => write!(f, "session closed: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedEnvelope(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
