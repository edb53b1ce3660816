//! Shared test helpers for session-level integration tests.
//!
//! Provides an in-memory agent on the far side of a `tokio::io::duplex`
//! pipe so individual test modules can script the wire exchange and focus
//! on behaviour rather than plumbing.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

use agent_link::rpc::transport::Transport;
use agent_link::{Session, SessionOptions};

/// How long the fake agent waits for a line before failing the test.
const AGENT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Scripted agent driving the server side of the duplex pipe.
pub struct FakeAgent {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeAgent {
    /// Read the next line the client wrote, parsed as JSON.
    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(AGENT_RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("client wrote nothing in time")
            .expect("agent read failed")
            .expect("client closed its stdin");
        serde_json::from_str(&line).expect("client wrote invalid json")
    }

    /// Read the next line if one arrives within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Value> {
        match tokio::time::timeout(wait, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => Some(serde_json::from_str(&line).expect("invalid json")),
            _ => None,
        }
    }

    /// Read the next line and assert it is a request for `method`.
    ///
    /// Returns the request id and params.
    pub async fn expect_request(&mut self, method: &str) -> (Value, Value) {
        let msg = self.recv().await;
        assert_eq!(msg["method"], method, "unexpected message: {msg}");
        assert!(msg.get("id").is_some(), "request must carry an id: {msg}");
        (msg["id"].clone(), msg.get("params").cloned().unwrap_or(Value::Null))
    }

    /// Whether the client closed its side (EOF on the agent's stdin).
    pub async fn sees_eof(&mut self) -> bool {
        matches!(
            tokio::time::timeout(AGENT_RECV_TIMEOUT, self.lines.next_line()).await,
            Ok(Ok(None))
        )
    }

    /// Write one JSON value as a line.
    pub async fn send(&mut self, value: Value) {
        self.send_raw(&value.to_string()).await;
    }

    /// Write one raw line.
    pub async fn send_raw(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("agent write failed");
    }

    /// Answer request `id` with `result`.
    pub async fn reply(&mut self, id: &Value, result: Value) {
        self.send(json!({ "id": id, "result": result })).await;
    }

    /// Send a notification.
    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({ "method": method, "params": params })).await;
    }

    /// Play the agent side of the handshake.
    pub async fn handshake(&mut self) {
        let (id, params) = self.expect_request("initialize").await;
        assert!(params["clientInfo"]["name"].is_string());
        self.reply(&id, json!({ "userAgent": "fake-agent/0.0.1" })).await;
        let initialized = self.recv().await;
        assert_eq!(initialized["method"], "initialized");
        assert!(initialized.get("id").is_none());
    }
}

/// Create a transport wired to a fake agent.
pub fn wire() -> (Transport, FakeAgent) {
    let (client_io, agent_io) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (agent_read, agent_write) = tokio::io::split(agent_io);

    let transport = Transport::from_io(client_read, client_write);
    let agent = FakeAgent {
        lines: BufReader::new(agent_read).lines(),
        writer: agent_write,
    };
    (transport, agent)
}

/// Session options with short timeouts suitable for tests.
pub fn test_options() -> SessionOptions {
    SessionOptions {
        client_name: "agent-link-tests".into(),
        client_version: "0.0.0".into(),
        handshake_timeout: Duration::from_secs(5),
        request_timeout: Some(Duration::from_secs(5)),
        shutdown_grace: Duration::from_millis(200),
    }
}

/// A handshaken session plus the fake agent behind it.
pub async fn connected_session() -> (Session, FakeAgent) {
    connected_session_with(test_options()).await
}

/// Same as [`connected_session`] with custom options.
pub async fn connected_session_with(options: SessionOptions) -> (Session, FakeAgent) {
    let (transport, mut agent) = wire();
    let (session, ()) = tokio::join!(Session::handshake(transport, options), agent.handshake());
    (session.expect("handshake must succeed"), agent)
}
