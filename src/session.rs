//! Protocol session with one agent.
//!
//! A [`Session`] bundles the serialised outbound writer, the inbound
//! [`Correlator`] and the id counter. It comes into existence through
//! [`Session::handshake`] and lives until [`Session::close`]:
//!
//! 1. `initialize` request carrying `clientInfo`, answered by the agent.
//! 2. `initialized` notification.
//! 3. Requests and notifications for the conversation.
//! 4. Close: fail blocked waiters, shut stdin, wait for a voluntary exit,
//!    then force-kill.
//!
//! All methods take `&self`; a session may be shared between tasks (wrap it
//! in an `Arc`). Request ids are issued by the correlator, counting from 1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::rpc::correlator::Correlator;
use crate::rpc::envelope::{self, Envelope, RequestId, RpcErrorObject};
use crate::rpc::methods;
use crate::rpc::transport::{OutboundWriter, Transport};
use crate::{AppError, Result};

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Name reported in `initialize.clientInfo`.
    pub client_name: String,
    /// Version reported in `initialize.clientInfo`.
    pub client_version: String,
    /// Deadline for the `initialize` response.
    pub handshake_timeout: Duration,
    /// Default deadline for request responses; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// How long [`Session::close`] waits before force-killing the agent.
    pub shutdown_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_name: env!("CARGO_PKG_NAME").to_owned(),
            client_version: env!("CARGO_PKG_VERSION").to_owned(),
            handshake_timeout: Duration::from_secs(30),
            request_timeout: Some(Duration::from_secs(60)),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Live protocol session.
#[derive(Debug)]
pub struct Session {
    label: String,
    outbound: OutboundWriter,
    inbox: Correlator,
    closed: AtomicBool,
    child: Mutex<Option<Child>>,
    server_info: Value,
    options: SessionOptions,
}

impl Session {
    /// Perform the `initialize` / `initialized` handshake over `transport`.
    ///
    /// On failure the session is closed (agent process included) before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// - [`AppError::Timeout`] when the agent does not answer within
    ///   `options.handshake_timeout`.
    /// - [`AppError::Remote`] when the agent rejects `initialize`.
    /// - [`AppError::RemoteClosed`] when the agent exits during the handshake.
    pub async fn handshake(transport: Transport, options: SessionOptions) -> Result<Self> {
        let label = uuid::Uuid::new_v4().to_string();
        Self::handshake_labelled(label, transport, options).await
    }

    /// Same as [`Session::handshake`] with a caller-chosen log label.
    ///
    /// # Errors
    ///
    /// See [`Session::handshake`].
    pub async fn handshake_labelled(
        label: String,
        transport: Transport,
        options: SessionOptions,
    ) -> Result<Self> {
        let (writer, reader, child) = transport.into_parts();
        let mut session = Self {
            outbound: OutboundWriter::new(label.clone(), writer),
            inbox: Correlator::new(label.clone(), reader),
            label,
            closed: AtomicBool::new(false),
            child: Mutex::new(child),
            server_info: Value::Null,
            options,
        };

        let span = info_span!("handshake", session = %session.label);
        match session.initialize().instrument(span).await {
            Ok(server_info) => {
                session.server_info = server_info;
                info!(session = %session.label, "session established");
                Ok(session)
            }
            Err(err) => {
                warn!(session = %session.label, %err, "handshake failed");
                session.close().await;
                Err(err)
            }
        }
    }

    async fn initialize(&self) -> Result<Value> {
        let params = json!({
            "clientInfo": {
                "name": self.options.client_name,
                "title": self.options.client_name,
                "version": self.options.client_version,
            }
        });
        let server_info = self
            .send_request_with_timeout(
                methods::INITIALIZE,
                params,
                Some(self.options.handshake_timeout),
            )
            .await?;
        self.send_notification(methods::INITIALIZED, Value::Null)
            .await?;
        Ok(server_info)
    }

    /// Label used in this session's log records.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Result of the `initialize` request.
    #[must_use]
    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    /// Options the session was created with.
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Inbound router shared with the notification pump.
    #[must_use]
    pub fn correlator(&self) -> &Correlator {
        &self.inbox
    }

    /// Whether [`Session::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests issued so far.
    #[must_use]
    pub fn requests_sent(&self) -> i64 {
        self.inbox.issued()
    }

    /// Send a request and wait for its result using the default timeout.
    ///
    /// # Errors
    ///
    /// See [`Session::send_request_with_timeout`].
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        self.send_request_with_timeout(method, params, self.options.request_timeout)
            .await
    }

    /// Send a request and wait up to `timeout` for its result.
    ///
    /// Notifications arriving meanwhile are queued for the notification
    /// pump; responses to other requests are kept for their own waiters.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`] after [`Session::close`].
    /// - [`AppError::Remote`] when the agent answers with an error object;
    ///   the session stays usable.
    /// - [`AppError::Timeout`] when no response arrives in time.
    /// - [`AppError::MalformedEnvelope`] when an unparseable line is read.
    /// - [`AppError::RemoteClosed`] when the agent's stream ends.
    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.ensure_open()?;
        let id = self.inbox.issue_id();
        let sent = match envelope::encode(method, params, Some(id.clone())) {
            Ok(line) => self.outbound.write_line(line).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            self.inbox.abandon(&id);
            return Err(err);
        }
        debug!(session = %self.label, %id, method, "request sent");

        let deadline = timeout.map(|t| Instant::now() + t);
        let outcome = self
            .inbox
            .await_response(&id, deadline)
            .await
            .map_err(|err| match err {
                AppError::Timeout(_) => AppError::Timeout(format!(
                    "{method} (id {id}) not answered within {timeout:?}"
                )),
                other => other,
            })?;

        outcome.map_err(|err| {
            debug!(session = %self.label, %id, method, code = err.code, "request failed");
            AppError::from(err)
        })
    }

    /// Send a notification; nothing is read.
    ///
    /// # Errors
    ///
    /// [`AppError::Closed`] after close, [`AppError::RemoteClosed`] if the
    /// write fails.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        self.ensure_open()?;
        let line = envelope::encode(method, params, None)?;
        self.outbound.write_line(line).await?;
        debug!(session = %self.label, method, "notification sent");
        Ok(())
    }

    /// Answer an agent-originated request with a result.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send_notification`].
    pub async fn respond(&self, id: RequestId, result: Value) -> Result<()> {
        self.write_response(id, Ok(result)).await
    }

    /// Answer an agent-originated request with an error object.
    ///
    /// # Errors
    ///
    /// Same as [`Session::send_notification`].
    pub async fn respond_error(&self, id: RequestId, code: i64, message: &str) -> Result<()> {
        let error = RpcErrorObject {
            code,
            message: message.to_owned(),
            data: None,
        };
        self.write_response(id, Err(error)).await
    }

    async fn write_response(
        &self,
        id: RequestId,
        outcome: envelope::ResponseOutcome,
    ) -> Result<()> {
        self.ensure_open()?;
        debug!(session = %self.label, %id, ok = outcome.is_ok(), "sending response");
        let line = Envelope::Response { id, outcome }.encode()?;
        self.outbound.write_line(line).await
    }

    /// Close the session.
    ///
    /// Fails every blocked request and drain with [`AppError::Closed`],
    /// shuts the agent's stdin, waits up to `shutdown_grace` for the process
    /// to exit on its own, then force-kills it. Idempotent; every later
    /// operation fails with [`AppError::Closed`].
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let session = self.label.as_str();
        self.inbox.shutdown(&format!("session {} is closed", self.label));
        self.outbound.shutdown().await;

        let child = self.child.lock().await.take();
        if let Some(mut process) = child {
            let grace = self.options.shutdown_grace;
            debug!(session, ?grace, "waiting for agent process to exit");

            match tokio::time::timeout(grace, process.wait()).await {
                Ok(Ok(exit)) => info!(session, ?exit, "agent process exited gracefully"),
                Ok(Err(err)) => warn!(session, %err, "error waiting for agent process"),
                Err(_) => {
                    warn!(session, "agent did not exit within grace period, forcing kill");
                    if let Err(err) = process.kill().await {
                        warn!(session, %err, "failed to force-kill agent process");
                    }
                }
            }
        }

        info!(session, "session closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(AppError::Closed(format!("session {} is closed", self.label)))
        } else {
            Ok(())
        }
    }
}
