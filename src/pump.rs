//! Notification pump.
//!
//! Drains agent notifications for a bounded time or until a stop condition
//! holds. Reads are sliced into intervals no longer than the configured read
//! slice so the overall deadline is honoured even though a single read may
//! block.
//!
//! Agent-originated requests are answered before draining continues:
//!
//! | Inbound                         | Reply                                   |
//! |---------------------------------|-----------------------------------------|
//! | `…/requestApproval` with an id  | `{decision}` from the [`ApprovalPolicy`]|
//! | any other method with an id     | error `-32601` (method not found)       |
//! | no id                           | none                                    |
//!
//! Every notification, understood or not, is handed to the caller in
//! arrival order.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::rpc::envelope::Notification;
use crate::session::Session;
use crate::{AppError, Result};

/// Default ceiling for a single bounded read.
pub const DEFAULT_READ_SLICE: Duration = Duration::from_millis(500);

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Reply to an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    /// Let the agent proceed.
    Accept,
    /// Refuse the action.
    Decline,
}

/// Callback deciding approval requests interactively.
pub type ApprovalCallback = Arc<dyn Fn(&Notification) -> ApprovalDecision + Send + Sync>;

/// How the pump answers approval requests.
#[derive(Clone, Default)]
pub enum ApprovalPolicy {
    /// Accept every request.
    #[default]
    Accept,
    /// Decline every request.
    Reject,
    /// Ask the callback for each request.
    Ask(ApprovalCallback),
}

impl ApprovalPolicy {
    /// Decide `request` under this policy.
    #[must_use]
    pub fn decide(&self, request: &Notification) -> ApprovalDecision {
        match self {
            Self::Accept => ApprovalDecision::Accept,
            Self::Reject => ApprovalDecision::Decline,
            Self::Ask(callback) => callback(request),
        }
    }
}

impl Debug for ApprovalPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => f.write_str("Accept"),
            Self::Reject => f.write_str("Reject"),
            Self::Ask(_) => f.write_str("Ask(..)"),
        }
    }
}

/// Whether a drain visitor wants more notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep draining.
    Continue,
    /// Stop after this notification.
    Stop,
}

/// Why a drain ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainEnd {
    /// The stop condition matched.
    Stopped,
    /// The deadline elapsed first.
    TimedOut,
    /// The agent's stream ended; the session is no longer usable.
    Disconnected(String),
}

/// Notifications collected by [`NotificationPump::drain`].
#[derive(Debug, Clone, PartialEq)]
pub struct Drained {
    /// Every notification observed, in arrival order.
    pub events: Vec<Notification>,
    /// Why draining stopped.
    pub end: DrainEnd,
}

/// Drains notifications from one session.
#[derive(Debug)]
pub struct NotificationPump<'a> {
    session: &'a Session,
    policy: ApprovalPolicy,
    read_slice: Duration,
}

impl<'a> NotificationPump<'a> {
    /// Create a pump answering approvals with `policy`.
    #[must_use]
    pub fn new(session: &'a Session, policy: ApprovalPolicy) -> Self {
        Self {
            session,
            policy,
            read_slice: DEFAULT_READ_SLICE,
        }
    }

    /// Override the read slice; zero is clamped to one millisecond.
    #[must_use]
    pub fn with_read_slice(mut self, read_slice: Duration) -> Self {
        self.read_slice = read_slice.max(Duration::from_millis(1));
        self
    }

    /// Session this pump drains.
    #[must_use]
    pub fn session(&self) -> &'a Session {
        self.session
    }

    /// Drain until `timeout` elapses or `stop` returns true.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`] if the session was closed locally.
    /// - Any write error other than a closed stream while answering an
    ///   agent request.
    pub async fn drain<F>(&self, timeout: Duration, mut stop: F) -> Result<Drained>
    where
        F: FnMut(&Notification) -> bool,
    {
        let mut events = Vec::new();
        let end = self
            .drain_with(timeout, |notification| {
                let flow = if stop(&notification) {
                    Flow::Stop
                } else {
                    Flow::Continue
                };
                events.push(notification);
                flow
            })
            .await?;
        Ok(Drained { events, end })
    }

    /// Drain, handing each notification to `visit` as it arrives.
    ///
    /// A closed stream is reported as [`DrainEnd::Disconnected`] rather
    /// than an error so callers keep what they already folded.
    ///
    /// # Errors
    ///
    /// See [`NotificationPump::drain`].
    pub async fn drain_with<F>(&self, timeout: Duration, mut visit: F) -> Result<DrainEnd>
    where
        F: FnMut(Notification) -> Flow,
    {
        if self.session.is_closed() {
            return Err(AppError::Closed(format!(
                "session {} is closed",
                self.session.label()
            )));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                debug!(session = self.session.label(), "drain deadline elapsed");
                return Ok(DrainEnd::TimedOut);
            }
            let slice_end = (now + self.read_slice).min(deadline);

            let notification = match self
                .session
                .correlator()
                .next_notification(Some(slice_end))
                .await
            {
                Ok(Some(notification)) => notification,
                Ok(None) => continue,
                Err(AppError::RemoteClosed(reason)) => {
                    warn!(
                        session = self.session.label(),
                        %reason,
                        "agent stream closed while draining"
                    );
                    return Ok(DrainEnd::Disconnected(reason));
                }
                Err(err) => return Err(err),
            };

            if notification.id.is_none() && notification.is_approval_request() {
                warn!(
                    session = self.session.label(),
                    method = %notification.method,
                    "approval request without id cannot be answered"
                );
            }

            let pending_reply = notification.id.is_some().then(|| notification.clone());
            let flow = visit(notification);

            if let Some(request) = pending_reply {
                match self.answer(&request).await {
                    Ok(()) => {}
                    Err(AppError::RemoteClosed(reason)) => {
                        return Ok(DrainEnd::Disconnected(reason));
                    }
                    Err(err) => return Err(err),
                }
            }

            if flow == Flow::Stop {
                return Ok(DrainEnd::Stopped);
            }
        }
    }

    async fn answer(&self, request: &Notification) -> Result<()> {
        let Some(id) = request.id.clone() else {
            return Ok(());
        };

        if request.is_approval_request() {
            let decision = self.policy.decide(request);
            info!(
                session = self.session.label(),
                %id,
                method = %request.method,
                ?decision,
                "answering approval request"
            );
            self.session
                .respond(id, json!({ "decision": decision }))
                .await
        } else {
            warn!(
                session = self.session.label(),
                %id,
                method = %request.method,
                "unsupported agent request, replying method not found"
            );
            self.session
                .respond_error(
                    id,
                    METHOD_NOT_FOUND,
                    &format!("method not found: {}", request.method),
                )
                .await
        }
    }
}
