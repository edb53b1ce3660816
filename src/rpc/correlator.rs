//! Inbound routing and read coalescing.
//!
//! The agent's stdout supports exactly one reader, but many logical
//! consumers need lines from it: every in-flight request waits for its own
//! response and the notification pump waits for notifications. The
//! [`Correlator`] multiplexes them over a single shared read:
//!
//! - [`ReadSlot`] is a small state machine (`Idle | InFlight | Closed`)
//!   behind one async mutex. Whoever holds the mutex either starts a read (`Idle`) or joins the one
//!   already running (`InFlight`), bounded by its own deadline.
//! - A read is a spawned task that owns the [`LineReader`] until a line
//!   arrives. A caller whose deadline elapses simply stops waiting; the task
//!   keeps running and its line goes to the next caller. Reads are never
//!   cancelled, so no line is lost.
//! - The caller that observes completion routes the line while still
//!   holding the slot, which keeps routing in arrival order: responses go to
//!   the response stash keyed by id, everything else to the FIFO
//!   notification queue.
//! - Request ids are issued here and tracked as pending until their
//!   response is routed or the waiter gives up. A response for any other id
//!   is dropped, so nothing accumulates for requests nobody awaits.
//! - End of stream moves the slot to `Closed`; every current and future
//!   caller then sees [`AppError::RemoteClosed`]. A local
//!   [`Correlator::shutdown`] wakes blocked callers with [`AppError::Closed`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::rpc::envelope::{Envelope, Notification, RequestId, ResponseOutcome};
use crate::rpc::transport::LineReader;
use crate::{AppError, Result};

/// What a finished read hands back: the reader and the item it produced.
pub type ReadCompletion = (LineReader, Option<Result<String>>);

/// Shared state of the single low-level read.
pub enum ReadSlot {
    /// No read outstanding; the reader is parked here.
    Idle(LineReader),
    /// A read task owns the reader.
    InFlight(JoinHandle<ReadCompletion>),
    /// The stream ended; carries the reason.
    Closed(String),
}

impl std::fmt::Debug for ReadSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle(_) => f.write_str("Idle"),
            Self::InFlight(_) => f.write_str("InFlight"),
            Self::Closed(reason) => f.debug_tuple("Closed").field(reason).finish(),
        }
    }
}

impl ReadSlot {
    /// Start a read if none is outstanding, otherwise join the current one.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::RemoteClosed`] once the stream has ended.
    pub fn acquire_or_join(
        &mut self,
        reads_started: &AtomicU64,
    ) -> Result<&mut JoinHandle<ReadCompletion>> {
        let current = std::mem::replace(self, Self::Closed(String::new()));
        *self = match current {
            Self::Idle(reader) => Self::InFlight(spawn_read(reader, reads_started)),
            other => other,
        };

        match self {
            Self::InFlight(handle) => Ok(handle),
            Self::Closed(reason) => Err(AppError::RemoteClosed(reason.clone())),
            Self::Idle(_) => Err(AppError::RemoteClosed("read slot left idle".into())),
        }
    }

    /// Consume a finished read, parking the reader again.
    ///
    /// # Errors
    ///
    /// - [`AppError::RemoteClosed`] on end of stream, I/O failure or a
    ///   panicked read task; the slot becomes `Closed`.
    /// - [`AppError::MalformedEnvelope`] for an oversized line; the reader
    ///   has already skipped past it and the slot stays usable.
    pub fn complete(
        &mut self,
        joined: std::result::Result<ReadCompletion, tokio::task::JoinError>,
    ) -> Result<String> {
        let (reader, item) = match joined {
            Ok(completion) => completion,
            Err(e) => return Err(self.close(format!("read task failed: {e}"))),
        };

        match item {
            Some(Ok(line)) => {
                *self = Self::Idle(reader);
                Ok(line)
            }
            Some(Err(err @ AppError::MalformedEnvelope(_))) => {
                *self = Self::Idle(reader);
                Err(err)
            }
            Some(Err(e)) => Err(self.close(format!("stream error: {e}"))),
            None => Err(self.close("stream closed".into())),
        }
    }

    /// Whether the stream has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    fn close(&mut self, reason: String) -> AppError {
        *self = Self::Closed(reason.clone());
        AppError::RemoteClosed(reason)
    }

    /// Abort any outstanding read and mark the slot `Closed`.
    fn shut(&mut self, reason: &str) {
        if let Self::InFlight(handle) = self {
            handle.abort();
        }
        *self = Self::Closed(reason.to_owned());
    }
}

fn spawn_read(mut reader: LineReader, reads_started: &AtomicU64) -> JoinHandle<ReadCompletion> {
    reads_started.fetch_add(1, Ordering::SeqCst);
    tokio::spawn(async move {
        // An oversized line arrives as `Some(Ok(Err(_)))`; fold it into the
        // same result as a stream error.
        let item = reader.next().await.map(|frame| frame.and_then(|line| line));
        (reader, item)
    })
}

#[derive(Debug, Default)]
struct Stash {
    responses: HashMap<RequestId, ResponseOutcome>,
    pending: HashSet<RequestId>,
    notifications: VecDeque<Notification>,
    shut_down: Option<String>,
}

/// Routes inbound lines to the request or notification that awaits them.
#[derive(Debug)]
pub struct Correlator {
    session: String,
    slot: Mutex<ReadSlot>,
    stash: StdMutex<Stash>,
    inbox_changed: Notify,
    reads_started: AtomicU64,
    next_id: AtomicI64,
}

impl Correlator {
    /// Take ownership of the inbound reader for the named session.
    #[must_use]
    pub fn new(session: impl Into<String>, reader: LineReader) -> Self {
        Self {
            session: session.into(),
            slot: Mutex::new(ReadSlot::Idle(reader)),
            stash: StdMutex::new(Stash::default()),
            inbox_changed: Notify::new(),
            reads_started: AtomicU64::new(0),
            next_id: AtomicI64::new(1),
        }
    }

    /// Allocate the next request id and start tracking it as pending.
    ///
    /// Ids count up from 1. Only responses to pending ids are kept.
    #[must_use]
    pub fn issue_id(&self) -> RequestId {
        let id = RequestId::Integer(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.stash().pending.insert(id.clone());
        id
    }

    /// Number of ids issued so far.
    #[must_use]
    pub fn issued(&self) -> i64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }

    /// Number of issued ids still waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.stash().pending.len()
    }

    /// Stop routing: blocked and future callers fail with
    /// [`AppError::Closed`]. Idempotent.
    pub fn shutdown(&self, reason: &str) {
        {
            let mut stash = self.stash();
            if stash.shut_down.is_some() {
                return;
            }
            stash.shut_down = Some(reason.to_owned());
            stash.pending.clear();
            stash.responses.clear();
        }
        // A caller holding the slot is woken below and releases it.
        if let Ok(mut slot) = self.slot.try_lock() {
            slot.shut(reason);
        }
        debug!(session = %self.session, "correlator shut down, waking all waiters");
        self.inbox_changed.notify_waiters();
    }

    /// Whether [`Correlator::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.stash().shut_down.is_some()
    }

    /// Number of low-level reads started so far.
    #[must_use]
    pub fn reads_started(&self) -> u64 {
        self.reads_started.load(Ordering::SeqCst)
    }

    /// Number of notifications waiting for the pump.
    #[must_use]
    pub fn queued_notifications(&self) -> usize {
        self.stash().notifications.len()
    }

    /// Read one raw line, bounded by `deadline`.
    ///
    /// Returns `Ok(None)` when the deadline elapses first; the read stays in
    /// flight for the next caller. This bypasses routing and exists for
    /// callers that own the stream exclusively.
    ///
    /// # Errors
    ///
    /// See [`ReadSlot::complete`]; [`AppError::Closed`] after
    /// [`Correlator::shutdown`].
    pub async fn next_line(&self, deadline: Option<Instant>) -> Result<Option<String>> {
        loop {
            let notified = self.inbox_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.check_open()?;

            tokio::select! {
                biased;
                () = &mut notified => continue,
                line = self.read_raw(deadline) => return line,
            }
        }
    }

    async fn read_raw(&self, deadline: Option<Instant>) -> Result<Option<String>> {
        let Some(mut slot) = with_deadline(deadline, self.slot.lock()).await else {
            return Ok(None);
        };
        let handle = slot.acquire_or_join(&self.reads_started)?;
        let Some(joined) = with_deadline(deadline, handle).await else {
            return Ok(None);
        };
        slot.complete(joined).map(Some)
    }

    /// Wait for the response to request `id`.
    ///
    /// Responses for other ids are stashed for their own waiters and
    /// notifications are queued for the pump while this call drives reads.
    ///
    /// # Errors
    ///
    /// - [`AppError::Timeout`] when `deadline` elapses; the id is abandoned
    ///   so a late response is discarded.
    /// - [`AppError::MalformedEnvelope`] when an unparseable line is read.
    /// - [`AppError::RemoteClosed`] when the stream ends.
    /// - [`AppError::Closed`] after [`Correlator::shutdown`].
    pub async fn await_response(
        &self,
        id: &RequestId,
        deadline: Option<Instant>,
    ) -> Result<ResponseOutcome> {
        loop {
            let notified = self.inbox_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.check_open()?;

            if let Some(outcome) = self.stash().responses.remove(id) {
                return Ok(outcome);
            }

            let pulled = tokio::select! {
                biased;
                () = &mut notified => continue,
                pulled = self.pull(deadline) => pulled,
            };

            match pulled {
                Ok(true) => {}
                Ok(false) => {
                    self.abandon(id);
                    return Err(AppError::Timeout(format!("no response to request {id}")));
                }
                Err(err) => {
                    if !err.is_fatal() {
                        self.abandon(id);
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Wait for the next queued or freshly read notification.
    ///
    /// Returns `Ok(None)` when `deadline` elapses. Malformed lines are
    /// logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`AppError::RemoteClosed`] when the stream ends and nothing is left
    ///   in the queue.
    /// - [`AppError::Closed`] after [`Correlator::shutdown`].
    pub async fn next_notification(&self, deadline: Option<Instant>) -> Result<Option<Notification>> {
        loop {
            let notified = self.inbox_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            self.check_open()?;

            if let Some(notification) = self.stash().notifications.pop_front() {
                return Ok(Some(notification));
            }

            let pulled = tokio::select! {
                biased;
                () = &mut notified => continue,
                pulled = self.pull(deadline) => pulled,
            };

            match pulled {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(AppError::MalformedEnvelope(msg)) => {
                    warn!(session = %self.session, error = %msg, "skipping malformed line");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Mark `id` as no longer awaited; a late response is dropped.
    pub fn abandon(&self, id: &RequestId) {
        let mut stash = self.stash();
        stash.pending.remove(id);
        stash.responses.remove(id);
    }

    fn check_open(&self) -> Result<()> {
        match &self.stash().shut_down {
            Some(reason) => Err(AppError::Closed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Read and route one line. `Ok(false)` means the deadline elapsed.
    async fn pull(&self, deadline: Option<Instant>) -> Result<bool> {
        let Some(mut slot) = with_deadline(deadline, self.slot.lock()).await else {
            return Ok(false);
        };
        let handle = slot.acquire_or_join(&self.reads_started)?;
        let Some(joined) = with_deadline(deadline, handle).await else {
            return Ok(false);
        };

        // Routing happens under the slot lock so lines are routed in the
        // order they were read. Nothing below awaits.
        let result = slot.complete(joined).and_then(|line| self.route(&line));
        if slot.is_closed() {
            debug!(session = %self.session, "inbound stream closed, waking all waiters");
        }
        drop(slot);
        self.inbox_changed.notify_waiters();
        result.map(|()| true)
    }

    fn route(&self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }

        let envelope = Envelope::decode(line).map_err(|err| {
            warn!(session = %self.session, error = %err, raw_line = line, "undecodable inbound line");
            err
        })?;

        let mut stash = self.stash();
        match envelope {
            Envelope::Response { id, outcome } => {
                if stash.pending.remove(&id) {
                    debug!(session = %self.session, %id, "response received");
                    stash.responses.insert(id, outcome);
                } else {
                    debug!(
                        session = %self.session,
                        %id,
                        "dropping response to unknown or abandoned request"
                    );
                }
            }
            Envelope::Request { method, id, params } => {
                debug!(session = %self.session, %id, %method, "agent request queued");
                stash.notifications.push_back(Notification {
                    method,
                    id: Some(id),
                    params,
                });
            }
            Envelope::Notification { method, params } => {
                debug!(session = %self.session, %method, "notification queued");
                stash.notifications.push_back(Notification {
                    method,
                    id: None,
                    params,
                });
            }
        }
        Ok(())
    }

    fn stash(&self) -> MutexGuard<'_, Stash> {
        self.stash.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Await `fut`, giving up at `deadline` when one is set.
async fn with_deadline<F: std::future::Future>(
    deadline: Option<Instant>,
    fut: F,
) -> Option<F::Output> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        None => Some(fut.await),
    }
}
