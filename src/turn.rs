//! Turn orchestration.
//!
//! [`run_turn`] sends `turn/start`, then drains notifications until
//! `turn/completed` while a [`TurnAccumulator`] folds them into the result:
//!
//! - `item/agentMessage/delta` fragments are concatenated in arrival order;
//! - `item/completed` payloads become structured output items;
//! - `error` notifications contribute their message;
//! - `turn/completed` supplies the final status.
//!
//! Once the agent has named the turn, notifications tagged with a different
//! turn id (a late `turn/completed` from an earlier, timed-out turn, say) are
//! skipped rather than folded.
//!
//! A turn moves `Started → Streaming → Completed`, or ends `TimedOut` /
//! `Disconnected`. The abnormal ends are degraded successes: the status is
//! reported as `unknown` and whatever text and items arrived are returned.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::pump::{DrainEnd, Flow, NotificationPump};
use crate::rpc::envelope::Notification;
use crate::rpc::methods;
use crate::Result;

/// Status reported when `turn/completed` was not observed.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Lifecycle of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// `turn/start` answered, nothing streamed yet.
    Started,
    /// At least one notification observed.
    Streaming,
    /// `turn/completed` observed.
    Completed,
    /// Deadline elapsed before completion.
    TimedOut,
    /// The agent's stream ended before completion.
    Disconnected,
}

/// Per-turn tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOptions {
    /// Overall deadline for the turn's notifications.
    pub timeout: Duration,
    /// Cap on retained raw events; `None` keeps all of them.
    pub max_raw_events: Option<usize>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            max_raw_events: None,
        }
    }
}

/// Outcome of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnResult {
    /// Id from the `turn/start` result, when the agent supplied one.
    pub turn_id: Option<String>,
    /// Status from `turn/completed`, or [`UNKNOWN_STATUS`].
    pub status: String,
    /// Terminal state of the turn.
    pub state: TurnState,
    /// Concatenated agent message text.
    pub text: String,
    /// `item/completed` payloads in arrival order.
    pub items: Vec<Value>,
    /// Messages of `error` notifications.
    pub errors: Vec<String>,
    /// Raw notifications in arrival order (the newest ones when capped).
    pub raw_events: Vec<Notification>,
    /// Raw notifications evicted by the cap.
    pub dropped_events: usize,
}

impl TurnResult {
    /// Whether the turn reached `turn/completed`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == TurnState::Completed
    }
}

/// Folds a turn's notifications into a [`TurnResult`].
#[derive(Debug)]
pub struct TurnAccumulator {
    turn_id: Option<String>,
    state: TurnState,
    status: Option<String>,
    text: String,
    items: Vec<Value>,
    errors: Vec<String>,
    raw: VecDeque<Notification>,
    max_raw: Option<usize>,
    dropped: usize,
}

impl TurnAccumulator {
    /// Start an empty accumulator keeping at most `max_raw_events` raw events.
    #[must_use]
    pub fn new(max_raw_events: Option<usize>) -> Self {
        Self {
            turn_id: None,
            state: TurnState::Started,
            status: None,
            text: String::new(),
            items: Vec::new(),
            errors: Vec::new(),
            raw: VecDeque::new(),
            max_raw: max_raw_events,
            dropped: 0,
        }
    }

    /// Only fold notifications for `turn_id`. Untagged notifications are
    /// always folded.
    #[must_use]
    pub fn with_turn_id(mut self, turn_id: Option<String>) -> Self {
        self.turn_id = turn_id;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Text aggregated so far.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Fold one notification; returns [`Flow::Stop`] on this turn's
    /// `turn/completed`.
    pub fn observe(&mut self, notification: Notification) -> Flow {
        if let (Some(expected), Some(tagged)) = (&self.turn_id, tagged_turn(&notification)) {
            if tagged != expected.as_str() {
                debug!(
                    method = %notification.method,
                    turn_id = tagged,
                    "skipping notification for another turn"
                );
                return Flow::Continue;
            }
        }

        if self.state == TurnState::Started {
            self.state = TurnState::Streaming;
        }

        let params = &notification.params;
        let flow = match notification.method.as_str() {
            methods::AGENT_MESSAGE_DELTA => {
                if let Some(delta) = params.get("delta").and_then(Value::as_str) {
                    self.text.push_str(delta);
                }
                Flow::Continue
            }
            methods::ITEM_COMPLETED => {
                self.items
                    .push(params.get("item").unwrap_or(params).clone());
                Flow::Continue
            }
            methods::ERROR => {
                self.errors.push(error_message(params));
                Flow::Continue
            }
            methods::TURN_COMPLETED => {
                self.status = Some(
                    params
                        .pointer("/turn/status")
                        .and_then(Value::as_str)
                        .unwrap_or(UNKNOWN_STATUS)
                        .to_owned(),
                );
                self.state = TurnState::Completed;
                Flow::Stop
            }
            _ => Flow::Continue,
        };

        self.raw.push_back(notification);
        if let Some(max) = self.max_raw {
            while self.raw.len() > max {
                self.raw.pop_front();
                self.dropped += 1;
            }
        }
        flow
    }

    /// Produce the result given why draining ended.
    #[must_use]
    pub fn finish(self, end: &DrainEnd) -> TurnResult {
        let state = match end {
            DrainEnd::Stopped => self.state,
            DrainEnd::TimedOut => TurnState::TimedOut,
            DrainEnd::Disconnected(_) => TurnState::Disconnected,
        };
        let status = match state {
            TurnState::Completed => self.status.unwrap_or_else(|| UNKNOWN_STATUS.to_owned()),
            _ => UNKNOWN_STATUS.to_owned(),
        };

        TurnResult {
            turn_id: self.turn_id,
            status,
            state,
            text: self.text,
            items: self.items,
            errors: self.errors,
            raw_events: self.raw.into(),
            dropped_events: self.dropped,
        }
    }
}

/// Run one turn on `thread_id` with text `input`.
///
/// # Errors
///
/// Errors from `turn/start` propagate (remote error, timeout, closed
/// stream). Once the turn has started, a timeout or disconnect is not an
/// error: the partial result comes back with status [`UNKNOWN_STATUS`].
pub async fn run_turn(
    pump: &NotificationPump<'_>,
    thread_id: &str,
    input: &str,
    options: &TurnOptions,
) -> Result<TurnResult> {
    let span = info_span!("turn", session = pump.session().label(), thread_id);
    drive_turn(pump, thread_id, input, options)
        .instrument(span)
        .await
}

async fn drive_turn(
    pump: &NotificationPump<'_>,
    thread_id: &str,
    input: &str,
    options: &TurnOptions,
) -> Result<TurnResult> {
    let params = json!({
        "threadId": thread_id,
        "input": [{ "type": "text", "text": input }],
    });
    let started = pump
        .session()
        .send_request(methods::TURN_START, params)
        .await?;
    let turn_id = started
        .pointer("/turn/id")
        .and_then(Value::as_str)
        .map(str::to_owned);
    if turn_id.is_none() {
        warn!("turn/start result carried no turn id");
    }
    info!(turn_id = turn_id.as_deref().unwrap_or("-"), "turn started");

    let mut acc = TurnAccumulator::new(options.max_raw_events).with_turn_id(turn_id);
    let end = pump
        .drain_with(options.timeout, |notification| acc.observe(notification))
        .await?;
    let result = acc.finish(&end);

    info!(
        status = %result.status,
        state = ?result.state,
        items = result.items.len(),
        chars = result.text.len(),
        "turn finished"
    );
    Ok(result)
}

/// Turn id a notification is tagged with, if any.
fn tagged_turn(notification: &Notification) -> Option<&str> {
    let params = &notification.params;
    params
        .get("turnId")
        .or_else(|| params.pointer("/turn/id"))
        .and_then(Value::as_str)
}

fn error_message(params: &Value) -> String {
    params
        .pointer("/error/message")
        .or_else(|| params.get("message"))
        .and_then(Value::as_str)
        .map_or_else(|| params.to_string(), str::to_owned)
}
