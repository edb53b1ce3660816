//! Unit tests for folding turn notifications into a result.

use serde_json::{json, Value};

use agent_link::pump::{DrainEnd, Flow};
use agent_link::rpc::Notification;
use agent_link::turn::{TurnAccumulator, UNKNOWN_STATUS};
use agent_link::TurnState;

fn note(method: &str, params: Value) -> Notification {
    Notification {
        method: method.to_owned(),
        id: None,
        params,
    }
}

fn delta(text: &str) -> Notification {
    note("item/agentMessage/delta", json!({ "itemId": "m1", "delta": text }))
}

#[test]
fn deltas_concatenate_in_arrival_order_around_other_events() {
    let mut acc = TurnAccumulator::new(None).with_turn_id(Some("t1".into()));
    acc.observe(note("turn/started", json!({ "turn": { "id": "t1" } })));
    acc.observe(delta("Hel"));
    acc.observe(note("item/started", json!({ "item": { "type": "reasoning" } })));
    acc.observe(delta("lo, "));
    acc.observe(note("thread/tokenUsage/updated", json!({ "total": 42 })));
    acc.observe(delta("world"));
    let flow = acc.observe(note(
        "turn/completed",
        json!({ "turn": { "id": "t1", "status": "completed" } }),
    ));

    assert_eq!(flow, Flow::Stop);
    let result = acc.finish(&DrainEnd::Stopped);
    assert_eq!(result.text, "Hello, world");
    assert_eq!(result.status, "completed");
    assert_eq!(result.state, TurnState::Completed);
    assert!(result.is_complete());
    assert_eq!(result.raw_events.len(), 7);
    assert_eq!(result.dropped_events, 0);
}

#[test]
fn completed_items_keep_their_payload() {
    let mut acc = TurnAccumulator::new(None);
    acc.observe(note(
        "item/completed",
        json!({ "item": { "type": "commandExecution", "exitCode": 0 } }),
    ));
    acc.observe(note("item/completed", json!({ "type": "bare" })));

    let result = acc.finish(&DrainEnd::TimedOut);
    assert_eq!(
        result.items,
        vec![
            json!({ "type": "commandExecution", "exitCode": 0 }),
            json!({ "type": "bare" }),
        ]
    );
}

#[test]
fn error_notifications_are_collected() {
    let mut acc = TurnAccumulator::new(None);
    let flow = acc.observe(note(
        "error",
        json!({ "error": { "message": "stream disconnected" }, "willRetry": true }),
    ));
    acc.observe(note("error", json!({ "code": 5 })));

    assert_eq!(flow, Flow::Continue, "an error notification does not end the turn");
    let result = acc.finish(&DrainEnd::TimedOut);
    assert_eq!(result.errors[0], "stream disconnected");
    assert_eq!(result.errors[1], r#"{"code":5}"#);
}

#[test]
fn timeout_reports_unknown_status_with_partial_text() {
    let mut acc = TurnAccumulator::new(None).with_turn_id(Some("t9".into()));
    acc.observe(delta("partial"));

    let result = acc.finish(&DrainEnd::TimedOut);
    assert_eq!(result.status, UNKNOWN_STATUS);
    assert_eq!(result.state, TurnState::TimedOut);
    assert_eq!(result.text, "partial");
    assert_eq!(result.turn_id.as_deref(), Some("t9"));
    assert!(!result.is_complete());
}

#[test]
fn disconnect_reports_unknown_status() {
    let acc = TurnAccumulator::new(None);
    let result = acc.finish(&DrainEnd::Disconnected("stream closed".into()));
    assert_eq!(result.status, UNKNOWN_STATUS);
    assert_eq!(result.state, TurnState::Disconnected);
    assert!(result.text.is_empty());
}

#[test]
fn completion_without_status_is_unknown() {
    let mut acc = TurnAccumulator::new(None);
    acc.observe(note("turn/completed", json!({})));
    let result = acc.finish(&DrainEnd::Stopped);
    assert_eq!(result.state, TurnState::Completed);
    assert_eq!(result.status, UNKNOWN_STATUS);
}

#[test]
fn delta_without_text_field_is_ignored() {
    let mut acc = TurnAccumulator::new(None);
    acc.observe(note("item/agentMessage/delta", json!({ "itemId": "m1" })));
    acc.observe(delta("ok"));
    assert_eq!(acc.text(), "ok");
}

#[test]
fn completion_of_another_turn_does_not_end_this_one() {
    let mut acc = TurnAccumulator::new(None).with_turn_id(Some("turn-2".into()));

    let stale = acc.observe(note(
        "turn/completed",
        json!({ "turn": { "id": "turn-1", "status": "interrupted" } }),
    ));
    acc.observe(note(
        "item/agentMessage/delta",
        json!({ "turnId": "turn-1", "delta": "stale" }),
    ));
    acc.observe(delta("fresh"));
    let done = acc.observe(note(
        "turn/completed",
        json!({ "turn": { "id": "turn-2", "status": "completed" } }),
    ));

    assert_eq!(stale, Flow::Continue);
    assert_eq!(done, Flow::Stop);
    let result = acc.finish(&DrainEnd::Stopped);
    assert_eq!(result.text, "fresh");
    assert_eq!(result.status, "completed");
    assert_eq!(result.turn_id.as_deref(), Some("turn-2"));
    assert_eq!(result.raw_events.len(), 2, "other turns' events are not kept");
}

#[test]
fn without_a_turn_id_any_completion_ends_the_turn() {
    let mut acc = TurnAccumulator::new(None);
    let flow = acc.observe(note(
        "turn/completed",
        json!({ "turn": { "id": "whatever", "status": "completed" } }),
    ));
    assert_eq!(flow, Flow::Stop);
}
