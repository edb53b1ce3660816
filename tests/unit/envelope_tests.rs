//! Unit tests for JSON-RPC envelope encoding and decoding.

use serde_json::{json, Value};

use agent_link::rpc::envelope::{self, Envelope, Notification, RequestId, RpcErrorObject};
use agent_link::AppError;

fn decode_value(line: &str) -> Value {
    serde_json::from_str(line).expect("encoded line must be valid json")
}

// ── Encoding ────────────────────────────────────────────────────────────────

#[test]
fn request_line_carries_method_id_and_params() {
    let line = envelope::encode(
        "thread/start",
        json!({ "cwd": "/tmp/ws" }),
        Some(RequestId::Integer(2)),
    )
    .expect("encode");

    assert_eq!(
        decode_value(&line),
        json!({ "id": 2, "method": "thread/start", "params": { "cwd": "/tmp/ws" } })
    );
}

#[test]
fn notification_line_has_no_id() {
    let line = envelope::encode("initialized", json!({}), None).expect("encode");
    let value = decode_value(&line);
    assert!(value.get("id").is_none(), "notification must not carry an id");
    assert_eq!(value["method"], "initialized");
}

#[test]
fn encoded_lines_never_contain_newlines() {
    let line = envelope::encode(
        "turn/start",
        json!({ "input": [{ "type": "text", "text": "line one\nline two\r\n" }] }),
        Some(RequestId::Integer(9)),
    )
    .expect("encode");

    assert!(!line.contains('\n'));
    assert!(!line.contains('\r'));
    assert_eq!(
        decode_value(&line)["params"]["input"][0]["text"],
        "line one\nline two\r\n"
    );
}

/// Params exercising nesting, arrays, quoting and non-ASCII text.
fn awkward_params() -> Value {
    json!({
        "thread": { "id": "thr_1", "meta": { "tags": ["a", "b"], "depth": { "n": 3 } } },
        "input": [
            { "type": "text", "text": "say \"hi\" and \\back\\slash" },
            { "type": "text", "text": "caf\u{e9} \u{1f980} \u{65e5}\u{672c} \u{0}\u{1f}" }
        ],
        "limits": [1, -2, 3.5, null, true],
        "empty": {}
    })
}

#[test]
fn request_round_trips_through_the_wire_form() {
    for id in [RequestId::Integer(41), RequestId::String("req-\u{e9}-\"7\"".into())] {
        let line = envelope::encode("turn/start", awkward_params(), Some(id.clone()))
            .expect("encode");
        match Envelope::decode(&line).expect("decode") {
            Envelope::Request {
                method,
                id: decoded,
                params,
            } => {
                assert_eq!(method, "turn/start");
                assert_eq!(decoded, id);
                assert_eq!(params, awkward_params());
            }
            other => panic!("expected a request, got: {other:?}"),
        }
    }
}

#[test]
fn notification_round_trips_through_the_wire_form() {
    let line = envelope::encode("item/agentMessage/delta", awkward_params(), None)
        .expect("encode");
    assert_eq!(
        Envelope::decode(&line).expect("decode"),
        Envelope::Notification {
            method: "item/agentMessage/delta".into(),
            params: awkward_params(),
        }
    );
}

#[test]
fn escaped_unicode_on_the_wire_decodes_to_the_same_params() {
    let line = r#"{"id":5,"method":"thread/start","params":{"text":"caf\u00e9 \ud83e\udd80 \"q\""}}"#;
    match Envelope::decode(line).expect("decode") {
        Envelope::Request { params, .. } => {
            assert_eq!(params["text"], "caf\u{e9} \u{1f980} \"q\"");
        }
        other => panic!("expected a request, got: {other:?}"),
    }
}

#[test]
fn error_response_encodes_error_object() {
    let line = Envelope::Response {
        id: RequestId::String("srv-1".into()),
        outcome: Err(RpcErrorObject {
            code: -32601,
            message: "method not found: x/y".into(),
            data: None,
        }),
    }
    .encode()
    .expect("encode");

    assert_eq!(
        decode_value(&line),
        json!({ "id": "srv-1", "error": { "code": -32601, "message": "method not found: x/y" } })
    );
}

// ── Decoding ────────────────────────────────────────────────────────────────

#[test]
fn decodes_success_response() {
    let env = Envelope::decode(r#"{"id":1,"result":{"userAgent":"codex/1.0"}}"#).expect("decode");
    assert_eq!(
        env,
        Envelope::Response {
            id: RequestId::Integer(1),
            outcome: Ok(json!({ "userAgent": "codex/1.0" })),
        }
    );
}

#[test]
fn decodes_null_result_as_success() {
    let env = Envelope::decode(r#"{"id":4,"result":null}"#).expect("decode");
    assert_eq!(
        env,
        Envelope::Response {
            id: RequestId::Integer(4),
            outcome: Ok(Value::Null),
        }
    );
}

#[test]
fn decodes_error_response_with_data() {
    let env = Envelope::decode(
        r#"{"id":5,"error":{"code":-32000,"message":"thread not found","data":{"threadId":"t1"}}}"#,
    )
    .expect("decode");

    match env {
        Envelope::Response {
            id,
            outcome: Err(err),
        } => {
            assert_eq!(id, RequestId::Integer(5));
            assert_eq!(err.code, -32000);
            assert_eq!(err.message, "thread not found");
            assert_eq!(err.data, Some(json!({ "threadId": "t1" })));
        }
        other => panic!("expected error response, got: {other:?}"),
    }
}

#[test]
fn decodes_notification_with_missing_params_as_null() {
    let env = Envelope::decode(r#"{"method":"turn/started"}"#).expect("decode");
    assert_eq!(
        env,
        Envelope::Notification {
            method: "turn/started".into(),
            params: Value::Null,
        }
    );
}

#[test]
fn decodes_agent_request_with_string_id() {
    let env = Envelope::decode(
        r#"{"id":"appr-1","method":"item/fileChange/requestApproval","params":{"itemId":"i1"}}"#,
    )
    .expect("decode");
    assert_eq!(
        env,
        Envelope::Request {
            method: "item/fileChange/requestApproval".into(),
            id: RequestId::String("appr-1".into()),
            params: json!({ "itemId": "i1" }),
        }
    );
}

#[test]
fn unknown_fields_are_ignored() {
    let env = Envelope::decode(r#"{"jsonrpc":"2.0","id":3,"result":{},"extra":[1,2,3]}"#)
        .expect("decode");
    assert!(matches!(
        env,
        Envelope::Response {
            id: RequestId::Integer(3),
            outcome: Ok(_)
        }
    ));
}

// ── Malformed input ─────────────────────────────────────────────────────────

fn assert_malformed(line: &str, needle: &str) {
    match Envelope::decode(line) {
        Err(AppError::MalformedEnvelope(msg)) => assert!(
            msg.contains(needle),
            "error for {line:?} must mention {needle:?}, got: {msg}"
        ),
        other => panic!("expected MalformedEnvelope for {line:?}, got: {other:?}"),
    }
}

#[test]
fn invalid_json_is_malformed() {
    assert_malformed("not-json{{{", "invalid json");
}

#[test]
fn non_object_is_malformed() {
    assert_malformed("[1,2,3]", "not a json object");
    assert_malformed("42", "not a json object");
}

#[test]
fn missing_method_and_id_is_malformed() {
    assert_malformed(r#"{"params":{}}"#, "missing method");
}

#[test]
fn non_string_method_is_malformed() {
    assert_malformed(r#"{"method":7,"params":{}}"#, "method must be a string");
}

#[test]
fn object_id_is_malformed() {
    assert_malformed(r#"{"id":{"n":1},"result":{}}"#, "id must be a number or string");
}

#[test]
fn response_without_result_or_error_is_malformed() {
    assert_malformed(r#"{"id":8}"#, "neither result nor error");
}

// ── Notification helpers ────────────────────────────────────────────────────

#[test]
fn notification_reports_whether_it_needs_a_reply() {
    let plain = Notification {
        method: "item/started".into(),
        id: None,
        params: json!({}),
    };
    let approval = Notification {
        method: "item/commandExecution/requestApproval".into(),
        id: Some(RequestId::Integer(7)),
        params: json!({}),
    };

    assert!(!plain.expects_response());
    assert!(!plain.is_approval_request());
    assert!(approval.expects_response());
    assert!(approval.is_approval_request());
}

#[test]
fn request_id_displays_bare_value() {
    assert_eq!(RequestId::Integer(12).to_string(), "12");
    assert_eq!(RequestId::String("abc".into()).to_string(), "abc");
}
