//! Unit tests for the newline codec.
//!
//! Covers:
//! - a single line is decoded without its terminator
//! - batched lines are decoded one by one
//! - a partial line is buffered until the newline arrives
//! - an oversized line becomes a rejected frame and the next line follows
//! - an unterminated final line is still delivered at EOF

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use agent_link::rpc::codec::{LineCodec, MAX_LINE_BYTES};
use agent_link::AppError;

/// Decode one frame, expecting an accepted line (or nothing yet).
fn next_line(codec: &mut LineCodec, buf: &mut BytesMut) -> Option<String> {
    codec
        .decode(buf)
        .expect("decode must not fail the stream")
        .map(|frame| frame.expect("line must be accepted"))
}

// ── Single line ─────────────────────────────────────────────────────────────

#[test]
fn single_line_is_decoded_without_terminator() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"turn/started\",\"params\":{}}\n");

    assert_eq!(
        next_line(&mut codec, &mut buf).as_deref(),
        Some("{\"method\":\"turn/started\",\"params\":{}}"),
        "codec must return the line content without the trailing newline"
    );
}

// ── Batched lines ───────────────────────────────────────────────────────────

#[test]
fn batched_lines_are_each_decoded() {
    let mut codec = LineCodec::new();
    let raw = concat!(
        "{\"id\":1,\"result\":{}}\n",
        "{\"method\":\"item/agentMessage/delta\",\"params\":{\"delta\":\"hi\"}}\n",
    );
    let mut buf = BytesMut::from(raw);

    assert_eq!(
        next_line(&mut codec, &mut buf).as_deref(),
        Some("{\"id\":1,\"result\":{}}")
    );
    assert!(
        next_line(&mut codec, &mut buf).is_some(),
        "second line must be decoded"
    );
    assert!(
        next_line(&mut codec, &mut buf).is_none(),
        "no further lines must be present"
    );
}

// ── Partial delivery ────────────────────────────────────────────────────────

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = LineCodec::new();

    let mut buf = BytesMut::from("{\"id\":7");
    assert!(
        next_line(&mut codec, &mut buf).is_none(),
        "partial line must not be emitted yet"
    );

    buf.extend_from_slice(b",\"result\":null}\n");
    assert_eq!(
        next_line(&mut codec, &mut buf).as_deref(),
        Some("{\"id\":7,\"result\":null}")
    );
}

// ── Oversized line ──────────────────────────────────────────────────────────

#[test]
fn oversized_line_is_a_rejected_frame_not_a_stream_error() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&vec![b'x'; MAX_LINE_BYTES + 1]);
    buf.extend_from_slice(b"\n{\"id\":1,\"result\":{}}\n");

    match codec.decode(&mut buf) {
        Ok(Some(Err(AppError::MalformedEnvelope(msg)))) => assert!(
            msg.contains("line too long"),
            "rejection must mention 'line too long', got: {msg}"
        ),
        other => panic!("expected a rejected frame, got: {other:?}"),
    }

    // The line already buffered behind the oversized one comes out next.
    let mut next = codec.decode(&mut buf).expect("codec must recover");
    while next.is_none() && !buf.is_empty() {
        next = codec.decode(&mut buf).expect("codec must recover");
    }
    let line = next.expect("a frame must follow").expect("line must be accepted");
    assert_eq!(line, "{\"id\":1,\"result\":{}}");
}

#[test]
fn oversized_line_split_across_reads_is_rejected_once() {
    let mut codec = LineCodec::with_max_line(8);
    let mut buf = BytesMut::from("0123456789");

    let first = codec.decode(&mut buf).expect("no stream error");
    assert!(
        matches!(first, Some(Err(AppError::MalformedEnvelope(_)))),
        "got: {first:?}"
    );

    buf.extend_from_slice(b"abcdef\nok\n");
    assert_eq!(next_line(&mut codec, &mut buf).as_deref(), Some("ok"));
}

// ── EOF ─────────────────────────────────────────────────────────────────────

#[test]
fn unterminated_last_line_is_delivered_at_eof() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"error\"}");

    let line = codec
        .decode_eof(&mut buf)
        .expect("decode_eof must succeed")
        .map(|frame| frame.expect("line must be accepted"));
    assert_eq!(line.as_deref(), Some("{\"method\":\"error\"}"));

    let done = codec.decode_eof(&mut buf).expect("decode_eof must succeed");
    assert!(done.is_none(), "nothing must remain after the last line");
}
