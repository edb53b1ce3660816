//! Newline framing for the agent's stdio streams.
//!
//! Inbound bytes are split on `\n` with a fixed ceiling on line length. An
//! oversized line is not a stream failure: it is yielded as an
//! `Err(MalformedEnvelope)` item and framing carries on at the next newline,
//! so lines already buffered behind it are still delivered. Only I/O
//! failures travel through the decoder's error channel, which ends the
//! framed stream.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_link::rpc::codec::LineCodec;
//!
//! let mut reader = FramedRead::new(child_stdout, LineCodec::new());
//! while let Some(frame) = reader.next().await {
//!     match frame? {
//!         Ok(line) => route(line),
//!         Err(malformed) => warn!(%malformed, "skipping line"),
//!     }
//! }
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::AppError;

/// Maximum inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One decoded inbound line, or the reason it was rejected.
pub type Frame = std::result::Result<String, AppError>;

/// Line codec shared by the inbound reader and the outbound writer.
///
/// Decoding strips the `\n` terminator and a trailing `\r`. Encoding writes
/// `item\n`; the length ceiling applies to decoding only.
#[derive(Debug)]
pub struct LineCodec {
    lines: LinesCodec,
}

impl LineCodec {
    /// Create a codec with the [`MAX_LINE_BYTES`] ceiling.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom ceiling.
    #[must_use]
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line),
        }
    }

    fn frame(
        result: std::result::Result<Option<String>, LinesCodecError>,
        max_line: usize,
    ) -> std::result::Result<Option<Frame>, AppError> {
        match result {
            Ok(line) => Ok(line.map(Ok)),
            // The inner codec is now discarding up to the next newline.
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(
                AppError::MalformedEnvelope(format!("line too long: exceeded {max_line} bytes")),
            ))),
            Err(LinesCodecError::Io(err)) => Err(AppError::Io(err.to_string())),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, AppError> {
        let max_line = self.lines.max_length();
        Self::frame(self.lines.decode(src), max_line)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, AppError> {
        let max_line = self.lines.max_length();
        Self::frame(self.lines.decode_eof(src), max_line)
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> std::result::Result<(), AppError> {
        self.lines.encode(item, dst).map_err(|err| match err {
            LinesCodecError::Io(io) => AppError::Io(io.to_string()),
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Io("outbound line rejected by codec".into())
            }
        })
    }
}
