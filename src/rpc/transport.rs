//! Duplex line transport to the agent.
//!
//! A [`Transport`] bundles the framed inbound reader, the framed outbound
//! writer and, when the agent is a child process, the [`Child`] handle used
//! for teardown. It can be built from a spawned [`AgentProcess`] or from any
//! `AsyncRead`/`AsyncWrite` pair (in-memory duplex pipes in tests).
//!
//! The inbound half is handed to the [`Correlator`](crate::rpc::correlator::Correlator),
//! which owns all reads. The outbound half becomes an [`OutboundWriter`],
//! which serialises writes so lines never interleave.

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::launcher::AgentProcess;
use crate::rpc::codec::LineCodec;
use crate::{AppError, Result};

/// Boxed inbound byte stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed outbound byte stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Framed inbound line stream.
pub type LineReader = FramedRead<BoxedReader, LineCodec>;
/// Framed outbound line sink.
pub type LineWriter = FramedWrite<BoxedWriter, LineCodec>;

/// Owned duplex connection to an agent.
pub struct Transport {
    reader: LineReader,
    writer: LineWriter,
    child: Option<Child>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Build a transport over an arbitrary reader/writer pair.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            reader: FramedRead::new(reader, LineCodec::new()),
            writer: FramedWrite::new(writer, LineCodec::new()),
            child: None,
        }
    }

    /// Build a transport over a spawned agent's stdio, keeping the child
    /// handle for graceful-then-forced teardown.
    #[must_use]
    pub fn from_process(process: AgentProcess) -> Self {
        let mut transport = Self::from_io(process.stdout, process.stdin);
        transport.child = Some(process.child);
        transport
    }

    /// Split into writer, reader and optional child handle.
    #[must_use]
    pub fn into_parts(self) -> (LineWriter, LineReader, Option<Child>) {
        (self.writer, self.reader, self.child)
    }
}

/// Serialised writer for outbound lines.
///
/// One async mutex guards the framed writer, so concurrent callers each
/// write a whole line. After [`OutboundWriter::shutdown`] every write fails
/// with [`AppError::Closed`].
pub struct OutboundWriter {
    session: String,
    inner: Mutex<Option<LineWriter>>,
}

impl std::fmt::Debug for OutboundWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundWriter")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl OutboundWriter {
    /// Wrap a framed writer for the named session.
    #[must_use]
    pub fn new(session: impl Into<String>, writer: LineWriter) -> Self {
        Self {
            session: session.into(),
            inner: Mutex::new(Some(writer)),
        }
    }

    /// Write one line and flush it.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`] after shutdown.
    /// - [`AppError::RemoteClosed`] if the agent's stdin is gone.
    pub async fn write_line(&self, line: String) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| AppError::Closed("outbound stream already shut down".into()))?;

        writer.send(line).await.map_err(|e| {
            warn!(session = %self.session, error = %e, "write to agent failed");
            AppError::RemoteClosed(format!("write failed: {e}"))
        })
    }

    /// Flush, shut down and drop the underlying writer, signalling EOF to
    /// the agent. Idempotent.
    pub async fn shutdown(&self) {
        let Some(mut writer) = self.inner.lock().await.take() else {
            return;
        };
        if let Err(e) = SinkExt::<String>::close(&mut writer).await {
            debug!(session = %self.session, error = %e, "closing agent stdin failed");
        }
    }
}
