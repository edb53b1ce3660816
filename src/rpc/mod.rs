//! JSON-RPC plumbing over the agent's stdio.
//!
//! - `codec`: newline framing with a bounded line length.
//! - `envelope`: request / notification / response encoding and decoding.
//! - `methods`: method names recognised on the wire.
//! - `transport`: the duplex line channel and the serialised writer.
//! - `correlator`: read coalescing and routing of inbound lines.

pub mod codec;
pub mod correlator;
pub mod envelope;
pub mod methods;
pub mod transport;

pub use envelope::{Envelope, Notification, RequestId, RpcErrorObject};
