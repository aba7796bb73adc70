use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use codec::{Address, FramingError};

/// Errors surfaced by the transport core.
///
/// Per-peer failures go to the lifecycle observer and never abort sibling
/// actors; only construction problems and handle misuse come back to the
/// caller directly.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Downstream PDU for a peer the server holds no connection from. The
    /// server side never dials out.
    #[error("peer not connected: {0}")]
    NotConnected(Address),

    /// The listening socket could not be bound after exhausting every
    /// retry.
    #[error("bind unsuccessful: {0}")]
    BindUnsuccessful(SocketAddr),

    /// The director has shut down and no longer accepts work.
    #[error("director closed")]
    Closed,

    /// The TCP handshake did not finish inside the connect timeout.
    #[error("connect timed out: {0}")]
    ConnectTimeout(Address),

    /// The pending-write buffer outgrew its soft cap; the PDU was dropped.
    #[error("send buffer overflow: {0}")]
    Overflow(Address),

    /// The peer ended its stream while a frame was still incomplete.
    #[error("stream terminated mid-frame: {0}")]
    PartialStream(Address),

    /// The PDU carried no destination to route on.
    #[error("pdu carries no destination")]
    NoDestination,

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
