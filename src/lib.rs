//! Transport and connection-management core for BACnet stacks.
//!
//! The crate multiplexes many logical peer conversations over a small
//! number of sockets. Each transport is a *director* owning one socket
//! and a pool of per-peer *actors*; downstream PDUs are routed to the
//! actor for their destination, inbound traffic is dispatched by source
//! address and delivered upstream with that source stamped on. Lifecycle
//! events (an actor appearing, leaving, or failing) reach the application
//! through the [`LinkObserver`] hook.
//!
//! What the bytes mean is someone else's business: framing is delegated
//! to the caller through the [`codec`] layer's `Framer` contract, and the
//! application layer above encodes whatever protocol it speaks.

pub mod config;
pub mod director;
pub mod observer;
pub mod strategy;
pub mod tcp;
pub mod timer;
pub mod udp;

mod error;

pub use codec::{
    Address, Frame, Framer, FramingError, Pdu, StreamToPacket, UserData, length_prefixed,
};

pub use self::{
    config::Config,
    director::ActorInfo,
    error::LinkError,
    observer::{LinkObserver, NullObserver},
    strategy::{ActorStrategy, Passthrough},
    tcp::{TcpClientDirector, TcpClientDirectorOptions, TcpServerDirector, TcpServerDirectorOptions},
    udp::{UdpDirector, UdpDirectorOptions},
};

#[cfg(feature = "object-codec")]
pub use self::strategy::ObjectCodec;
