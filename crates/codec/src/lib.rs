//! Value layer of the transport core: addresses, the PDU envelope, the
//! framer contract and the stream-to-packet reassembly adapter.
//!
//! Nothing in this crate touches a socket or an executor; every type here
//! is plain data or a pure transformation over it, which is what makes the
//! reassembly logic testable without standing up a transport.

pub mod address;
pub mod framer;
pub mod pdu;
pub mod stream;

pub use self::{
    address::Address,
    framer::{Frame, Framer, FramingError, length_prefixed},
    pdu::{Pdu, UserData},
    stream::StreamToPacket,
};
