use ahash::{HashMap, HashMapExt};
use bytes::{Buf, BufMut, BytesMut};

use crate::{
    address::Address,
    framer::{Frame, Framer, FramingError},
    pdu::Pdu,
};

/// Adapter between a stream-oriented director and a packet-oriented
/// upstream.
///
/// Byte chunks from either direction are appended to a per-peer buffer
/// and chopped into frames by the configured framer; each frame comes back
/// out as its own PDU carrying the addressing and user data of the chunk
/// that completed it. The downstream leg keys its buffers by destination,
/// the upstream leg by source; the two directions never share a buffer.
///
/// Buffer lifecycle follows the actor lifecycle: wire the observer's
/// `add_actor`/`del_actor` to [`add_peer`]/[`del_peer`]. A PDU naming a
/// peer that was never announced creates buffers on demand, so a delivery
/// racing the lifecycle notification is absorbed rather than lost.
///
/// [`add_peer`]: StreamToPacket::add_peer
/// [`del_peer`]: StreamToPacket::del_peer
pub struct StreamToPacket {
    framer: Framer,
    upstream: HashMap<Address, BytesMut>,
    downstream: HashMap<Address, BytesMut>,
}

impl StreamToPacket {
    pub fn new(framer: Framer) -> Self {
        Self {
            framer,
            upstream: HashMap::new(),
            downstream: HashMap::new(),
        }
    }

    /// Create empty reassembly buffers for a peer.
    pub fn add_peer(&mut self, peer: Address) {
        self.upstream.entry(peer).or_default();
        self.downstream.entry(peer).or_default();
    }

    /// Drop the reassembly buffers for a peer, partial frames included.
    pub fn del_peer(&mut self, peer: &Address) {
        self.upstream.remove(peer);
        self.downstream.remove(peer);
    }

    /// Bytes of partial frame currently held for a peer, both directions.
    pub fn residue(&self, peer: &Address) -> usize {
        self.upstream.get(peer).map(|b| b.len()).unwrap_or(0)
            + self.downstream.get(peer).map(|b| b.len()).unwrap_or(0)
    }

    /// Downstream leg: chop a PDU headed for the wire, keyed by its
    /// destination.
    pub fn indication(&mut self, pdu: &Pdu) -> Result<Vec<Pdu>, FramingError> {
        let key = pdu.destination.ok_or(FramingError::MissingAddress)?;
        Self::packetize(&self.framer, self.downstream.entry(key).or_default(), pdu)
    }

    /// Upstream leg: chop a PDU coming off the wire, keyed by its source.
    pub fn response(&mut self, pdu: &Pdu) -> Result<Vec<Pdu>, FramingError> {
        let key = pdu.source.ok_or(FramingError::MissingAddress)?;
        Self::packetize(&self.framer, self.upstream.entry(key).or_default(), pdu)
    }

    fn packetize(
        framer: &Framer,
        buf: &mut BytesMut,
        pdu: &Pdu,
    ) -> Result<Vec<Pdu>, FramingError> {
        buf.put_slice(&pdu.data);

        let mut out = Vec::new();
        while !buf.is_empty() {
            let Some(Frame { data, consumed }) = framer(&buf[..]) else {
                break;
            };

            if consumed == 0 {
                return Err(FramingError::ZeroConsumed);
            }
            if consumed > buf.len() {
                return Err(FramingError::OverConsumed {
                    consumed,
                    available: buf.len(),
                });
            }

            buf.advance(consumed);
            out.push(pdu.reframe(data));
        }

        Ok(out)
    }
}
