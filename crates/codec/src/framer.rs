use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

/// One frame extracted from the front of a reassembly buffer.
pub struct Frame {
    /// The frame content handed on; header bytes may already be stripped.
    pub data: Bytes,
    /// How many buffer bytes the frame accounted for, headers included.
    pub consumed: usize,
}

/// A pure function turning the front of a byte stream into a frame.
///
/// Returning `None` means the buffer does not yet hold a complete frame
/// and more bytes are needed. A returned [`Frame`] must consume a strictly
/// nonempty prefix of the buffer; the framer never sees consumed bytes
/// again. The adapter treats violations of that contract as protocol
/// errors rather than trying to guess what the framer meant.
pub type Framer = Arc<dyn Fn(&[u8]) -> Option<Frame> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The framer claimed a frame without consuming any bytes.
    #[error("framer consumed no bytes")]
    ZeroConsumed,

    /// The framer consumed more bytes than the buffer held.
    #[error("framer consumed {consumed} bytes of a {available} byte buffer")]
    OverConsumed { consumed: usize, available: usize },

    /// The PDU carried no address to key the stream buffer with.
    #[error("pdu carries no address for this direction")]
    MissingAddress,
}

/// A framer for streams of `length octet + payload` records.
///
/// ```
/// use bacnet_link_codec::length_prefixed;
///
/// let framer = length_prefixed();
/// let frame = framer(b"\x02ab\x03cde").unwrap();
/// assert_eq!(&frame.data[..], b"ab");
/// assert_eq!(frame.consumed, 3);
/// assert!(framer(b"\x05ab").is_none());
/// ```
pub fn length_prefixed() -> Framer {
    Arc::new(|buf: &[u8]| {
        let len = *buf.first()? as usize;
        if buf.len() < 1 + len {
            return None;
        }

        Some(Frame {
            data: Bytes::copy_from_slice(&buf[1..1 + len]),
            consumed: 1 + len,
        })
    })
}
