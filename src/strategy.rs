use bytes::{Bytes, BytesMut};

/// Per-actor payload transform, chosen when the director is built.
///
/// Directors own sockets, timers and lifecycle; what an actor does to the
/// bytes themselves is delegated here. A strategy is a value stored on the
/// director and shared by all of its actors, so it must be stateless per
/// peer: for stream transports the director hands `decode` the same
/// per-peer buffer on every call.
pub trait ActorStrategy: Send + Sync {
    /// Transform one outbound payload before it is written to the wire.
    fn encode(&self, data: Bytes) -> Bytes;

    /// Consume inbound bytes from the front of `buf`, pushing zero or more
    /// recovered payloads onto `out`. Bytes left behind are presented
    /// again once more arrive; for datagram transports the buffer holds
    /// exactly one datagram and leftovers are discarded.
    fn decode(&self, buf: &mut BytesMut, out: &mut Vec<Bytes>);
}

/// The plain actor: bytes pass through untouched in both directions.
pub struct Passthrough;

impl ActorStrategy for Passthrough {
    fn encode(&self, data: Bytes) -> Bytes {
        data
    }

    fn decode(&self, buf: &mut BytesMut, out: &mut Vec<Bytes>) {
        if !buf.is_empty() {
            out.push(buf.split().freeze());
        }
    }
}

#[cfg(feature = "object-codec")]
pub use object::ObjectCodec;

#[cfg(feature = "object-codec")]
mod object {
    use base64::{Engine, prelude::BASE64_STANDARD};
    use bytes::{Bytes, BytesMut};
    use serde::{Deserialize, Serialize};

    use super::ActorStrategy;

    #[derive(Serialize, Deserialize)]
    struct Record {
        data: String,
    }

    /// Serialized-object actor strategy.
    ///
    /// Payloads travel as one JSON document per line with the raw bytes
    /// base64 encoded inside. This exists to exercise a local stack
    /// across processes without a real application layer on top: frames
    /// that fail to parse are dropped and logged, never escalated, so a
    /// garbled stream cannot take the actor down. It is a debugging
    /// surface, not a network protocol; do not expose a director using
    /// this strategy on an externally reachable port.
    pub struct ObjectCodec;

    impl ActorStrategy for ObjectCodec {
        fn encode(&self, data: Bytes) -> Bytes {
            let record = Record {
                data: BASE64_STANDARD.encode(&data),
            };

            let mut out =
                serde_json::to_vec(&record).expect("record serialization cannot fail");
            out.push(b'\n');
            Bytes::from(out)
        }

        fn decode(&self, buf: &mut BytesMut, out: &mut Vec<Bytes>) {
            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let line = buf.split_to(pos + 1);

                match serde_json::from_slice::<Record>(&line[..pos]) {
                    Ok(record) => match BASE64_STANDARD.decode(record.data.as_bytes()) {
                        Ok(data) => out.push(Bytes::from(data)),
                        Err(err) => {
                            log::warn!("object codec: bad payload encoding, frame dropped: err={err}")
                        }
                    },
                    Err(err) => {
                        log::warn!("object codec: unparseable frame dropped: err={err}")
                    }
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use bytes::BufMut;

        #[test]
        fn round_trips_payloads() {
            let codec = ObjectCodec;
            let mut buf = BytesMut::new();
            buf.put_slice(&codec.encode(Bytes::from_static(b"\x01\x02\x03")));
            buf.put_slice(&codec.encode(Bytes::from_static(b"")));

            let mut out = Vec::new();
            codec.decode(&mut buf, &mut out);

            assert!(buf.is_empty());
            assert_eq!(out.len(), 2);
            assert_eq!(&out[0][..], b"\x01\x02\x03");
            assert_eq!(&out[1][..], b"");
        }

        #[test]
        fn holds_partial_documents_for_more_bytes() {
            let codec = ObjectCodec;
            let encoded = codec.encode(Bytes::from_static(b"hello"));
            let (head, tail) = encoded.split_at(5);

            let mut buf = BytesMut::from(head);
            let mut out = Vec::new();
            codec.decode(&mut buf, &mut out);
            assert!(out.is_empty());
            assert_eq!(buf.len(), 5);

            buf.put_slice(tail);
            codec.decode(&mut buf, &mut out);
            assert_eq!(out.len(), 1);
            assert_eq!(&out[0][..], b"hello");
        }

        #[test]
        fn discards_garbage_without_stalling_the_stream() {
            let codec = ObjectCodec;
            let mut buf = BytesMut::from(&b"not json at all\n"[..]);
            buf.put_slice(&codec.encode(Bytes::from_static(b"ok")));

            let mut out = Vec::new();
            codec.decode(&mut buf, &mut out);

            assert_eq!(out.len(), 1);
            assert_eq!(&out[0][..], b"ok");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_drains_the_whole_buffer() {
        let mut buf = BytesMut::from(&b"abc"[..]);
        let mut out = Vec::new();
        Passthrough.decode(&mut buf, &mut out);

        assert!(buf.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], b"abc");
    }

    #[test]
    fn passthrough_emits_nothing_for_an_empty_buffer() {
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        Passthrough.decode(&mut buf, &mut out);
        assert!(out.is_empty());
    }
}
