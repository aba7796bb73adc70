//! TCP transports: a dialing director that pools one connection per peer,
//! and a listening director that pools one actor per accepted remote.

pub mod client;
pub mod server;

pub use self::{
    client::{TcpClientDirector, TcpClientDirectorOptions},
    server::{TcpServerDirector, TcpServerDirectorOptions},
};

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use codec::Address;

/// Events a connection's reader and writer tasks report back to their
/// director. `epoch` tags the actor incarnation that owned the socket, so
/// a completion straggling in after the actor was replaced is discarded
/// instead of acting on its successor.
pub(crate) enum Wire {
    Received {
        peer: Address,
        epoch: u64,
        chunk: Bytes,
    },
    Closed {
        peer: Address,
        epoch: u64,
        error: Option<io::Error>,
    },
}

/// Pump inbound bytes to the director until EOF or error.
///
/// The task only shuttles raw chunks; decoding and every state change
/// happen on the director task.
pub(crate) fn spawn_reader<M, F>(
    peer: Address,
    epoch: u64,
    mut reader: OwnedReadHalf,
    events: UnboundedSender<M>,
    wrap: F,
) -> JoinHandle<()>
where
    M: Send + 'static,
    F: Fn(Wire) -> M + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);

        loop {
            match reader.read_buf(&mut buf).await {
                // Zero bytes read means the peer closed its end.
                Ok(0) => {
                    let _ = events.send(wrap(Wire::Closed {
                        peer,
                        epoch,
                        error: None,
                    }));
                    break;
                }
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    if events
                        .send(wrap(Wire::Received { peer, epoch, chunk }))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    let _ = events.send(wrap(Wire::Closed {
                        peer,
                        epoch,
                        error: Some(e),
                    }));
                    break;
                }
            }
        }
    })
}

/// Drain queued writes onto the socket in submission order.
///
/// The channel closing is the graceful shutdown signal: everything already
/// queued is written out first, then the socket is shut down. That drain
/// is what the flush phase of an actor close amounts to.
pub(crate) fn spawn_writer<M, F>(
    peer: Address,
    epoch: u64,
    mut writer: OwnedWriteHalf,
    mut rx: UnboundedReceiver<Bytes>,
    events: UnboundedSender<M>,
    wrap: F,
) -> JoinHandle<()>
where
    M: Send + 'static,
    F: Fn(Wire) -> M + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                let _ = events.send(wrap(Wire::Closed {
                    peer,
                    epoch,
                    error: Some(e),
                }));
                return;
            }
        }

        let _ = writer.shutdown().await;
    })
}
