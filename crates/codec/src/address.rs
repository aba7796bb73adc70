use std::fmt;
use std::net::SocketAddr;

/// A link-level peer identifier.
///
/// Directors key their actor pools by address. For the IP transports this
/// is a socket address plus a broadcast flag; the flag distinguishes a
/// datagram aimed at a whole subnet from one aimed at a single host that
/// happens to use the same port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    socket: SocketAddr,
    broadcast: bool,
}

impl Address {
    /// An address naming a single remote peer.
    pub const fn unicast(socket: SocketAddr) -> Self {
        Self {
            socket,
            broadcast: false,
        }
    }

    /// An address naming every host reachable through `socket`.
    pub const fn broadcast(socket: SocketAddr) -> Self {
        Self {
            socket,
            broadcast: true,
        }
    }

    pub const fn socket(&self) -> SocketAddr {
        self.socket
    }

    pub const fn is_broadcast(&self) -> bool {
        self.broadcast
    }
}

impl From<SocketAddr> for Address {
    fn from(socket: SocketAddr) -> Self {
        Self::unicast(socket)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.broadcast {
            write!(f, "{}*", self.socket)
        } else {
            write!(f, "{}", self.socket)
        }
    }
}
