use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::{HashMap, HashMapExt};
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use codec::{Address, Pdu};

use crate::LinkError;
use crate::director::{ActorInfo, ActorTable, deadline_wait};
use crate::observer::{LinkObserver, NullObserver};
use crate::strategy::{ActorStrategy, Passthrough};
use crate::timer::{TimerHandle, TimerQueue};

/// Datagram receive buffer size; a datagram larger than this would be
/// truncated by the kernel, so it covers the whole theoretical UDP range.
const RECV_BUF_SIZE: usize = 65536;

pub struct UdpDirectorOptions {
    /// Local address the datagram socket binds to.
    pub bind: SocketAddr,
    /// Reap actors idle for this long; `None` keeps them until close.
    pub timeout: Option<Duration>,
    /// Set `SO_REUSEADDR` before binding.
    pub reuse: bool,
    /// Payload transform applied at the actor boundary.
    pub strategy: Arc<dyn ActorStrategy>,
    /// Lifecycle observer, when anyone is interested.
    pub observer: Arc<dyn LinkObserver>,
}

impl UdpDirectorOptions {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            timeout: None,
            reuse: false,
            strategy: Arc::new(Passthrough),
            observer: Arc::new(NullObserver),
        }
    }
}

enum Command {
    Indication(Pdu),
    Close,
}

/// Handle to a running UDP director.
///
/// One datagram socket fans traffic across per-peer actors. The director
/// task owns the socket, the actor pool and every timer, so transitions
/// and observer calls are serialized without any locking; the handle only
/// queues work onto that task.
pub struct UdpDirector {
    tx: UnboundedSender<Command>,
    table: Arc<ActorTable>,
    local: SocketAddr,
}

impl UdpDirector {
    /// Bind the socket and start the director task.
    ///
    /// Returns the handle and the upstream leg: every inbound datagram
    /// arrives on the receiver as a PDU stamped with its source address.
    pub fn bind(options: UdpDirectorOptions) -> Result<(Self, UnboundedReceiver<Pdu>), LinkError> {
        let socket = make_socket(options.bind, options.reuse)?;
        let socket = UdpSocket::from_std(socket)?;
        let local = socket.local_addr()?;

        let (tx, rx) = unbounded_channel();
        let (upstream, upstream_rx) = unbounded_channel();
        let table = Arc::new(ActorTable::default());

        let task = DirectorTask {
            socket,
            local,
            timeout: options.timeout,
            strategy: options.strategy,
            observer: options.observer,
            actors: HashMap::new(),
            timers: TimerQueue::new(),
            table: table.clone(),
            upstream,
        };
        tokio::spawn(task.run(rx));

        log::info!("udp director listening: addr={}", local);
        Ok((Self { tx, table, local }, upstream_rx))
    }

    /// The address the socket actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Queue a PDU for delivery to `pdu.destination`.
    ///
    /// An actor for the destination is created on first use.
    pub fn indication(&self, pdu: Pdu) -> Result<(), LinkError> {
        if pdu.destination.is_none() {
            return Err(LinkError::NoDestination);
        }

        self.tx
            .send(Command::Indication(pdu))
            .map_err(|_| LinkError::Closed)
    }

    /// Look up a live actor; never creates one.
    pub fn get_actor(&self, peer: &Address) -> Option<ActorInfo> {
        self.table.get(peer)
    }

    /// Shut the director down: every actor timer is cancelled, the socket
    /// closes and the pool is released.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }
}

struct UdpActor {
    idle_timer: Option<TimerHandle>,
}

struct DirectorTask {
    socket: UdpSocket,
    local: SocketAddr,
    timeout: Option<Duration>,
    strategy: Arc<dyn ActorStrategy>,
    observer: Arc<dyn LinkObserver>,
    actors: HashMap<Address, UdpActor>,
    timers: TimerQueue<Address>,
    table: Arc<ActorTable>,
    upstream: UnboundedSender<Pdu>,
}

impl DirectorTask {
    async fn run(mut self, mut rx: UnboundedReceiver<Command>) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];

        loop {
            let deadline = self.timers.next_deadline();

            tokio::select! {
                biased;

                cmd = rx.recv() => match cmd {
                    Some(Command::Indication(pdu)) => self.handle_indication(pdu).await,
                    Some(Command::Close) | None => break,
                },

                Some(()) = deadline_wait(deadline) => {
                    for peer in self.timers.expire(Instant::now()) {
                        self.reap(peer);
                    }
                }

                ret = self.socket.recv_from(&mut buf) => match ret {
                    Ok((size, addr)) => self.handle_datagram(&buf[..size], addr),
                    // A remote host shutting down surfaces as a reset on
                    // some platforms; that is peer business, not ours.
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                    Err(e) => {
                        log::error!("udp director receive error: addr={}, err={}", self.local, e);
                        break;
                    }
                },
            }
        }

        self.shutdown();
    }

    async fn handle_indication(&mut self, pdu: Pdu) {
        let Some(peer) = pdu.destination else { return };
        self.touch(peer);

        let data = self.strategy.encode(pdu.data);
        if let Err(e) = self.socket.send_to(&data, peer.socket()).await {
            // A send failure naming a destination stays with that peer's
            // actor; siblings and the socket keep going.
            log::warn!("udp director send error: peer={}, err={}", peer, e);
            self.observer.actor_error(&peer, &LinkError::Io(e));
        }
    }

    fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        let peer = Address::unicast(addr);
        self.touch(peer);

        let mut chunk = BytesMut::from(data);
        let mut frames = Vec::new();
        self.strategy.decode(&mut chunk, &mut frames);
        if !chunk.is_empty() {
            log::warn!(
                "udp director: {} undecodable trailing bytes dropped: peer={}",
                chunk.len(),
                peer
            );
        }

        for data in frames {
            let pdu = Pdu::new(data).with_source(peer);
            if self.upstream.send(pdu).is_err() {
                // Upstream hung up; nothing left to deliver to.
                return;
            }
        }
    }

    /// Find-or-create the actor for `peer` and push its idle deadline out.
    fn touch(&mut self, peer: Address) {
        match self.actors.get(&peer) {
            Some(actor) => {
                if let (Some(handle), Some(timeout)) = (actor.idle_timer, self.timeout) {
                    self.timers.rearm(handle, Instant::now() + timeout);
                }
            }
            None => {
                let idle_timer = self
                    .timeout
                    .map(|timeout| self.timers.schedule(Instant::now() + timeout, peer));

                self.actors.insert(peer, UdpActor { idle_timer });
                self.table.insert(peer);
                self.observer.add_actor(&peer);
            }
        }
    }

    /// Idle expiry: drop the actor and tell the observer, exactly once.
    fn reap(&mut self, peer: Address) {
        if self.actors.remove(&peer).is_some() {
            self.table.remove(&peer);
            self.observer.del_actor(&peer);
            log::trace!("udp actor reaped idle: peer={}", peer);
        }
    }

    fn shutdown(&mut self) {
        for (_, actor) in self.actors.drain() {
            if let Some(handle) = actor.idle_timer {
                self.timers.cancel(handle);
            }
        }

        self.table.clear();
        log::info!("udp director closed: addr={}", self.local);
    }
}

fn make_socket(bind: SocketAddr, reuse: bool) -> io::Result<std::net::UdpSocket> {
    let domain = if bind.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if reuse {
        socket.set_reuse_address(true)?;
    }
    socket.bind(&bind.into())?;

    // Always allowed to send broadcasts; receiving needs nothing extra.
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}
