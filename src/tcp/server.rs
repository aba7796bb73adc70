use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::{HashMap, HashMapExt};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use codec::{Address, Pdu};

use crate::LinkError;
use crate::director::{ActorInfo, ActorTable, deadline_wait};
use crate::observer::{LinkObserver, NullObserver};
use crate::strategy::{ActorStrategy, Passthrough};
use crate::tcp::{Wire, spawn_reader, spawn_writer};
use crate::timer::{TimerHandle, TimerQueue};

/// How often and how long to keep retrying a bind that finds the address
/// still in use; everything else about the address is fatal immediately.
const BIND_ATTEMPTS: u32 = 30;
const REBIND_SLEEP_INTERVAL: Duration = Duration::from_secs(2);

pub struct TcpServerDirectorOptions {
    /// Local address the listener binds to.
    pub bind: SocketAddr,
    /// Listen backlog handed to the kernel.
    pub listeners: u32,
    /// Close connections idle for this long; `None` keeps them open.
    pub idle_timeout: Option<Duration>,
    /// Set `SO_REUSEADDR` before binding.
    pub reuse: bool,
    /// Payload transform applied at the actor boundary.
    pub strategy: Arc<dyn ActorStrategy>,
    /// Lifecycle observer, when anyone is interested.
    pub observer: Arc<dyn LinkObserver>,
}

impl TcpServerDirectorOptions {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            listeners: 5,
            idle_timeout: None,
            reuse: false,
            strategy: Arc::new(Passthrough),
            observer: Arc::new(NullObserver),
        }
    }
}

enum Msg {
    Indication(Pdu),
    Close,
    Wire(Wire),
}

/// Handle to a running TCP server director.
///
/// The listener accepts connections and keys one actor per remote address;
/// the server never dials, so a downstream PDU for an address nobody
/// connected from is the caller's mistake and comes straight back as an
/// error. A second connection from an address that already has an actor
/// supersedes it: the old connection is drained and closed before the new
/// actor takes the slot.
pub struct TcpServerDirector {
    tx: UnboundedSender<Msg>,
    table: Arc<ActorTable>,
    local: SocketAddr,
}

impl TcpServerDirector {
    /// Bind the listener, retrying while the address is in use, and start
    /// the director task. Returns the handle and the upstream leg.
    pub async fn bind(
        options: TcpServerDirectorOptions,
    ) -> Result<(Self, UnboundedReceiver<Pdu>), LinkError> {
        let listener = bind_with_retry(options.bind, options.reuse, options.listeners).await?;
        let local = listener.local_addr()?;

        let (tx, rx) = unbounded_channel();
        let (upstream, upstream_rx) = unbounded_channel();
        let table = Arc::new(ActorTable::default());

        let task = DirectorTask {
            listener,
            local,
            idle_timeout: options.idle_timeout,
            strategy: options.strategy,
            observer: options.observer,
            actors: HashMap::new(),
            timers: TimerQueue::new(),
            table: table.clone(),
            upstream,
            events: tx.clone(),
            epochs: 0,
        };
        tokio::spawn(task.run(rx));

        log::info!("tcp server listening: addr={}", local);
        Ok((Self { tx, table, local }, upstream_rx))
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Queue a PDU for the connected peer named by `pdu.destination`.
    pub fn indication(&self, pdu: Pdu) -> Result<(), LinkError> {
        let Some(peer) = pdu.destination else {
            return Err(LinkError::NoDestination);
        };
        if !self.table.contains(&peer) {
            return Err(LinkError::NotConnected(peer));
        }

        self.tx
            .send(Msg::Indication(pdu))
            .map_err(|_| LinkError::Closed)
    }

    /// Look up a live actor; never creates one.
    pub fn get_actor(&self, peer: &Address) -> Option<ActorInfo> {
        self.table.get(peer)
    }

    /// Stop accepting and drop every connection.
    pub fn close(&self) {
        let _ = self.tx.send(Msg::Close);
    }
}

async fn bind_with_retry(
    addr: SocketAddr,
    reuse: bool,
    backlog: u32,
) -> Result<TcpListener, LinkError> {
    for attempt in 0..BIND_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(REBIND_SLEEP_INTERVAL).await;
        }

        match try_bind(addr, reuse, backlog) {
            Ok(listener) => {
                if attempt > 0 {
                    log::info!("tcp server bind successful: addr={}", addr);
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                log::warn!(
                    "tcp server bind error: addr={}, err={}, sleep and try again",
                    addr,
                    e
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    log::error!("tcp server unable to bind: addr={}", addr);
    Err(LinkError::BindUnsuccessful(addr))
}

fn try_bind(addr: SocketAddr, reuse: bool, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if reuse {
        socket.set_reuseaddr(true)?;
    }
    socket.bind(addr)?;
    socket.listen(backlog)
}

struct ServerActor {
    epoch: u64,
    writer: UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
    idle_timer: Option<TimerHandle>,
    /// Inbound bytes the strategy has not yet turned into payloads.
    rx_buf: BytesMut,
}

struct DirectorTask {
    listener: TcpListener,
    local: SocketAddr,
    idle_timeout: Option<Duration>,
    strategy: Arc<dyn ActorStrategy>,
    observer: Arc<dyn LinkObserver>,
    actors: HashMap<Address, ServerActor>,
    timers: TimerQueue<(Address, u64)>,
    table: Arc<ActorTable>,
    upstream: UnboundedSender<Pdu>,
    events: UnboundedSender<Msg>,
    epochs: u64,
}

impl DirectorTask {
    async fn run(mut self, mut rx: UnboundedReceiver<Msg>) {
        loop {
            let deadline = self.timers.next_deadline();

            tokio::select! {
                biased;

                msg = rx.recv() => match msg {
                    Some(Msg::Indication(pdu)) => self.handle_indication(pdu),
                    Some(Msg::Wire(Wire::Received { peer, epoch, chunk })) => {
                        self.handle_received(peer, epoch, chunk)
                    }
                    Some(Msg::Wire(Wire::Closed { peer, epoch, error })) => {
                        self.handle_closed(peer, epoch, error)
                    }
                    Some(Msg::Close) | None => break,
                },

                Some(()) = deadline_wait(deadline) => {
                    for (peer, epoch) in self.timers.expire(Instant::now()) {
                        self.handle_idle(peer, epoch);
                    }
                }

                ret = self.listener.accept() => match ret {
                    Ok((stream, addr)) => self.handle_accept(stream, addr),
                    Err(e) => {
                        log::error!("tcp server accept error: addr={}, err={}", self.local, e);
                        break;
                    }
                },
            }
        }

        self.shutdown();
    }

    fn handle_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let peer = Address::unicast(addr);
        log::info!("tcp server accept: peer={}, interface={}", peer, self.local);

        if let Err(e) = stream.set_nodelay(true) {
            log::error!("tcp server set nodelay failed: peer={}, err={}", peer, e);
        }

        // One actor per remote address: a second connection from the same
        // place supersedes the first, which is drained and closed.
        if self.actors.contains_key(&peer) {
            log::info!("tcp server peer superseded: peer={}", peer);
            self.close_actor(peer);
        }

        self.epochs += 1;
        let epoch = self.epochs;

        let (reader_half, writer_half) = stream.into_split();
        let (writer_tx, writer_rx) = unbounded_channel();
        let reader = spawn_reader(peer, epoch, reader_half, self.events.clone(), Msg::Wire);
        spawn_writer(
            peer,
            epoch,
            writer_half,
            writer_rx,
            self.events.clone(),
            Msg::Wire,
        );

        let idle_timer = self
            .idle_timeout
            .map(|t| self.timers.schedule(Instant::now() + t, (peer, epoch)));

        self.actors.insert(
            peer,
            ServerActor {
                epoch,
                writer: writer_tx,
                reader,
                idle_timer,
                rx_buf: BytesMut::new(),
            },
        );
        self.table.insert(peer);
        self.observer.add_actor(&peer);
    }

    fn handle_indication(&mut self, pdu: Pdu) {
        let Some(peer) = pdu.destination else { return };

        // An actor always hands its transport a sourced PDU; fill in the
        // interface address when the application left it blank.
        let pdu = if pdu.source.is_none() {
            pdu.with_source(Address::unicast(self.local))
        } else {
            pdu
        };

        let data = self.strategy.encode(pdu.data);
        let idle = self.idle_timeout;
        let Some(actor) = self.actors.get_mut(&peer) else {
            // The handle checks for connected peers, so landing here means
            // the actor closed while this PDU was queued.
            log::warn!("tcp server indication for closed peer dropped: peer={}", peer);
            return;
        };

        let _ = actor.writer.send(data);
        if let (Some(handle), Some(timeout)) = (actor.idle_timer, idle) {
            self.timers.rearm(handle, Instant::now() + timeout);
        }
    }

    fn handle_received(&mut self, peer: Address, epoch: u64, chunk: Bytes) {
        let idle = self.idle_timeout;
        let Some(actor) = self.actors.get_mut(&peer) else {
            return;
        };
        if actor.epoch != epoch {
            return;
        }

        if let (Some(handle), Some(timeout)) = (actor.idle_timer, idle) {
            self.timers.rearm(handle, Instant::now() + timeout);
        }

        actor.rx_buf.put_slice(&chunk);
        let mut frames = Vec::new();
        self.strategy.decode(&mut actor.rx_buf, &mut frames);

        for data in frames {
            let pdu = Pdu::new(data).with_source(peer);
            if self.upstream.send(pdu).is_err() {
                return;
            }
        }
    }

    fn handle_closed(&mut self, peer: Address, epoch: u64, error: Option<io::Error>) {
        let Some(actor) = self.actors.get(&peer) else {
            return;
        };
        if actor.epoch != epoch {
            return;
        }

        if let Some(e) = error {
            log::warn!("tcp server connection error: peer={}, err={}", peer, e);
            self.observer.actor_error(&peer, &LinkError::Io(e));
        } else if !actor.rx_buf.is_empty() {
            log::warn!(
                "tcp server stream ended mid-frame: peer={}, residue={}",
                peer,
                actor.rx_buf.len()
            );
            self.observer
                .actor_error(&peer, &LinkError::PartialStream(peer));
        } else {
            log::info!("tcp server peer disconnected: peer={}, interface={}", peer, self.local);
        }

        self.close_actor(peer);
    }

    fn handle_idle(&mut self, peer: Address, epoch: u64) {
        let Some(actor) = self.actors.get(&peer) else {
            return;
        };
        if actor.epoch != epoch {
            return;
        }

        log::trace!("tcp server actor idle, closing: peer={}", peer);
        self.close_actor(peer);
    }

    /// Tear the actor down and notify. Queued writes still drain before
    /// the socket closes.
    fn close_actor(&mut self, peer: Address) {
        let Some(actor) = self.actors.remove(&peer) else {
            return;
        };

        if let Some(handle) = actor.idle_timer {
            self.timers.cancel(handle);
        }
        drop(actor.writer);
        actor.reader.abort();

        self.table.remove(&peer);
        self.observer.del_actor(&peer);
    }

    fn shutdown(&mut self) {
        for (_, actor) in self.actors.drain() {
            if let Some(handle) = actor.idle_timer {
                self.timers.cancel(handle);
            }
            drop(actor.writer);
            actor.reader.abort();
        }

        self.table.clear();
        log::info!("tcp server closed: addr={}", self.local);
    }
}
