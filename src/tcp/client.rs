use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::{HashMap, HashMapExt};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;

use codec::{Address, Pdu};

use crate::LinkError;
use crate::director::{ActorInfo, ActorTable, PENDING_SOFT_CAP, deadline_wait};
use crate::observer::{LinkObserver, NullObserver};
use crate::strategy::{ActorStrategy, Passthrough};
use crate::tcp::{Wire, spawn_reader, spawn_writer};
use crate::timer::{TimerHandle, TimerQueue};

pub struct TcpClientDirectorOptions {
    /// Give up on a TCP handshake after this long; `None` leaves it to the
    /// operating system.
    pub connect_timeout: Option<Duration>,
    /// Close connections idle for this long; `None` keeps them open.
    pub idle_timeout: Option<Duration>,
    /// Payload transform applied at the actor boundary.
    pub strategy: Arc<dyn ActorStrategy>,
    /// Lifecycle observer, when anyone is interested.
    pub observer: Arc<dyn LinkObserver>,
}

impl Default for TcpClientDirectorOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            idle_timeout: None,
            strategy: Arc::new(Passthrough),
            observer: Arc::new(NullObserver),
        }
    }
}

enum Msg {
    Connect {
        peer: Address,
        reconnect: Option<Duration>,
    },
    Disconnect {
        peer: Address,
    },
    Indication(Pdu),
    Close,
    // Completions reported by spawned tasks.
    Connected {
        peer: Address,
        epoch: u64,
        stream: TcpStream,
    },
    ConnectFailed {
        peer: Address,
        epoch: u64,
        error: std::io::Error,
    },
    Wire(Wire),
}

enum Timeout {
    Connect { peer: Address, epoch: u64 },
    Idle { peer: Address, epoch: u64 },
    Reconnect { peer: Address },
}

/// Handle to a running TCP client director.
///
/// The director presents a pool of outbound connections as one virtual
/// interface: a PDU routed to a peer without a connection dials one, and
/// PDUs submitted while the handshake is in flight are buffered and
/// written the moment it completes. Inbound bytes have no address of
/// their own, so the actor stamps its peer address on everything it sends
/// upstream.
pub struct TcpClientDirector {
    tx: UnboundedSender<Msg>,
    table: Arc<ActorTable>,
}

impl TcpClientDirector {
    /// Start the director task. Returns the handle and the upstream leg.
    pub fn new(options: TcpClientDirectorOptions) -> (Self, UnboundedReceiver<Pdu>) {
        let (tx, rx) = unbounded_channel();
        let (upstream, upstream_rx) = unbounded_channel();
        let table = Arc::new(ActorTable::default());

        let task = DirectorTask {
            connect_timeout: options.connect_timeout,
            idle_timeout: options.idle_timeout,
            strategy: options.strategy,
            observer: options.observer,
            actors: HashMap::new(),
            reconnect: HashMap::new(),
            timers: TimerQueue::new(),
            table: table.clone(),
            upstream,
            events: tx.clone(),
            epochs: 0,
        };
        tokio::spawn(task.run(rx));

        (Self { tx, table }, upstream_rx)
    }

    /// Open a connection to `peer` ahead of any traffic.
    ///
    /// With `reconnect` set, the director dials again that long after the
    /// connection goes away, however it went away. Connecting to a peer
    /// that already has an actor is a no-op.
    pub fn connect(&self, peer: Address, reconnect: Option<Duration>) -> Result<(), LinkError> {
        self.tx
            .send(Msg::Connect { peer, reconnect })
            .map_err(|_| LinkError::Closed)
    }

    /// Close the connection to `peer` after draining queued writes, and
    /// forget any reconnect interest in it.
    pub fn disconnect(&self, peer: Address) -> Result<(), LinkError> {
        self.tx
            .send(Msg::Disconnect { peer })
            .map_err(|_| LinkError::Closed)
    }

    /// Queue a PDU for `pdu.destination`, dialing the peer if needed.
    pub fn indication(&self, pdu: Pdu) -> Result<(), LinkError> {
        if pdu.destination.is_none() {
            return Err(LinkError::NoDestination);
        }

        self.tx
            .send(Msg::Indication(pdu))
            .map_err(|_| LinkError::Closed)
    }

    /// Look up a live actor; never creates one.
    pub fn get_actor(&self, peer: &Address) -> Option<ActorInfo> {
        self.table.get(peer)
    }

    /// Shut the director down, dropping every connection.
    pub fn close(&self) {
        let _ = self.tx.send(Msg::Close);
    }
}

struct ClientActor {
    epoch: u64,
    state: ClientState,
    connect_timer: Option<TimerHandle>,
    idle_timer: Option<TimerHandle>,
    /// Inbound bytes the strategy has not yet turned into payloads.
    rx_buf: BytesMut,
}

enum ClientState {
    /// The handshake is in flight; outbound bytes wait in `pending`.
    Connecting {
        pending: BytesMut,
        task: JoinHandle<()>,
    },
    /// The transport is up; writes go through the writer task's queue.
    Connected {
        writer: UnboundedSender<Bytes>,
        reader: JoinHandle<()>,
    },
}

struct DirectorTask {
    connect_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    strategy: Arc<dyn ActorStrategy>,
    observer: Arc<dyn LinkObserver>,
    actors: HashMap<Address, ClientActor>,
    reconnect: HashMap<Address, Duration>,
    timers: TimerQueue<Timeout>,
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
                    Some(Msg::Connect { peer, reconnect }) => self.handle_connect(peer, reconnect),
                    Some(Msg::Disconnect { peer }) => self.handle_disconnect(peer),
                    Some(Msg::Indication(pdu)) => self.handle_indication(pdu),
                    Some(Msg::Connected { peer, epoch, stream }) => {
                        self.handle_connected(peer, epoch, stream)
                    }
                    Some(Msg::ConnectFailed { peer, epoch, error }) => {
                        self.handle_connect_failed(peer, epoch, error)
                    }
                    Some(Msg::Wire(Wire::Received { peer, epoch, chunk })) => {
                        self.handle_received(peer, epoch, chunk)
                    }
                    Some(Msg::Wire(Wire::Closed { peer, epoch, error })) => {
                        self.handle_closed(peer, epoch, error)
                    }
                    Some(Msg::Close) | None => break,
                },

                Some(()) = deadline_wait(deadline) => {
                    for timeout in self.timers.expire(Instant::now()) {
                        self.handle_timeout(timeout);
                    }
                }
            }
        }

        self.shutdown();
    }

    fn handle_connect(&mut self, peer: Address, reconnect: Option<Duration>) {
        if self.actors.contains_key(&peer) {
            return;
        }

        if let Some(backoff) = reconnect {
            self.reconnect.insert(peer, backoff);
        }
        self.spawn_actor(peer);
    }

    /// Create a connecting actor for `peer` and start the handshake.
    fn spawn_actor(&mut self, peer: Address) {
        self.epochs += 1;
        let epoch = self.epochs;

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            match TcpStream::connect(peer.socket()).await {
                Ok(stream) => {
                    let _ = events.send(Msg::Connected {
                        peer,
                        epoch,
                        stream,
                    });
                }
                Err(error) => {
                    let _ = events.send(Msg::ConnectFailed { peer, epoch, error });
                }
            }
        });

        let connect_timer = self
            .connect_timeout
            .map(|t| self.timers.schedule(Instant::now() + t, Timeout::Connect { peer, epoch }));

        self.actors.insert(
            peer,
            ClientActor {
                epoch,
                state: ClientState::Connecting {
                    pending: BytesMut::new(),
                    task,
                },
                connect_timer,
                idle_timer: None,
                rx_buf: BytesMut::new(),
            },
        );
        self.table.insert(peer);
        self.observer.add_actor(&peer);

        log::info!("tcp client connecting: peer={}", peer);
    }

    fn handle_disconnect(&mut self, peer: Address) {
        self.reconnect.remove(&peer);
        self.drop_actor(peer);
    }

    fn handle_indication(&mut self, pdu: Pdu) {
        let Some(peer) = pdu.destination else { return };
        if !self.actors.contains_key(&peer) {
            self.spawn_actor(peer);
        }

        let data = self.strategy.encode(pdu.data);
        let idle = self.idle_timeout;
        let Some(actor) = self.actors.get_mut(&peer) else {
            return;
        };

        match &mut actor.state {
            ClientState::Connecting { pending, .. } => {
                if pending.len() + data.len() > PENDING_SOFT_CAP {
                    log::warn!(
                        "tcp client pending overflow, pdu dropped: peer={}, queued={}",
                        peer,
                        pending.len()
                    );
                    self.observer.actor_error(&peer, &LinkError::Overflow(peer));
                    return;
                }

                pending.put_slice(&data);
            }
            ClientState::Connected { writer, .. } => {
                let _ = writer.send(data);
                if let (Some(handle), Some(timeout)) = (actor.idle_timer, idle) {
                    self.timers.rearm(handle, Instant::now() + timeout);
                }
            }
        }
    }

    fn handle_connected(&mut self, peer: Address, epoch: u64, stream: TcpStream) {
        let Some(actor) = self.actors.get_mut(&peer) else {
            return;
        };
        if actor.epoch != epoch {
            return;
        }

        if let Some(handle) = actor.connect_timer.take() {
            self.timers.cancel(handle);
        }
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("tcp client set nodelay failed: peer={}, err={}", peer, e);
        }

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

        // Everything submitted during the handshake goes out first.
        let previous = std::mem::replace(
            &mut actor.state,
            ClientState::Connected {
                writer: writer_tx.clone(),
                reader,
            },
        );
        if let ClientState::Connecting { pending, .. } = previous {
            if !pending.is_empty() {
                let _ = writer_tx.send(pending.freeze());
            }
        }

        if let Some(timeout) = self.idle_timeout {
            actor.idle_timer =
                Some(self.timers.schedule(Instant::now() + timeout, Timeout::Idle { peer, epoch }));
        }

        log::info!("tcp client connected: peer={}", peer);
    }

    fn handle_connect_failed(&mut self, peer: Address, epoch: u64, error: std::io::Error) {
        let Some(actor) = self.actors.get(&peer) else {
            return;
        };
        if actor.epoch != epoch {
            return;
        }

        log::warn!("tcp client connect failed: peer={}, err={}", peer, error);
        self.observer.actor_error(&peer, &LinkError::Io(error));
        self.drop_actor(peer);
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

    fn handle_closed(&mut self, peer: Address, epoch: u64, error: Option<std::io::Error>) {
        let Some(actor) = self.actors.get(&peer) else {
            return;
        };
        if actor.epoch != epoch {
            return;
        }

        if let Some(e) = error {
            log::warn!("tcp client connection error: peer={}, err={}", peer, e);
            self.observer.actor_error(&peer, &LinkError::Io(e));
        } else if !actor.rx_buf.is_empty() {
            log::warn!(
                "tcp client stream ended mid-frame: peer={}, residue={}",
                peer,
                actor.rx_buf.len()
            );
            self.observer
                .actor_error(&peer, &LinkError::PartialStream(peer));
        }

        self.drop_actor(peer);
    }

    fn handle_timeout(&mut self, timeout: Timeout) {
        match timeout {
            Timeout::Connect { peer, epoch } => {
                let Some(actor) = self.actors.get(&peer) else {
                    return;
                };
                if actor.epoch != epoch
                    || !matches!(actor.state, ClientState::Connecting { .. })
                {
                    return;
                }

                log::warn!("tcp client connect timed out: peer={}", peer);
                self.observer
                    .actor_error(&peer, &LinkError::ConnectTimeout(peer));
                self.drop_actor(peer);
            }
            Timeout::Idle { peer, epoch } => {
                let Some(actor) = self.actors.get(&peer) else {
                    return;
                };
                if actor.epoch != epoch {
                    return;
                }

                log::trace!("tcp client actor idle, closing: peer={}", peer);
                self.drop_actor(peer);
            }
            Timeout::Reconnect { peer } => {
                if self.actors.contains_key(&peer) || !self.reconnect.contains_key(&peer) {
                    return;
                }

                log::info!("tcp client reconnecting: peer={}", peer);
                self.spawn_actor(peer);
            }
        }
    }

    /// Tear the actor down, notify, and schedule a reconnect if the peer
    /// asked for one. Queued writes still drain before the socket closes.
    fn drop_actor(&mut self, peer: Address) {
        let Some(actor) = self.actors.remove(&peer) else {
            return;
        };

        if let Some(handle) = actor.connect_timer {
            self.timers.cancel(handle);
        }
        if let Some(handle) = actor.idle_timer {
            self.timers.cancel(handle);
        }

        match actor.state {
            ClientState::Connecting { task, .. } => task.abort(),
            ClientState::Connected { writer, reader } => {
                // Dropping the sender lets the writer task flush its queue
                // and shut the socket down; reading stops now.
                drop(writer);
                reader.abort();
            }
        }

        self.table.remove(&peer);
        self.observer.del_actor(&peer);

        if let Some(backoff) = self.reconnect.get(&peer).copied() {
            self.timers
                .schedule(Instant::now() + backoff, Timeout::Reconnect { peer });
            log::info!(
                "tcp client reconnect scheduled: peer={}, backoff={:?}",
                peer,
                backoff
            );
        }
    }

    fn shutdown(&mut self) {
        self.reconnect.clear();

        for (_, actor) in self.actors.drain() {
            match actor.state {
                ClientState::Connecting { task, .. } => task.abort(),
                ClientState::Connected { writer, reader } => {
                    drop(writer);
                    reader.abort();
                }
            }
        }

        self.table.clear();
        log::info!("tcp client director closed");
    }
}
