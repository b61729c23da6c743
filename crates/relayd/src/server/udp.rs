//! UDP receive loop and per-datagram command dispatcher.
//!
//! UDP has no connection state: every datagram is handled on its own by
//! [`UdpDispatcher::handle`]. The receive loop hands each datagram to a
//! short-lived task, holding one permit of a bounded semaphore per task.
//! When every permit is taken the loop waits before reading the next
//! datagram, so a flood backs up into the kernel socket buffer (and is
//! dropped there once it is full) instead of spawning without limit.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use relay_core::{
    classify, ChatError, ChatResult, ErrorKind, Nickname, Operation, Phase, Protocol,
    RelayedMessage, SessionIdentity,
};
use relay_protocol::{decode_frame, ServerMessage, UdpCommand};

use crate::registry::{PeerSink, SharedSink};
use crate::relay::{Audience, BroadcastRelay, DeliveryReport};

// ============================================================================
// Sink
// ============================================================================

/// The shared UDP socket, aimed at one peer.
pub struct DatagramSink {
    /// The relay's shared UDP socket
    socket: Arc<UdpSocket>,

    /// Address every frame is sent to
    peer: SocketAddr,
}

impl DatagramSink {
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self { socket, peer }
    }
}

#[async_trait]
impl PeerSink for DatagramSink {
    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        self.socket.send_to(frame, self.peer).await.map(|_| ())
    }

    // Nothing to close: the socket is shared by every UDP peer.
    async fn close(&self) {}
}

// ============================================================================
// Dispatcher
// ============================================================================

/// What handling one datagram did.
#[derive(Debug)]
pub enum DatagramOutcome {
    /// The datagram was not UTF-8 text.
    Malformed,
    Joined(Nickname),
    /// `/join:` with an invalid nickname.
    Rejected,
    Listed,
    /// `/exit`, with the nickname if the address had joined.
    Exited(Option<Nickname>),
    /// Chat from a joined address.
    Relayed(DeliveryReport),
    /// Chat from an address that never joined.
    NotJoined,
    /// Blank chat from a joined address.
    Ignored,
}

/// Interprets single datagrams.
pub struct UdpDispatcher {
    /// Socket replies go out on
    socket: Arc<UdpSocket>,

    /// Shared fan-out point and registries
    relay: BroadcastRelay,
}

impl UdpDispatcher {
    pub fn new(socket: Arc<UdpSocket>, relay: BroadcastRelay) -> Self {
        Self { socket, relay }
    }

    /// Handles one datagram from `source`.
    pub async fn handle(&self, bytes: &[u8], source: SocketAddr) -> DatagramOutcome {
        let text = match decode_frame(bytes) {
            Ok(text) => text,
            Err(err) => {
                self.relay.errors().record(&err, Phase::Datagram);
                self.reply(source, &ServerMessage::error(&err)).await;
                return DatagramOutcome::Malformed;
            }
        };

        let outcome = match UdpCommand::parse(text) {
            UdpCommand::Join(raw) => self.join(&raw, source).await,
            UdpCommand::List => {
                let roster = self.relay.roster().await;
                self.reply(source, &roster).await;
                DatagramOutcome::Listed
            }
            UdpCommand::Exit => self.exit(source).await,
            UdpCommand::Chat(content) => self.chat(&content, source).await,
        };

        debug!(source = %source, outcome = ?outcome, "Handled datagram");
        outcome
    }

    async fn join(&self, raw: &str, source: SocketAddr) -> DatagramOutcome {
        let nickname = match Nickname::parse(raw) {
            Ok(nickname) => nickname,
            Err(err) => {
                self.relay.errors().record(&err, Phase::Datagram);
                self.reply(source, &ServerMessage::rejected(&err)).await;
                return DatagramOutcome::Rejected;
            }
        };

        let sink: SharedSink = Arc::new(DatagramSink::new(Arc::clone(&self.socket), source));
        self.relay
            .udp()
            .register(source, nickname.clone(), sink)
            .await;
        info!(source = %source, nickname = %nickname, "UDP client joined");

        self.reply(source, &ServerMessage::welcome(&nickname, Protocol::Udp))
            .await;

        // Join notices stay on the UDP side.
        self.relay
            .broadcast(
                &ServerMessage::joined(&nickname, Protocol::Udp),
                Some(SessionIdentity::Udp(source)),
                Audience::Only(Protocol::Udp),
            )
            .await;

        DatagramOutcome::Joined(nickname)
    }

    async fn exit(&self, source: SocketAddr) -> DatagramOutcome {
        let left = self.relay.udp().unregister(&source).await;
        self.reply(source, &ServerMessage::Goodbye).await;

        if let Some(nickname) = &left {
            info!(source = %source, nickname = %nickname, "UDP client left");
            self.relay
                .broadcast(
                    &ServerMessage::left(nickname, Protocol::Udp),
                    Some(SessionIdentity::Udp(source)),
                    Audience::Only(Protocol::Udp),
                )
                .await;
        }

        DatagramOutcome::Exited(left)
    }

    async fn chat(&self, content: &str, source: SocketAddr) -> DatagramOutcome {
        let Some(nickname) = self.relay.udp().nickname_of(&source).await else {
            self.reply(source, &ServerMessage::JoinFirst).await;
            return DatagramOutcome::NotJoined;
        };

        match RelayedMessage::new(Protocol::Udp, nickname, content) {
            Some(message) => {
                let report = self.relay.relay(&message, Some(source.into())).await;
                DatagramOutcome::Relayed(report)
            }
            None => DatagramOutcome::Ignored,
        }
    }

    /// Single-attempt reply. A failure is logged and never unregisters.
    async fn reply(&self, target: SocketAddr, message: &ServerMessage) {
        if let Err(e) = self.socket.send_to(&message.to_frame(), target).await {
            let err = classify(e, Operation::Send, &format!("reply to {target}"));
            self.relay.errors().record(&err, Phase::Datagram);
        }
    }
}

// ============================================================================
// Receive Loop
// ============================================================================

/// Bound UDP socket plus its dispatcher.
pub struct UdpServer {
    /// Bound socket, shared with the dispatcher and every sink
    socket: Arc<UdpSocket>,

    /// Handles each datagram on its own task
    dispatcher: Arc<UdpDispatcher>,

    /// Shared fan-out point and registries
    relay: BroadcastRelay,

    /// Stops the receive loop
    cancel: CancellationToken,

    /// One permit per datagram being handled
    permits: Arc<Semaphore>,

    /// Largest datagram read, in bytes
    buffer_size: usize,
}

impl UdpServer {
    /// Binds the UDP socket on `addr`.
    ///
    /// # Errors
    ///
    /// `SocketBind` when the address cannot be bound; fatal to the UDP side
    /// only.
    pub async fn bind(
        addr: SocketAddr,
        buffer_size: usize,
        max_in_flight: usize,
        relay: BroadcastRelay,
        cancel: CancellationToken,
    ) -> ChatResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| classify(e, Operation::Bind, &format!("on UDP {addr}")))?;
        let socket = Arc::new(socket);

        Ok(Self {
            dispatcher: Arc::new(UdpDispatcher::new(Arc::clone(&socket), relay.clone())),
            socket,
            relay,
            cancel,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            buffer_size,
        })
    }

    pub fn local_addr(&self) -> ChatResult<SocketAddr> {
        self.socket.local_addr().map_err(|e| {
            ChatError::new(ErrorKind::Udp, "Failed to read UDP socket address").with_cause(e)
        })
    }

    /// Receives datagrams until cancelled.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!(addr = %addr, "UDP socket receiving datagrams");
        }

        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buffer) => received,
            };

            match received {
                Ok((len, source)) => {
                    let datagram = buffer.get(..len).unwrap_or(&[]).to_vec();
                    let dispatcher = Arc::clone(&self.dispatcher);
                    tokio::spawn(async move {
                        dispatcher.handle(&datagram, source).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    let err = ChatError::new(ErrorKind::Udp, "Failed to receive datagram")
                        .with_cause(e);
                    self.relay.errors().record(&err, Phase::Datagram);
                }
            }
        }

        info!("UDP receive loop stopped");
    }
}
