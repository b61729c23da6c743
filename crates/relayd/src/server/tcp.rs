//! TCP listener and per-connection session handler.
//!
//! Each accepted connection gets its own task running a [`SessionHandler`]:
//!
//! ```text
//! Connecting ──▶ Authenticating ──▶ Active ──▶ Terminated
//!                      │                           ▲
//!                      └──── rejected join ────────┘
//! ```
//!
//! Only the nickname read is time-bounded; an idle but connected session is
//! never timed out.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use relay_core::{
    classify, ChatError, ChatResult, ConnectionId, ErrorKind, Nickname, Operation, Phase,
    Protocol, Recovery, RelayedMessage,
};
use relay_protocol::{decode_frame, is_quit, ServerMessage};

use crate::registry::{PeerSink, SharedSink};
use crate::relay::{Audience, BroadcastRelay};

/// Write timeout for one frame.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session settings shared by every connection on a listener.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub buffer_size: usize,
    pub auth_timeout: Duration,
}

// ============================================================================
// Sink
// ============================================================================

/// Write half of a TCP connection.
///
/// Closing the sink also cancels its session, so a recipient the relay has
/// pruned stops reading as well as receiving.
pub struct TcpSink {
    /// Write half, locked per frame so frames never interleave.
    writer: Mutex<OwnedWriteHalf>,

    /// Fires once the sink has been closed.
    closed: CancellationToken,
}

impl TcpSink {
    pub fn new(writer: OwnedWriteHalf, closed: CancellationToken) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed,
        }
    }

    /// Token cancelled when this sink is closed.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}

#[async_trait]
impl PeerSink for TcpSink {
    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;

        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(frame).await?;
            writer.flush().await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Bound TCP listener.
pub struct TcpServer {
    /// Listening socket
    listener: TcpListener,

    /// Shared fan-out point and registries
    relay: BroadcastRelay,

    /// Server-wide shutdown token; each session gets a child of it
    cancel: CancellationToken,

    /// Buffer size and auth timeout handed to every session
    settings: SessionSettings,

    /// Source of connection ids
    connection_counter: AtomicU64,
}

impl TcpServer {
    /// Creates, binds and starts listening on `addr`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `SocketCreation`, `SocketBind` or `ServerStartup`, matching the step
    /// that failed. All of them are fatal to the TCP side only.
    pub fn bind(
        addr: SocketAddr,
        backlog: u32,
        settings: SessionSettings,
        relay: BroadcastRelay,
        cancel: CancellationToken,
    ) -> ChatResult<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| {
            ChatError::new(ErrorKind::SocketCreation, "Failed to create TCP socket").with_cause(e)
        })?;

        socket.set_reuseaddr(true).map_err(|e| {
            ChatError::new(ErrorKind::SocketCreation, "Failed to configure TCP socket").with_cause(e)
        })?;

        socket
            .bind(addr)
            .map_err(|e| classify(e, Operation::Bind, &format!("on TCP {addr}")))?;

        let listener = socket.listen(backlog).map_err(|e| {
            ChatError::new(ErrorKind::ServerStartup, format!("Failed to listen on TCP {addr}"))
                .with_cause(e)
        })?;

        Ok(Self {
            listener,
            relay,
            cancel,
            settings,
            connection_counter: AtomicU64::new(0),
        })
    }

    pub fn local_addr(&self) -> ChatResult<SocketAddr> {
        self.listener.local_addr().map_err(|e| {
            ChatError::new(ErrorKind::Tcp, "Failed to read TCP listener address").with_cause(e)
        })
    }

    /// Accepts connections until cancelled.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!(addr = %addr, "TCP listener accepting connections");
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("TCP accept loop cancelled");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_session(stream, peer),
                        Err(e) => {
                            let err = classify(e, Operation::Accept, "on TCP listener");
                            self.relay.errors().record(&err, Phase::Accept);
                        }
                    }
                }
            }
        }

        info!("TCP listener stopped");
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed));

        if let Err(e) = stream.set_nodelay(true) {
            let err = ChatError::new(ErrorKind::Tcp, format!("Failed to set TCP_NODELAY for {peer}"))
                .with_cause(e);
            self.relay.errors().record(&err, Phase::Accept);
        }

        let handler = SessionHandler::new(
            id,
            peer,
            stream,
            self.relay.clone(),
            self.cancel.clone(),
            self.settings,
        );
        tokio::spawn(handler.run());
    }
}

// ============================================================================
// Session Handler
// ============================================================================

/// Lifecycle state of a TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Terminated,
}

/// Drives one TCP connection from accept to close.
pub struct SessionHandler {
    /// Registry key of this session
    id: ConnectionId,

    /// Remote address, for logs and messages
    peer: SocketAddr,

    /// Read half of the connection
    reader: OwnedReadHalf,

    /// Write half, shared with the registry once joined
    sink: Arc<TcpSink>,

    /// Shared fan-out point and registries
    relay: BroadcastRelay,

    /// Session token: cancelled by server shutdown or by closing the sink
    cancel: CancellationToken,

    /// Buffer size and auth timeout
    settings: SessionSettings,

    /// Read buffer; one read is one frame
    buffer: Vec<u8>,

    /// Current lifecycle state
    state: SessionState,
}

impl SessionHandler {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        stream: TcpStream,
        relay: BroadcastRelay,
        cancel: CancellationToken,
        settings: SessionSettings,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        let cancel = cancel.child_token();
        Self {
            id,
            peer,
            reader,
            sink: Arc::new(TcpSink::new(writer, cancel.clone())),
            relay,
            cancel,
            settings,
            buffer: vec![0; settings.buffer_size],
            state: SessionState::Connecting,
        }
    }

    /// Runs the session to completion. Cleanup runs on every exit path.
    pub async fn run(mut self) {
        debug!(connection = %self.id, peer = %self.peer, "New TCP connection");

        self.transition(SessionState::Authenticating);
        let nickname = match self.authenticate().await {
            Ok(nickname) => Some(nickname),
            Err(err) => {
                self.relay.errors().record(&err, Phase::Authenticate);
                self.reject(&err).await;
                None
            }
        };

        let mut announced = None;
        if let Some(nickname) = nickname {
            self.transition(SessionState::Active);
            if self.join(&nickname).await {
                self.receive_loop(&nickname).await;
                announced = Some(nickname);
            }
        }

        self.terminate(announced).await;
    }

    fn transition(&mut self, next: SessionState) {
        debug!(connection = %self.id, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    /// Reads and validates the nickname frame.
    async fn authenticate(&mut self) -> ChatResult<Nickname> {
        let auth_timeout = self.settings.auth_timeout;
        let bytes_read = match timeout(auth_timeout, self.read_frame()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ChatError::new(
                    ErrorKind::MessageTimeout,
                    format!(
                        "No nickname received from {} within {}s",
                        self.peer,
                        auth_timeout.as_secs_f32()
                    ),
                ))
            }
        };

        if bytes_read == 0 {
            return Err(ChatError::authentication(format!(
                "Connection from {} closed before a nickname was sent",
                self.peer
            )));
        }

        let text = decode_frame(self.frame(bytes_read))?;
        Nickname::parse(text)
    }

    async fn reject(&self, err: &ChatError) {
        if let Err(e) = self.sink.send(&ServerMessage::rejected(err).to_frame()).await {
            debug!(connection = %self.id, error = %e, "Failed to send rejection");
        }
    }

    /// Registers the session, welcomes it and announces it.
    ///
    /// Returns `false` if the welcome could not be delivered, in which case
    /// nothing was announced.
    async fn join(&self, nickname: &Nickname) -> bool {
        let shared: SharedSink = self.sink.clone();
        self.relay
            .tcp()
            .register(self.id, nickname.clone(), shared)
            .await;

        info!(
            connection = %self.id,
            peer = %self.peer,
            nickname = %nickname,
            "TCP client joined"
        );

        let welcome = ServerMessage::welcome(nickname, Protocol::Tcp);
        if let Err(e) = self.sink.send(&welcome.to_frame()).await {
            let err = classify(e, Operation::Send, &format!("welcome to {}", self.peer));
            self.relay.errors().record(&err, Phase::Active);
            if err.recovery(Phase::Active) == Recovery::TerminateSession {
                return false;
            }
        }

        self.relay
            .broadcast(
                &ServerMessage::joined(nickname, Protocol::Tcp),
                Some(self.id.into()),
                Audience::Everyone,
            )
            .await;
        true
    }

    async fn receive_loop(&mut self, nickname: &Nickname) {
        let cancel = self.cancel.clone();
        loop {
            let result = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(connection = %self.id, "Session cancelled");
                    return;
                }
                result = self.read_frame() => result,
            };

            let bytes_read = match result {
                Ok(0) => {
                    let err = ChatError::disconnection(format!("Connection closed by {}", self.peer));
                    self.relay.errors().record(&err, Phase::Active);
                    return;
                }
                Ok(n) => n,
                Err(err) => {
                    self.relay.errors().record(&err, Phase::Active);
                    match err.recovery(Phase::Active) {
                        Recovery::Continue => continue,
                        _ => return,
                    }
                }
            };

            let text = match decode_frame(self.frame(bytes_read)) {
                Ok(text) => text.to_string(),
                Err(err) => {
                    self.relay.errors().record(&err, Phase::Active);
                    match err.recovery(Phase::Active) {
                        Recovery::Continue => continue,
                        _ => return,
                    }
                }
            };

            if is_quit(&text) {
                debug!(connection = %self.id, "Client sent quit");
                return;
            }

            let Some(message) = RelayedMessage::new(Protocol::Tcp, nickname.clone(), &text) else {
                continue;
            };
            self.relay.relay(&message, Some(self.id.into())).await;
        }
    }

    /// Unregisters and closes the session. `announced` is the nickname whose
    /// join notice went out, if any; only that gets a departure notice.
    async fn terminate(&mut self, announced: Option<Nickname>) {
        self.transition(SessionState::Terminated);

        self.relay.tcp().unregister(&self.id).await;
        self.sink.close().await;

        if let Some(nickname) = announced {
            info!(connection = %self.id, nickname = %nickname, "TCP client left");
            self.relay
                .broadcast(
                    &ServerMessage::left(&nickname, Protocol::Tcp),
                    Some(self.id.into()),
                    Audience::Everyone,
                )
                .await;
        }
    }

    async fn read_frame(&mut self) -> ChatResult<usize> {
        self.reader
            .read(&mut self.buffer)
            .await
            .map_err(|e| classify(e, Operation::Recv, &format!("from {}", self.peer)))
    }

    fn frame(&self, len: usize) -> &[u8] {
        self.buffer.get(..len).unwrap_or(&[])
    }
}
