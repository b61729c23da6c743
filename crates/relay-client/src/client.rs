//! Raw-socket chat clients.
//!
//! Both clients speak the relay's plain-text protocol directly and report
//! failures through the shared [`ChatError`] taxonomy.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use relay_core::{classify, ChatError, ChatResult, Operation};
use relay_protocol::frame::QUIT_COMMAND;
use relay_protocol::{decode_frame, UdpCommand, DEFAULT_BUFFER_SIZE};

/// Prefix of the welcome line that confirms a join.
const WELCOME_PREFIX: &str = "✅";

/// Prefixes of the lines that refuse a join.
const REJECTION_PREFIXES: [&str; 2] = ["❌", "⚠️"];

// ============================================================================
// TCP
// ============================================================================

/// A joined-or-joining TCP chat connection.
pub struct TcpChatClient {
    lines: ServerLines,
    writer: TcpChatWriter,
}

/// Incoming newline-terminated frames from the relay.
pub struct ServerLines {
    lines: Lines<BufReader<OwnedReadHalf>>,
    /// Relay address, for error context
    server: SocketAddr,
}

/// Outgoing half of a TCP chat connection.
pub struct TcpChatWriter {
    writer: OwnedWriteHalf,
    /// Relay address, for error context
    server: SocketAddr,
}

impl TcpChatClient {
    /// Connects to the relay's TCP listener.
    pub async fn connect(server: SocketAddr) -> ChatResult<Self> {
        let stream = TcpStream::connect(server)
            .await
            .map_err(|e| classify(e, Operation::Connect, &format!("to {server}")))?;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: ServerLines {
                lines: BufReader::new(reader).lines(),
                server,
            },
            writer: TcpChatWriter { writer, server },
        })
    }

    /// Sends the nickname and waits for the relay's answer.
    ///
    /// Returns the welcome line.
    ///
    /// # Errors
    ///
    /// `Authentication` carrying the relay's rejection text, or
    /// `Disconnection` if the relay closed without answering.
    pub async fn join(&mut self, nickname: &str) -> ChatResult<String> {
        self.writer.send_text(nickname).await?;

        // Broadcasts can land ahead of the answer; they are skipped.
        while let Some(line) = self.lines.next().await? {
            if line.starts_with(WELCOME_PREFIX) {
                return Ok(line);
            }
            if REJECTION_PREFIXES.iter().any(|p| line.starts_with(p)) {
                return Err(ChatError::authentication(line));
            }
            debug!(frame = %line, "Skipping frame received before join answer");
        }

        Err(ChatError::disconnection(format!(
            "{} closed the connection during join",
            self.lines.server
        )))
    }

    pub async fn say(&mut self, text: &str) -> ChatResult<()> {
        self.writer.send_text(text).await
    }

    pub async fn quit(&mut self) -> ChatResult<()> {
        self.writer.quit().await
    }

    /// Next frame from the relay, or `None` once it closed the connection.
    pub async fn recv_line(&mut self) -> ChatResult<Option<String>> {
        self.lines.next().await
    }

    /// Splits into independently usable read and write halves.
    pub fn into_split(self) -> (ServerLines, TcpChatWriter) {
        (self.lines, self.writer)
    }
}

impl ServerLines {
    /// Next frame, without its newline. Cancel-safe.
    pub async fn next(&mut self) -> ChatResult<Option<String>> {
        self.lines
            .next_line()
            .await
            .map_err(|e| classify(e, Operation::Recv, &format!("from {}", self.server)))
    }
}

impl TcpChatWriter {
    /// Writes `text` as one frame.
    pub async fn send_text(&mut self, text: &str) -> ChatResult<()> {
        let context = format!("to {}", self.server);
        self.writer
            .write_all(text.as_bytes())
            .await
            .map_err(|e| classify(e, Operation::Send, &context))?;
        self.writer
            .flush()
            .await
            .map_err(|e| classify(e, Operation::Send, &context))
    }

    /// Sends `quit` and half-closes the connection.
    pub async fn quit(&mut self) -> ChatResult<()> {
        self.send_text(QUIT_COMMAND).await?;
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Shutdown after quit failed");
        }
        Ok(())
    }
}

// ============================================================================
// UDP
// ============================================================================

/// A UDP chat endpoint connected to the relay's socket.
pub struct UdpChatClient {
    /// Local socket, connected to the relay
    socket: UdpSocket,
    /// Relay address, for error context
    server: SocketAddr,
}

impl UdpChatClient {
    /// Binds an ephemeral local port and aims it at `server`.
    pub async fn connect(server: SocketAddr) -> ChatResult<Self> {
        let local = if server.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| classify(e, Operation::Bind, &format!("on UDP {local}")))?;
        socket
            .connect(server)
            .await
            .map_err(|e| classify(e, Operation::Connect, &format!("to UDP {server}")))?;

        Ok(Self { socket, server })
    }

    pub fn local_addr(&self) -> ChatResult<SocketAddr> {
        self.socket.local_addr().map_err(|e| {
            ChatError::new(relay_core::ErrorKind::Udp, "Failed to read UDP socket address")
                .with_cause(e)
        })
    }

    /// Sends one command as one datagram.
    pub async fn send(&self, command: &UdpCommand) -> ChatResult<()> {
        self.socket
            .send(command.to_string().as_bytes())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, Operation::Send, &format!("to UDP {}", self.server)))
    }

    pub async fn join(&self, nickname: &str) -> ChatResult<()> {
        self.send(&UdpCommand::join(nickname)).await
    }

    pub async fn list(&self) -> ChatResult<()> {
        self.send(&UdpCommand::List).await
    }

    pub async fn exit(&self) -> ChatResult<()> {
        self.send(&UdpCommand::Exit).await
    }

    pub async fn say(&self, text: &str) -> ChatResult<()> {
        self.send(&UdpCommand::chat(text)).await
    }

    /// Sends raw bytes as one datagram.
    pub async fn send_raw(&self, bytes: &[u8]) -> ChatResult<()> {
        self.socket
            .send(bytes)
            .await
            .map(|_| ())
            .map_err(|e| classify(e, Operation::Send, &format!("to UDP {}", self.server)))
    }

    /// Next datagram from the relay, without its newline.
    pub async fn recv(&self) -> ChatResult<String> {
        let mut buffer = vec![0; DEFAULT_BUFFER_SIZE];
        let len = self
            .socket
            .recv(&mut buffer)
            .await
            .map_err(|e| classify(e, Operation::Recv, &format!("from UDP {}", self.server)))?;

        let text = decode_frame(buffer.get(..len).unwrap_or(&[]))?;
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }
}
