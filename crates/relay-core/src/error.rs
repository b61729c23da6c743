//! Error taxonomy and recovery policy for the relay.
//!
//! Every failure the relay handles is a [`ChatError`]: one error type tagged
//! with an [`ErrorKind`], a human-readable message, an optional wrapped cause
//! and the moment it was raised. Low-level I/O failures are mapped into the
//! taxonomy with [`classify`], and what the caller does next is decided by
//! [`ErrorKind::recovery`] for the [`Phase`] the error occurred in.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()` or `todo!()`.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp format used in error details and log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Error Kind
// ============================================================================

/// The closed set of error kinds the relay distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Establishing or accepting a connection failed.
    Connection,
    /// The peer went away (EOF, reset, broken pipe).
    Disconnection,
    /// Binding a listening socket failed.
    SocketBind,
    /// Creating a socket failed.
    SocketCreation,
    /// Writing a frame to a peer failed.
    MessageSend,
    /// Reading a frame from a peer failed.
    MessageReceive,
    /// A frame was not valid UTF-8 text.
    InvalidMessageFormat,
    /// A bounded read did not complete in time.
    MessageTimeout,
    /// A peer did not complete the join handshake.
    Authentication,
    /// Input (such as a nickname) failed validation.
    Validation,
    /// A listener could not be brought up.
    ServerStartup,
    /// Tearing the server down failed.
    ServerShutdown,
    /// A broadcast could not be delivered.
    Broadcast,
    /// Failure specific to the TCP transport.
    Tcp,
    /// Failure specific to the UDP transport.
    Udp,
}

impl ErrorKind {
    /// Name used in logs and error details.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Disconnection => "DisconnectionError",
            ErrorKind::SocketBind => "SocketBindError",
            ErrorKind::SocketCreation => "SocketCreationError",
            ErrorKind::MessageSend => "MessageSendError",
            ErrorKind::MessageReceive => "MessageReceiveError",
            ErrorKind::InvalidMessageFormat => "InvalidMessageFormatError",
            ErrorKind::MessageTimeout => "MessageTimeoutError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::ServerStartup => "ServerStartupError",
            ErrorKind::ServerShutdown => "ServerShutdownError",
            ErrorKind::Broadcast => "BroadcastError",
            ErrorKind::Tcp => "TCPError",
            ErrorKind::Udp => "UDPError",
        }
    }

    /// Connection-level failures: connect, disconnect and bind.
    #[must_use]
    pub fn is_connection_error(self) -> bool {
        matches!(
            self,
            ErrorKind::Connection | ErrorKind::Disconnection | ErrorKind::SocketBind
        )
    }

    /// Message-level failures: send, receive and decode.
    #[must_use]
    pub fn is_message_error(self) -> bool {
        matches!(
            self,
            ErrorKind::MessageSend | ErrorKind::MessageReceive | ErrorKind::InvalidMessageFormat
        )
    }

    /// Decides what the caller does with an error of this kind.
    ///
    /// | Phase          | Outcome                                                   |
    /// |----------------|-----------------------------------------------------------|
    /// | `Startup`      | abort that protocol's server                              |
    /// | `Accept`       | log and keep accepting                                    |
    /// | `Authenticate` | reject the join                                           |
    /// | `Active`       | terminate the session on transport/decode failures        |
    /// | `Broadcast`    | prune the failing recipient                               |
    /// | `Datagram`     | reject invalid joins, otherwise log and keep receiving    |
    /// | `Shutdown`     | log and keep tearing down                                 |
    pub fn recovery(self, phase: Phase) -> Recovery {
        match phase {
            Phase::Startup => Recovery::AbortServer,
            Phase::Accept | Phase::Shutdown => Recovery::Continue,
            Phase::Authenticate => Recovery::RejectJoin,
            Phase::Active => match self {
                ErrorKind::Disconnection
                | ErrorKind::MessageReceive
                | ErrorKind::InvalidMessageFormat
                | ErrorKind::MessageTimeout
                | ErrorKind::MessageSend
                | ErrorKind::Tcp => Recovery::TerminateSession,
                _ => Recovery::Continue,
            },
            Phase::Broadcast => Recovery::PruneRecipient,
            Phase::Datagram => match self {
                ErrorKind::Validation | ErrorKind::Authentication => Recovery::RejectJoin,
                _ => Recovery::Continue,
            },
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Recovery Policy
// ============================================================================

/// Where in the relay's lifecycle an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Creating, binding or listening on a server socket.
    Startup,
    /// Accepting a TCP connection.
    Accept,
    /// Reading and validating the TCP nickname frame.
    Authenticate,
    /// The TCP receive loop of a joined session.
    Active,
    /// Delivering one frame to one recipient.
    Broadcast,
    /// Handling a single UDP datagram.
    Datagram,
    /// Tearing the server down.
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Startup => "startup",
            Phase::Accept => "accept",
            Phase::Authenticate => "authenticate",
            Phase::Active => "active",
            Phase::Broadcast => "broadcast",
            Phase::Datagram => "datagram",
            Phase::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// What to do after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Stop that protocol's server; the sibling protocol keeps running.
    AbortServer,
    /// Log and carry on with the loop that raised it.
    Continue,
    /// End the session that raised it.
    TerminateSession,
    /// Remove the recipient from its registry.
    PruneRecipient,
    /// Refuse the join attempt.
    RejectJoin,
}

// ============================================================================
// Socket Operations
// ============================================================================

/// The socket operation that produced a raw I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Accept,
    Send,
    Recv,
    Bind,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::Accept => "accept",
            Operation::Send => "send",
            Operation::Recv => "recv",
            Operation::Bind => "bind",
        };
        f.write_str(name)
    }
}

/// Maps a raw I/O error from `operation` into the taxonomy.
///
/// `context` is appended to the message, e.g. `"to 127.0.0.1:5555"`.
pub fn classify(error: io::Error, operation: Operation, context: &str) -> ChatError {
    let lowered = error.to_string().to_lowercase();
    let kind = error.kind();

    let (error_kind, summary) = match operation {
        Operation::Connect | Operation::Accept => {
            let summary = if kind == io::ErrorKind::TimedOut {
                "Connection timeout"
            } else if kind == io::ErrorKind::ConnectionRefused || lowered.contains("refused") {
                "Connection refused"
            } else if lowered.contains("unreachable") {
                "Network unreachable"
            } else {
                "Connection failed"
            };
            (ErrorKind::Connection, summary)
        }
        Operation::Send => {
            if kind == io::ErrorKind::BrokenPipe || lowered.contains("broken pipe") {
                (ErrorKind::Disconnection, "Connection broken during send")
            } else if kind == io::ErrorKind::ConnectionReset || lowered.contains("reset") {
                (ErrorKind::Disconnection, "Connection reset during send")
            } else {
                (ErrorKind::MessageSend, "Failed to send")
            }
        }
        Operation::Recv => match kind {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                (ErrorKind::MessageTimeout, "Receive timeout")
            }
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => {
                (ErrorKind::Disconnection, "Connection reset during receive")
            }
            _ if lowered.contains("reset") => {
                (ErrorKind::Disconnection, "Connection reset during receive")
            }
            _ => (ErrorKind::MessageReceive, "Failed to receive"),
        },
        Operation::Bind => {
            let summary = if kind == io::ErrorKind::AddrInUse || lowered.contains("already in use")
            {
                "Address already in use"
            } else if kind == io::ErrorKind::PermissionDenied
                || lowered.contains("permission denied")
            {
                "Permission denied"
            } else {
                "Failed to bind"
            };
            (ErrorKind::SocketBind, summary)
        }
    };

    ChatError::new(error_kind, with_context(summary, context)).with_cause(error)
}

fn with_context(summary: &str, context: &str) -> String {
    if context.is_empty() {
        summary.to_string()
    } else {
        format!("{summary} {context}")
    }
}

// ============================================================================
// Chat Error
// ============================================================================

/// A low-level error wrapped by a [`ChatError`].
#[derive(Debug, Error)]
#[error("{inner}")]
pub struct Cause {
    /// Last path segment of the wrapped error's type name.
    type_name: &'static str,

    /// The wrapped error itself.
    #[source]
    inner: Box<dyn StdError + Send + Sync + 'static>,
}

impl Cause {
    /// Short type name of the wrapped error, e.g. `"Error"` for `std::io::Error`.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

/// An error raised anywhere in the relay.
///
/// Displays as `"{message} | Original: {cause}"` when a cause is attached.
#[derive(Debug, Error)]
#[error("{message}{}", original_suffix(.cause))]
pub struct ChatError {
    /// Which branch of the taxonomy this error belongs to.
    kind: ErrorKind,

    /// Human-readable description, including any context.
    message: String,

    /// The low-level error this one was raised from, if any.
    #[source]
    cause: Option<Cause>,

    /// When the error was raised.
    timestamp: DateTime<Utc>,
}

fn original_suffix(cause: &Option<Cause>) -> String {
    cause
        .as_ref()
        .map(|c| format!(" | Original: {c}"))
        .unwrap_or_default()
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            timestamp: Utc::now(),
        }
    }

    /// Attaches the low-level error that caused this one.
    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let full = std::any::type_name::<E>();
        let type_name = full.rsplit("::").next().unwrap_or(full);
        self.cause = Some(Cause {
            type_name,
            inner: Box::new(cause),
        });
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMessageFormat, message)
    }

    pub fn disconnection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Disconnection, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Recovery decision for this error in `phase`.
    pub fn recovery(&self, phase: Phase) -> Recovery {
        self.kind.recovery(phase)
    }

    /// Structured, serializable view of this error.
    pub fn details(&self) -> ErrorDetails {
        ErrorDetails {
            kind: self.kind.name().to_string(),
            message: self.message.clone(),
            original_error: self.cause.as_ref().map(ToString::to_string),
            original_type: self.cause.as_ref().map(|c| c.type_name().to_string()),
            timestamp: self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Text suitable for sending back to the peer.
    pub fn user_message(&self) -> String {
        let message = &self.message;
        match self.kind {
            ErrorKind::Connection => format!("❌ Connection failed: {message}"),
            ErrorKind::Disconnection => format!("⚠️ Disconnected: {message}"),
            ErrorKind::MessageSend => format!("❌ Failed to send message: {message}"),
            ErrorKind::MessageReceive => format!("❌ Failed to receive message: {message}"),
            ErrorKind::InvalidMessageFormat => format!("⚠️ Invalid message: {message}"),
            ErrorKind::Authentication | ErrorKind::MessageTimeout => {
                format!("❌ Authentication failed: {message}")
            }
            ErrorKind::Validation => format!("❌ Invalid input: {message}"),
            ErrorKind::SocketBind => format!("❌ Cannot start server: {message}"),
            _ => format!("❌ Error: {message}"),
        }
    }
}

/// Serializable record of a [`ChatError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub original_error: Option<String>,
    pub original_type: Option<String>,
    pub timestamp: String,
}

/// Result type for relay operations.
pub type ChatResult<T> = Result<T, ChatError>;
