//! Frames sent from the relay to clients.
//!
//! Every outbound frame is a single line of UTF-8 text terminated by `\n`.

use std::fmt;

use relay_core::{ChatError, Nickname, Protocol, RelayedMessage};

/// Rendered in a roster when a protocol has nobody joined.
pub const EMPTY_ROSTER: &str = "None";

/// Messages sent from the relay to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// `[TCP] alice: hi`
    Chat {
        origin: Protocol,
        sender: Nickname,
        content: String,
    },

    /// `📢 alice joined via TCP`
    Joined { nickname: Nickname, via: Protocol },

    /// `📢 alice left via TCP`
    Left { nickname: Nickname, via: Protocol },

    /// Acknowledges a successful join.
    Welcome { nickname: Nickname, via: Protocol },

    /// A join attempt was refused.
    Rejected { reason: String },

    /// Nicknames currently joined on each protocol.
    Roster {
        tcp: Vec<Nickname>,
        udp: Vec<Nickname>,
    },

    /// Chat from an address that never joined.
    JoinFirst,

    /// Reply to `/exit`.
    Goodbye,

    /// Sent to everyone before the relay stops.
    ShuttingDown,

    /// Generic error reply.
    Error { message: String },
}

impl ServerMessage {
    /// Creates a chat frame from a relayed message.
    pub fn chat(message: &RelayedMessage) -> Self {
        Self::Chat {
            origin: message.origin,
            sender: message.sender.clone(),
            content: message.content.clone(),
        }
    }

    /// Creates a join notice.
    pub fn joined(nickname: &Nickname, via: Protocol) -> Self {
        Self::Joined {
            nickname: nickname.clone(),
            via,
        }
    }

    /// Creates a leave notice.
    pub fn left(nickname: &Nickname, via: Protocol) -> Self {
        Self::Left {
            nickname: nickname.clone(),
            via,
        }
    }

    /// Creates a welcome acknowledgement.
    pub fn welcome(nickname: &Nickname, via: Protocol) -> Self {
        Self::Welcome {
            nickname: nickname.clone(),
            via,
        }
    }

    /// Creates a rejection carrying the error's user-facing text.
    pub fn rejected(error: &ChatError) -> Self {
        Self::Rejected {
            reason: error.user_message(),
        }
    }

    /// Creates a roster reply.
    pub fn roster(tcp: Vec<Nickname>, udp: Vec<Nickname>) -> Self {
        Self::Roster { tcp, udp }
    }

    /// Creates an error reply carrying the error's user-facing text.
    pub fn error(error: &ChatError) -> Self {
        Self::Error {
            message: error.user_message(),
        }
    }

    /// Renders the frame as bytes, including the trailing newline.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = self.to_string();
        frame.push('\n');
        frame.into_bytes()
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Chat {
                origin,
                sender,
                content,
            } => write!(f, "[{origin}] {sender}: {content}"),
            ServerMessage::Joined { nickname, via } => write!(f, "📢 {nickname} joined via {via}"),
            ServerMessage::Left { nickname, via } => write!(f, "📢 {nickname} left via {via}"),
            ServerMessage::Welcome { nickname, via } => {
                write!(f, "✅ Welcome {nickname}! Connected via {via}")
            }
            ServerMessage::Rejected { reason } => f.write_str(reason),
            ServerMessage::Roster { tcp, udp } => write!(
                f,
                "👥 Online - TCP: {} | UDP: {}",
                join_names(tcp),
                join_names(udp)
            ),
            ServerMessage::JoinFirst => f.write_str("⚠️ Please join first with /join:<nickname>"),
            ServerMessage::Goodbye => f.write_str("👋 Goodbye!"),
            ServerMessage::ShuttingDown => f.write_str("🛑 Server is shutting down"),
            ServerMessage::Error { message } => f.write_str(message),
        }
    }
}

fn join_names(names: &[Nickname]) -> String {
    if names.is_empty() {
        return EMPTY_ROSTER.to_string();
    }
    names
        .iter()
        .map(Nickname::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
