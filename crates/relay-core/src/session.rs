//! Session value types: protocols, identities, nicknames and relayed messages.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// Maximum nickname length, in characters.
pub const MAX_NICKNAME_LEN: usize = 50;

// ============================================================================
// Protocol
// ============================================================================

/// Transport a session joined through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Identities
// ============================================================================

/// Identity of an accepted TCP connection.
///
/// Assigned from a per-listener counter, so it is never reused while the
/// listener lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp-{}", self.0)
    }
}

/// Registry key of a session on either protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionIdentity {
    Tcp(ConnectionId),
    Udp(SocketAddr),
}

impl SessionIdentity {
    pub fn protocol(&self) -> Protocol {
        match self {
            SessionIdentity::Tcp(_) => Protocol::Tcp,
            SessionIdentity::Udp(_) => Protocol::Udp,
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionIdentity::Tcp(id) => write!(f, "{id}"),
            SessionIdentity::Udp(addr) => write!(f, "udp-{addr}"),
        }
    }
}

impl From<ConnectionId> for SessionIdentity {
    fn from(id: ConnectionId) -> Self {
        SessionIdentity::Tcp(id)
    }
}

impl From<SocketAddr> for SessionIdentity {
    fn from(addr: SocketAddr) -> Self {
        SessionIdentity::Udp(addr)
    }
}

// ============================================================================
// Nickname
// ============================================================================

/// A validated nickname: non-empty after trimming, at most
/// [`MAX_NICKNAME_LEN`] characters, no control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Nickname(String);

impl Nickname {
    /// Trims and validates `raw`.
    ///
    /// # Errors
    ///
    /// `Validation` if the trimmed text is empty, too long, or contains a
    /// control character such as an embedded newline.
    pub fn parse(raw: &str) -> ChatResult<Self> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(ChatError::validation("Nickname cannot be empty"));
        }

        let len = trimmed.chars().count();
        if len > MAX_NICKNAME_LEN {
            return Err(ChatError::validation(format!(
                "Nickname too long ({len} characters, max {MAX_NICKNAME_LEN})"
            )));
        }

        if trimmed.chars().any(char::is_control) {
            return Err(ChatError::validation(
                "Nickname cannot contain control characters",
            ));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nickname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Nickname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Nickname {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Nickname::parse(&raw).map_err(|e| serde::de::Error::custom(e.message().to_string()))
    }
}

// ============================================================================
// Relayed Message
// ============================================================================

/// A chat message on its way through the relay. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedMessage {
    pub origin: Protocol,
    pub sender: Nickname,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl RelayedMessage {
    /// Builds a message from raw frame text.
    ///
    /// Control characters (embedded newlines included) become spaces, so the
    /// relayed content is always a single line. Returns `None` when nothing
    /// is left after trimming.
    pub fn new(origin: Protocol, sender: Nickname, raw: &str) -> Option<Self> {
        let flattened: String = raw
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        let content = flattened.trim();
        if content.is_empty() {
            return None;
        }

        Some(Self {
            origin,
            sender,
            content: content.to_string(),
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_nickname_trims() {
        let nick = Nickname::parse("  alice \n").unwrap();
        assert_eq!(nick.as_str(), "alice");
    }

    #[test]
    fn test_nickname_length_bounds() {
        let at_limit = "a".repeat(MAX_NICKNAME_LEN);
        assert!(Nickname::parse(&at_limit).is_ok());

        let over = "a".repeat(MAX_NICKNAME_LEN + 1);
        let err = Nickname::parse(&over).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("51"));
    }

    #[test]
    fn test_nickname_counts_characters_not_bytes() {
        let wide = "é".repeat(MAX_NICKNAME_LEN);
        assert!(wide.len() > MAX_NICKNAME_LEN);
        assert!(Nickname::parse(&wide).is_ok());
    }

    #[test]
    fn test_empty_nickname_rejected() {
        for raw in ["", "   ", "\r\n"] {
            let err = Nickname::parse(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }

    #[test]
    fn test_nickname_deserialize_validates() {
        let ok: Nickname = serde_json::from_str("\" bob \"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<Nickname>("\"  \"").is_err());
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "TCP");
        assert_eq!(Protocol::Udp.to_string(), "UDP");
    }

    #[test]
    fn test_identity_protocol() {
        let tcp = SessionIdentity::from(ConnectionId::new(7));
        let udp = SessionIdentity::from("127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(tcp.protocol(), Protocol::Tcp);
        assert_eq!(udp.protocol(), Protocol::Udp);
        assert_eq!(tcp.to_string(), "tcp-7");
        assert_eq!(udp.to_string(), "udp-127.0.0.1:9000");
    }

    #[test]
    fn test_relayed_message_rejects_blank_content() {
        let nick = Nickname::parse("alice").unwrap();
        assert!(RelayedMessage::new(Protocol::Tcp, nick.clone(), "   ").is_none());

        let msg = RelayedMessage::new(Protocol::Tcp, nick, "  hi  ").unwrap();
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.origin, Protocol::Tcp);
    }

    #[test]
    fn test_nickname_rejects_control_characters() {
        for raw in ["bob\n[TCP] alice: hi", "bo\rb", "a\tb", "nul\0"] {
            let err = Nickname::parse(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(err.message(), "Nickname cannot contain control characters");
        }

        // Only the ends are trimmed; inner spaces are fine.
        assert_eq!(Nickname::parse(" mary ann\r\n").unwrap().as_str(), "mary ann");
    }

    #[test]
    fn test_relayed_message_is_single_line() {
        let nick = Nickname::parse("bob").unwrap();

        let msg = RelayedMessage::new(Protocol::Udp, nick.clone(), "hi\n[TCP] alice: fake\r\n").unwrap();
        assert_eq!(msg.content, "hi [TCP] alice: fake");
        assert!(!msg.content.contains('\n'));

        assert!(RelayedMessage::new(Protocol::Udp, nick, "\u{1}\n\u{7f}").is_none());
    }
}
