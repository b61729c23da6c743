//! UDP command grammar.
//!
//! ```text
//! /join:<nickname>   register this address under <nickname>
//! /list              list nicknames on both protocols
//! /exit              leave
//! anything else      chat (only once joined)
//! ```

use std::fmt;

pub const JOIN_PREFIX: &str = "/join:";
pub const LIST_COMMAND: &str = "/list";
pub const EXIT_COMMAND: &str = "/exit";

/// One parsed UDP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpCommand {
    /// `/join:<nickname>`; the nickname is not validated yet.
    Join(String),
    List,
    Exit,
    Chat(String),
}

impl UdpCommand {
    /// Parses datagram text. Surrounding whitespace is ignored.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();

        if let Some(nickname) = text.strip_prefix(JOIN_PREFIX) {
            return UdpCommand::Join(nickname.to_string());
        }

        match text {
            LIST_COMMAND => UdpCommand::List,
            EXIT_COMMAND => UdpCommand::Exit,
            _ => UdpCommand::Chat(text.to_string()),
        }
    }

    /// Creates a join command.
    pub fn join(nickname: &str) -> Self {
        UdpCommand::Join(nickname.to_string())
    }

    /// Creates a chat command.
    pub fn chat(text: &str) -> Self {
        UdpCommand::Chat(text.to_string())
    }
}

impl fmt::Display for UdpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UdpCommand::Join(nickname) => write!(f, "{JOIN_PREFIX}{nickname}"),
            UdpCommand::List => f.write_str(LIST_COMMAND),
            UdpCommand::Exit => f.write_str(EXIT_COMMAND),
            UdpCommand::Chat(text) => f.write_str(text),
        }
    }
}
