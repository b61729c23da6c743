//! Relay Protocol - Wire protocol for the dual-protocol chat relay
//!
//! Plain line-oriented UTF-8 text, shared by the relay daemon and the
//! socket clients:
//! - `frame` - inbound frame decoding and the `quit` keyword
//! - `command` - UDP command grammar (`/join:`, `/list`, `/exit`)
//! - `message` - outbound frames (chat lines, presence notices, replies)

pub mod command;
pub mod frame;
pub mod message;

pub use command::UdpCommand;
pub use frame::{decode_frame, is_quit, DEFAULT_BUFFER_SIZE};
pub use message::ServerMessage;
