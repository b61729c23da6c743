//! Relay Core - Shared types for the dual-protocol chat relay
//!
//! This crate provides the domain types shared between the relay daemon
//! (relayd) and the socket clients (relay-client): the error taxonomy with
//! its recovery policy, and the session value types.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod session;

// Re-exports for convenience
pub use error::{
    classify, Cause, ChatError, ChatResult, ErrorDetails, ErrorKind, Operation, Phase, Recovery,
};
pub use session::{
    ConnectionId, Nickname, Protocol, RelayedMessage, SessionIdentity, MAX_NICKNAME_LEN,
};
