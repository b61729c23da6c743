//! Relay Client - Raw-socket clients for the dual-protocol chat relay
//!
//! - `client` - [`TcpChatClient`] and [`UdpChatClient`]
//! - `cli` - the interactive `relay tcp|udp` command
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

pub mod cli;
pub mod client;

pub use client::{ServerLines, TcpChatClient, TcpChatWriter, UdpChatClient};
