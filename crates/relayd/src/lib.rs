//! Relay Daemon - Dual-protocol chat relay
//!
//! This crate provides the relay daemon:
//! - `registry` - per-protocol registries of joined sessions
//! - `relay` - cross-protocol broadcast with dead-recipient pruning
//! - `server` - TCP session handler and UDP datagram dispatcher
//! - `errlog` - structured recording of every handled error
//! - `config` - TOML configuration
//! - `cli` - `relayd start|stop|status`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        relayd                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐           ┌─────────────────────────┐  │
//! │  │   TcpServer     │           │      UdpServer          │  │
//! │  │ SessionHandler  │           │    UdpDispatcher        │  │
//! │  └────────┬────────┘           └────────────┬────────────┘  │
//! │           │                                 │               │
//! │           │ register / relay                │               │
//! │           ▼                                 ▼               │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │                 BroadcastRelay                        │  │
//! │  │   TcpRegistry    UdpRegistry    ErrorLog              │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Send failures prune the recipient instead of failing the broadcast

pub mod cli;
pub mod config;
pub mod errlog;
pub mod registry;
pub mod relay;
pub mod server;
pub mod state;
