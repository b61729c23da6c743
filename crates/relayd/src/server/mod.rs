//! Dual-protocol relay server.
//!
//! [`RelayServer::start`] binds both listeners and spawns one task for each.
//! The two sides share a [`BroadcastRelay`] and nothing else.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐          ┌─────────────────┐
//! │   TcpServer     │          │   UdpServer     │
//! │  (TcpListener)  │          │  (UdpSocket)    │
//! └───────┬─────────┘          └───────┬─────────┘
//!         │ accept()                   │ recv_from()
//!         ▼                            ▼
//! ┌─────────────────┐          ┌─────────────────┐
//! │ SessionHandler  │          │  UdpDispatcher  │
//! │ (per connection)│          │  (per datagram) │
//! └───────┬─────────┘          └───────┬─────────┘
//!         │                            │
//!         └──────────┐      ┌──────────┘
//!                    ▼      ▼
//!              ┌────────────────┐
//!              │ BroadcastRelay │
//!              │ (both registries)
//!              └────────────────┘
//! ```
//!
//! A bind failure on one protocol is logged and the other keeps running.
//! Startup fails only when neither protocol could be bound.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-session and per-datagram errors are recorded and never stop the
//!   listeners

mod tcp;
mod udp;

pub use tcp::{SessionHandler, SessionSettings, SessionState, TcpServer, TcpSink};
pub use udp::{DatagramOutcome, DatagramSink, UdpDispatcher, UdpServer};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::{ChatError, ErrorKind, Phase};

use crate::config::{ConfigError, RelayConfig};
use crate::errlog::ErrorLog;
use crate::relay::BroadcastRelay;

/// How long shutdown waits for the listener tasks to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No listener could be started (TCP: {tcp}; UDP: {udp})")]
    NoListeners { tcp: ChatError, udp: ChatError },
}

/// Configured but not yet bound relay server.
pub struct RelayServer {
    /// Validated on start
    config: RelayConfig,

    /// Registries and error log shared by both listeners
    relay: BroadcastRelay,

    /// Parent token of every listener and session
    cancel: CancellationToken,
}

impl RelayServer {
    pub fn new(config: RelayConfig, cancel: CancellationToken) -> Self {
        let errors = Arc::new(ErrorLog::new(config.error_log.clone()));
        Self {
            config,
            relay: BroadcastRelay::new(errors),
            cancel,
        }
    }

    pub fn relay(&self) -> &BroadcastRelay {
        &self.relay
    }

    /// Binds both protocols and starts serving.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration is invalid
    /// - `ServerError::NoListeners` if neither protocol could be bound
    pub async fn start(self) -> Result<RunningRelay, ServerError> {
        self.config.validate()?;
        let tcp_bind = self.config.tcp.bind_addr()?;
        let udp_bind = self.config.udp.bind_addr()?;

        let settings = SessionSettings {
            buffer_size: self.config.buffer_size,
            auth_timeout: self.config.auth_timeout(),
        };

        let tcp = TcpServer::bind(
            tcp_bind,
            self.config.tcp.backlog,
            settings,
            self.relay.clone(),
            self.cancel.clone(),
        );
        let udp = UdpServer::bind(
            udp_bind,
            self.config.buffer_size,
            self.config.udp.max_in_flight,
            self.relay.clone(),
            self.cancel.clone(),
        )
        .await;

        let (tcp, udp) = match (tcp, udp) {
            (Err(tcp), Err(udp)) => {
                self.relay.errors().record(&tcp, Phase::Startup);
                self.relay.errors().record(&udp, Phase::Startup);
                return Err(ServerError::NoListeners { tcp, udp });
            }
            (tcp, udp) => (self.keep(tcp), self.keep(udp)),
        };

        let mut tasks = Vec::new();

        let tcp_addr = match tcp {
            Some(server) => {
                let addr = server.local_addr().ok();
                tasks.push(tokio::spawn(server.run()));
                addr
            }
            None => None,
        };

        let udp_addr = match udp {
            Some(server) => {
                let addr = server.local_addr().ok();
                tasks.push(tokio::spawn(server.run()));
                addr
            }
            None => None,
        };

        info!(
            tcp = ?tcp_addr,
            udp = ?udp_addr,
            "Relay server started"
        );

        Ok(RunningRelay {
            tcp_addr,
            udp_addr,
            relay: self.relay,
            cancel: self.cancel,
            tasks,
        })
    }

    /// Records a failed bind and drops it.
    fn keep<T>(&self, bound: Result<T, ChatError>) -> Option<T> {
        match bound {
            Ok(server) => Some(server),
            Err(err) => {
                self.relay.errors().record(&err, Phase::Startup);
                warn!(kind = %err.kind(), "Continuing without this protocol");
                None
            }
        }
    }
}

/// Handle to a started relay server.
pub struct RunningRelay {
    /// Bound TCP address, `None` if the TCP side failed to start
    tcp_addr: Option<SocketAddr>,

    /// Bound UDP address, `None` if the UDP side failed to start
    udp_addr: Option<SocketAddr>,

    /// Registries and error log shared by both listeners
    relay: BroadcastRelay,

    /// Cancelled on shutdown, after the notice went out
    cancel: CancellationToken,

    /// Listener tasks, joined on shutdown
    tasks: Vec<JoinHandle<()>>,
}

impl RunningRelay {
    /// Bound TCP address, or `None` if the TCP side failed to start.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Bound UDP address, or `None` if the UDP side failed to start.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn relay(&self) -> &BroadcastRelay {
        &self.relay
    }

    /// Notifies every session, stops both listeners and waits for them.
    pub async fn shutdown(self) {
        info!("Relay server shutting down");

        let closed = self.relay.shutdown().await;
        self.cancel.cancel();

        for task in self.tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let err = ChatError::new(ErrorKind::ServerShutdown, "Listener task failed")
                        .with_cause(e);
                    self.relay.errors().record(&err, Phase::Shutdown);
                }
                Err(_) => {
                    let err = ChatError::new(
                        ErrorKind::ServerShutdown,
                        format!("Listener task did not stop within {}s", SHUTDOWN_GRACE.as_secs()),
                    );
                    self.relay.errors().record(&err, Phase::Shutdown);
                }
            }
        }

        info!(sessions = closed, "Relay server stopped");
    }
}
