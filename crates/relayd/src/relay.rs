//! Cross-protocol broadcast relay.
//!
//! The relay owns both registries and the error log. The TCP session handler
//! and the UDP dispatcher each hold a clone and never talk to one another:
//! a chat line from either side fans out to every session on both protocols
//! except the sender.
//!
//! Delivery is best-effort and single-attempt. A recipient whose send fails
//! is assumed dead and pruned from its registry; the rest of the fan-out
//! carries on.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, info};

use relay_core::{
    classify, ChatError, ErrorKind, Nickname, Operation, Phase, Protocol, Recovery,
    RelayedMessage, SessionIdentity,
};
use relay_protocol::ServerMessage;

use crate::errlog::ErrorLog;
use crate::registry::{Registry, TcpRegistry, UdpRegistry};

/// Which sessions a broadcast goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Sessions on both protocols.
    Everyone,
    /// Sessions on one protocol only.
    Only(Protocol),
}

impl Audience {
    fn includes(self, protocol: Protocol) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::Only(only) => only == protocol,
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Recipients the frame was written to.
    pub delivered: usize,
    /// Recipients removed because their send failed.
    pub pruned: Vec<(SessionIdentity, Nickname)>,
}

/// Shared fan-out point for both protocol handlers.
#[derive(Clone)]
pub struct BroadcastRelay {
    /// Joined TCP sessions, keyed by connection id
    tcp: Arc<TcpRegistry>,

    /// Joined UDP peers, keyed by source address
    udp: Arc<UdpRegistry>,

    /// Where every recorded error goes
    errors: Arc<ErrorLog>,
}

impl BroadcastRelay {
    /// Creates a relay with empty registries.
    pub fn new(errors: Arc<ErrorLog>) -> Self {
        Self {
            tcp: Arc::new(TcpRegistry::new(Protocol::Tcp)),
            udp: Arc::new(UdpRegistry::new(Protocol::Udp)),
            errors,
        }
    }

    pub fn tcp(&self) -> &TcpRegistry {
        &self.tcp
    }

    pub fn udp(&self) -> &UdpRegistry {
        &self.udp
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// Relays a chat message to everyone except `excluded`.
    pub async fn relay(
        &self,
        message: &RelayedMessage,
        excluded: Option<SessionIdentity>,
    ) -> DeliveryReport {
        debug!(
            origin = %message.origin,
            sender = %message.sender,
            "Relaying chat message"
        );
        self.broadcast(&ServerMessage::chat(message), excluded, Audience::Everyone)
            .await
    }

    /// Sends `message` to every session in `audience` except `excluded`.
    ///
    /// Exclusion only applies within the excluded identity's own protocol.
    pub async fn broadcast(
        &self,
        message: &ServerMessage,
        excluded: Option<SessionIdentity>,
        audience: Audience,
    ) -> DeliveryReport {
        let frame = message.to_frame();
        let mut report = DeliveryReport::default();

        if audience.includes(Protocol::Tcp) {
            let skip = match excluded {
                Some(SessionIdentity::Tcp(id)) => Some(id),
                _ => None,
            };
            self.fan_out(&self.tcp, &frame, skip, &mut report).await;
        }

        if audience.includes(Protocol::Udp) {
            let skip = match excluded {
                Some(SessionIdentity::Udp(addr)) => Some(addr),
                _ => None,
            };
            self.fan_out(&self.udp, &frame, skip, &mut report).await;
        }

        report
    }

    async fn fan_out<K>(
        &self,
        registry: &Registry<K>,
        frame: &[u8],
        skip: Option<K>,
        report: &mut DeliveryReport,
    ) where
        K: Eq + Hash + Copy + fmt::Display + Into<SessionIdentity>,
    {
        for (key, member) in registry.snapshot().await {
            if skip == Some(key) {
                continue;
            }

            let Err(e) = member.sink.send(frame).await else {
                report.delivered += 1;
                continue;
            };

            let err = classify(
                e,
                Operation::Send,
                &format!("to {} ({key})", member.nickname),
            );
            self.errors.record(&err, Phase::Broadcast);

            if err.recovery(Phase::Broadcast) != Recovery::PruneRecipient {
                continue;
            }
            if let Some(pruned) = registry.prune(&key, member.seq()).await {
                pruned.sink.close().await;
                report.pruned.push((key.into(), pruned.nickname));
            }
        }
    }

    /// Current nicknames on both protocols.
    pub async fn roster(&self) -> ServerMessage {
        ServerMessage::roster(self.tcp.nicknames().await, self.udp.nicknames().await)
    }

    /// Sends the shutdown notice to every session, then empties both
    /// registries and closes every sink.
    ///
    /// Send failures are logged and otherwise ignored.
    pub async fn shutdown(&self) -> usize {
        let frame = ServerMessage::ShuttingDown.to_frame();
        let mut members: Vec<(SessionIdentity, _)> = Vec::new();
        members.extend(
            self.tcp
                .drain()
                .await
                .into_iter()
                .map(|(id, m)| (SessionIdentity::from(id), m)),
        );
        members.extend(
            self.udp
                .drain()
                .await
                .into_iter()
                .map(|(addr, m)| (SessionIdentity::from(addr), m)),
        );

        let total = members.len();
        for (identity, member) in members {
            if let Err(e) = member.sink.send(&frame).await {
                let err = ChatError::new(
                    ErrorKind::Broadcast,
                    format!("Shutdown notice not delivered to {} ({identity})", member.nickname),
                )
                .with_cause(e);
                self.errors.record(&err, Phase::Shutdown);
            }
            member.sink.close().await;
        }

        info!(sessions = total, "Closed all sessions");
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::net::SocketAddr;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use relay_core::ConnectionId;

    use crate::registry::{PeerSink, SharedSink};

    /// Sink that remembers every frame it was given.
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    impl RecordingSink {
        async fn frames(&self) -> Vec<String> {
            self.frames.lock().await.clone()
        }
    }

    #[async_trait]
    impl PeerSink for RecordingSink {
        async fn send(&self, frame: &[u8]) -> io::Result<()> {
            let text = String::from_utf8_lossy(frame).trim_end().to_string();
            self.frames.lock().await.push(text);
            Ok(())
        }

        async fn close(&self) {
            *self.closed.lock().await = true;
        }
    }

    /// Sink whose peer is gone.
    struct BrokenSink;

    #[async_trait]
    impl PeerSink for BrokenSink {
        async fn send(&self, _frame: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
        }

        async fn close(&self) {}
    }

    fn nick(name: &str) -> Nickname {
        Nickname::parse(name).unwrap()
    }

    fn relay() -> BroadcastRelay {
        BroadcastRelay::new(Arc::new(ErrorLog::tracing_only()))
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn join_tcp(relay: &BroadcastRelay, id: u64, name: &str) -> Arc<RecordingSink> {
        let sink = Arc::new(RecordingSink::default());
        let shared: SharedSink = sink.clone();
        relay
            .tcp()
            .register(ConnectionId::new(id), nick(name), shared)
            .await;
        sink
    }

    async fn join_udp(relay: &BroadcastRelay, port: u16, name: &str) -> Arc<RecordingSink> {
        let sink = Arc::new(RecordingSink::default());
        let shared: SharedSink = sink.clone();
        relay.udp().register(addr(port), nick(name), shared).await;
        sink
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_but_sender() {
        let relay = relay();
        let alice = join_tcp(&relay, 1, "alice").await;
        let bob = join_tcp(&relay, 2, "bob").await;
        let carol = join_udp(&relay, 9000, "carol").await;

        let msg = RelayedMessage::new(Protocol::Tcp, nick("alice"), "hi").unwrap();
        let report = relay
            .relay(&msg, Some(ConnectionId::new(1).into()))
            .await;

        assert_eq!(report.delivered, 2);
        assert!(alice.frames().await.is_empty());
        assert_eq!(bob.frames().await, vec!["[TCP] alice: hi"]);
        assert_eq!(carol.frames().await, vec!["[TCP] alice: hi"]);
    }

    #[tokio::test]
    async fn test_exclusion_is_per_protocol() {
        let relay = relay();
        // Same numeric identity on both sides must not collide.
        let tcp_peer = join_tcp(&relay, 9000, "tcp-peer").await;
        let sender = join_udp(&relay, 9000, "sender").await;

        let msg = RelayedMessage::new(Protocol::Udp, nick("sender"), "yo").unwrap();
        relay.relay(&msg, Some(addr(9000).into())).await;

        assert!(sender.frames().await.is_empty());
        assert_eq!(tcp_peer.frames().await, vec!["[UDP] sender: yo"]);
    }

    #[tokio::test]
    async fn test_udp_only_audience() {
        let relay = relay();
        let tcp_peer = join_tcp(&relay, 1, "alice").await;
        let udp_peer = join_udp(&relay, 9001, "dave").await;

        let notice = ServerMessage::joined(&nick("carol"), Protocol::Udp);
        relay
            .broadcast(&notice, Some(addr(9000).into()), Audience::Only(Protocol::Udp))
            .await;

        assert!(tcp_peer.frames().await.is_empty());
        assert_eq!(udp_peer.frames().await, vec!["📢 carol joined via UDP"]);
    }

    #[tokio::test]
    async fn test_failed_recipient_is_pruned_and_others_still_receive() {
        let relay = relay();
        let first = join_tcp(&relay, 1, "first").await;
        relay
            .tcp()
            .register(ConnectionId::new(2), nick("ghost"), Arc::new(BrokenSink))
            .await;
        relay
            .udp()
            .register(addr(9002), nick("udp-ghost"), Arc::new(BrokenSink))
            .await;
        let last = join_udp(&relay, 9003, "last").await;

        let msg = RelayedMessage::new(Protocol::Tcp, nick("someone"), "ping").unwrap();
        let report = relay.relay(&msg, None).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.pruned.len(), 2);
        assert_eq!(first.frames().await, vec!["[TCP] someone: ping"]);
        assert_eq!(last.frames().await, vec!["[TCP] someone: ping"]);
        assert!(!relay.tcp().contains(&ConnectionId::new(2)).await);
        assert!(!relay.udp().contains(&addr(9002)).await);
        assert_eq!(relay.tcp().len().await, 1);
        assert_eq!(relay.errors().recorded(), 2);
    }

    #[tokio::test]
    async fn test_roster_lists_both_sides() {
        let relay = relay();
        assert_eq!(
            relay.roster().await.to_string(),
            "👥 Online - TCP: None | UDP: None"
        );

        join_tcp(&relay, 1, "alice").await;
        join_udp(&relay, 9000, "carol").await;
        assert_eq!(
            relay.roster().await.to_string(),
            "👥 Online - TCP: alice | UDP: carol"
        );
    }

    #[tokio::test]
    async fn test_shutdown_notifies_and_closes_everyone() {
        let relay = relay();
        let alice = join_tcp(&relay, 1, "alice").await;
        let carol = join_udp(&relay, 9000, "carol").await;

        assert_eq!(relay.shutdown().await, 2);

        assert_eq!(alice.frames().await, vec!["🛑 Server is shutting down"]);
        assert_eq!(carol.frames().await, vec!["🛑 Server is shutting down"]);
        assert!(*alice.closed.lock().await);
        assert!(relay.tcp().is_empty().await);
        assert!(relay.udp().is_empty().await);
    }
}
