//! Client registries for joined sessions.
//!
//! The relay keeps two independent registries: TCP sessions keyed by
//! [`ConnectionId`] and UDP sessions keyed by source address. Each one is a
//! map behind its own lock. The lock is only held for the map operation or
//! the snapshot copy, never across a socket call: broadcasts iterate over a
//! [`Registry::snapshot`], so a concurrent unregister cannot disturb them and
//! a slow peer cannot stall new joins.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   register / unregister   ┌─────────────────────────┐
//! │  TCP sessions    │──────────────────────────▶│ Registry<ConnectionId>  │
//! └──────────────────┘                           └─────────────────────────┘
//! ┌──────────────────┐   register / unregister   ┌─────────────────────────┐
//! │  UDP dispatcher  │──────────────────────────▶│ Registry<SocketAddr>    │
//! └──────────────────┘                           └─────────────────────────┘
//!                                                            │ snapshot()
//!                                                            ▼
//!                                                   BroadcastRelay fan-out
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - `tokio::sync::Mutex` is used, so there is no lock poisoning to handle

mod sink;

pub use sink::{PeerSink, SharedSink};

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use relay_core::{ConnectionId, Nickname, Protocol};

/// Registry of TCP sessions.
pub type TcpRegistry = Registry<ConnectionId>;

/// Registry of UDP sessions.
pub type UdpRegistry = Registry<SocketAddr>;

// ============================================================================
// Member
// ============================================================================

/// One joined session.
#[derive(Clone)]
pub struct Member {
    /// Validated nickname the session joined with
    pub nickname: Nickname,

    /// Where frames for this session are written
    pub sink: SharedSink,

    /// When the entry was registered
    pub joined_at: DateTime<Utc>,

    /// Registry-wide join sequence
    seq: u64,
}

impl Member {
    /// Join order within the registry; a re-join gets a new sequence.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("nickname", &self.nickname)
            .field("joined_at", &self.joined_at)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Registry
// ============================================================================

struct Members<K> {
    entries: HashMap<K, Member>,
    /// Sequence handed to the next registration
    next_seq: u64,
}

/// Lock-guarded map from session identity to [`Member`].
pub struct Registry<K> {
    /// Protocol of every member, for logs
    protocol: Protocol,

    /// Held only for the map operation itself, never across a send
    members: Mutex<Members<K>>,
}

impl<K> Registry<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            members: Mutex::new(Members {
                entries: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Registers `key` under `nickname`.
    ///
    /// Re-registering an existing key replaces its entry; the previous
    /// nickname is returned.
    pub async fn register(&self, key: K, nickname: Nickname, sink: SharedSink) -> Option<Nickname> {
        let mut members = self.members.lock().await;
        let seq = members.next_seq;
        members.next_seq += 1;

        debug!(
            protocol = %self.protocol,
            identity = %key,
            nickname = %nickname,
            "Registered session"
        );

        members
            .entries
            .insert(
                key,
                Member {
                    nickname,
                    sink,
                    joined_at: Utc::now(),
                    seq,
                },
            )
            .map(|previous| previous.nickname)
    }

    /// Removes `key`, returning its nickname. Absent keys are a no-op.
    pub async fn unregister(&self, key: &K) -> Option<Nickname> {
        self.remove(key).await.map(|member| member.nickname)
    }

    /// Removes `key`, returning the whole member (sink included).
    pub async fn remove(&self, key: &K) -> Option<Member> {
        let removed = self.members.lock().await.entries.remove(key);
        if let Some(member) = &removed {
            debug!(
                protocol = %self.protocol,
                identity = %key,
                nickname = %member.nickname,
                "Unregistered session"
            );
        }
        removed
    }

    /// Removes `key` only if it still holds the registration `seq`.
    ///
    /// Used when pruning from a snapshot: if the identity re-joined after the
    /// snapshot was taken, the newer registration is left alone.
    pub async fn prune(&self, key: &K, seq: u64) -> Option<Member> {
        let mut members = self.members.lock().await;
        let current = members.entries.get(key).map(Member::seq);
        if current != Some(seq) {
            return None;
        }
        let removed = members.entries.remove(key);
        if let Some(member) = &removed {
            debug!(
                protocol = %self.protocol,
                identity = %key,
                nickname = %member.nickname,
                "Pruned unreachable session"
            );
        }
        removed
    }

    /// Copy of all members, in join order.
    pub async fn snapshot(&self) -> Vec<(K, Member)> {
        let mut entries: Vec<(K, Member)> = {
            let members = self.members.lock().await;
            members
                .entries
                .iter()
                .map(|(key, member)| (key.clone(), member.clone()))
                .collect()
        };
        entries.sort_by_key(|(_, member)| member.seq);
        entries
    }

    /// Nicknames of all members, in join order.
    pub async fn nicknames(&self) -> Vec<Nickname> {
        self.snapshot()
            .await
            .into_iter()
            .map(|(_, member)| member.nickname)
            .collect()
    }

    pub async fn nickname_of(&self, key: &K) -> Option<Nickname> {
        self.members
            .lock()
            .await
            .entries
            .get(key)
            .map(|member| member.nickname.clone())
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.members.lock().await.entries.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes every member, in join order. Used for shutdown teardown.
    pub async fn drain(&self) -> Vec<(K, Member)> {
        let mut entries: Vec<(K, Member)> = {
            let mut members = self.members.lock().await;
            members.entries.drain().collect()
        };
        entries.sort_by_key(|(_, member)| member.seq);
        entries
    }
}
