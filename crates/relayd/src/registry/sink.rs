//! Outbound send handles stored alongside each registered session.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

/// Where frames for one session go.
///
/// The relay only ever talks to peers through this trait, so it never needs
/// to know which transport a session uses.
#[async_trait]
pub trait PeerSink: Send + Sync {
    /// Sends one complete frame.
    async fn send(&self, frame: &[u8]) -> io::Result<()>;

    /// Best-effort close; errors are swallowed.
    async fn close(&self);
}

/// Shared, type-erased sink handle.
pub type SharedSink = Arc<dyn PeerSink>;
