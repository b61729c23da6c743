//! Relay daemon - accepts TCP sessions and UDP datagrams and relays chat
//! between them.
//!
//! See [`relayd::cli`] for usage.

fn main() -> anyhow::Result<()> {
    relayd::cli::run()
}
